//! Recording connection and record types shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::NaiveDateTime;
use sqlscope_core::{
    CommonDialect, Connection, Error, FieldDef, FromValue, Model, Related, Result, Row, SqlType,
    Value,
};

use crate::config::DbConfig;
use crate::db::Db;

type Statement = (String, Vec<Value>);

/// Records every statement. Inserts answer queued ids, queries answer queued
/// row sets, both in order; an empty queue yields `0` or no rows.
#[derive(Default)]
pub struct MockConnection {
    statements: Mutex<Vec<Statement>>,
    insert_ids: Mutex<VecDeque<i64>>,
    results: Mutex<VecDeque<Vec<Row>>>,
}

impl MockConnection {
    fn record(&self, sql: &str, params: &[Value]) {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((sql.to_string(), params.to_vec()));
    }
}

impl Connection for MockConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql, params);
        Ok(1)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.record(sql, params);
        Ok(self.insert_ids.lock().unwrap().pop_front().unwrap_or(0))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params);
        Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn begin(&self) -> Result<()> {
        self.record("BEGIN", &[]);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.record("COMMIT", &[]);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.record("ROLLBACK", &[]);
        Ok(())
    }
}

fn mocks() -> &'static Mutex<HashMap<usize, Arc<MockConnection>>> {
    static MOCKS: OnceLock<Mutex<HashMap<usize, Arc<MockConnection>>>> = OnceLock::new();
    MOCKS.get_or_init(Mutex::default)
}

fn mock_of(db: &Db) -> Arc<MockConnection> {
    let key = std::ptr::from_ref(db.connection()).cast::<()>() as usize;
    Arc::clone(mocks().lock().unwrap().get(&key).expect("not a mock handle"))
}

pub fn mock_db() -> Db {
    mock_db_with(DbConfig::default())
}

pub fn mock_db_with(config: DbConfig) -> Db {
    let mock = Arc::new(MockConnection::default());
    let key = Arc::as_ptr(&mock).cast::<()>() as usize;
    mocks().lock().unwrap().insert(key, Arc::clone(&mock));
    Db::with_config(mock, Arc::new(CommonDialect), config)
}

/// Statements run so far, with their bound values.
pub fn recorded(db: &Db) -> Vec<Statement> {
    mock_of(db).statements.lock().unwrap().clone()
}

/// Queue a result set for the next query.
pub fn push_rows(db: &Db, columns: &[&str], rows: Vec<Vec<Value>>) {
    let columns = Arc::new(columns.iter().map(|c| (*c).to_string()).collect::<Vec<_>>());
    let rows = rows
        .into_iter()
        .map(|values| Row::new(Arc::clone(&columns), values))
        .collect();
    mock_of(db).results.lock().unwrap().push_back(rows);
}

/// Queue the generated key of the next insert.
pub fn push_insert_id(db: &Db, id: i64) {
    mock_of(db).insert_ids.lock().unwrap().push_back(id);
}

// ============================================================================
// Records
// ============================================================================

/// Soft-deletable, timestamped, with record hooks.
#[derive(Debug, Clone, Default)]
pub struct Note {
    pub id: i64,
    pub body: String,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub saves: u32,
    pub loaded: bool,
}

impl Model for Note {
    fn type_name() -> &'static str {
        "Note"
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::column("id", SqlType::BigInt),
            FieldDef::column("body", SqlType::Text),
            FieldDef::column("created_at", SqlType::Timestamp),
            FieldDef::column("updated_at", SqlType::Timestamp),
            FieldDef::column("deleted_at", SqlType::Timestamp),
        ]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "body" => Some(self.body.clone().into()),
            "created_at" => Some(self.created_at.into()),
            "updated_at" => Some(self.updated_at.into()),
            "deleted_at" => Some(self.deleted_at.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "body" => self.body = FromValue::from_value(value)?,
            "created_at" => self.created_at = FromValue::from_value(value)?,
            "updated_at" => self.updated_at = FromValue::from_value(value)?,
            "deleted_at" => self.deleted_at = FromValue::from_value(value)?,
            _ => return Err(Error::unaddressable("Note", field)),
        }
        Ok(())
    }

    fn before_save(&mut self) -> Result<()> {
        self.body = self.body.trim().to_string();
        if self.body == "reject" {
            return Err(Error::custom("body rejected"));
        }
        Ok(())
    }

    fn after_save(&mut self) -> Result<()> {
        self.saves += 1;
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        self.loaded = true;
        Ok(())
    }
}

/// A column with a database default.
#[derive(Debug, Clone, Default)]
pub struct Gadget {
    pub id: i64,
    pub name: String,
    pub status: String,
}

impl Model for Gadget {
    fn type_name() -> &'static str {
        "Gadget"
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::column("id", SqlType::BigInt),
            FieldDef::column("name", SqlType::Text),
            FieldDef::column("status", SqlType::Text).tag("default:'fresh'"),
        ]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            "status" => Some(self.status.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "name" => self.name = FromValue::from_value(value)?,
            "status" => self.status = FromValue::from_value(value)?,
            _ => return Err(Error::unaddressable("Gadget", field)),
        }
        Ok(())
    }
}

/// Has many books, has one profile, many-to-many tags.
#[derive(Debug, Clone, Default)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub books: Vec<Book>,
    pub profile: Option<Profile>,
    pub tags: Vec<Tag>,
}

impl Model for Author {
    fn type_name() -> &'static str {
        "Author"
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::column("id", SqlType::BigInt),
            FieldDef::column("name", SqlType::Text),
            FieldDef::many::<Book>("books"),
            FieldDef::one::<Profile>("profile"),
            FieldDef::many::<Tag>("tags").tag("many2many:author_tags"),
        ]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "name" => self.name = FromValue::from_value(value)?,
            _ => return Err(Error::unaddressable("Author", field)),
        }
        Ok(())
    }

    fn take_relation(&mut self, field: &str) -> Option<Related> {
        match field {
            "books" => Some(Related::many(std::mem::take(&mut self.books))),
            "profile" => Some(Related::one(self.profile.take())),
            "tags" => Some(Related::many(std::mem::take(&mut self.tags))),
            _ => None,
        }
    }

    fn put_relation(&mut self, field: &str, related: Related) -> Result<()> {
        match field {
            "books" => self.books = related.into_many()?,
            "profile" => self.profile = related.into_one()?,
            "tags" => self.tags = related.into_many()?,
            _ => return Err(Error::unaddressable("Author", field)),
        }
        Ok(())
    }
}

/// Belongs to an author.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author_id: Option<i64>,
    pub author: Option<Author>,
}

impl Model for Book {
    fn type_name() -> &'static str {
        "Book"
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::column("id", SqlType::BigInt),
            FieldDef::column("title", SqlType::Text),
            FieldDef::column("author_id", SqlType::BigInt),
            FieldDef::one::<Author>("author"),
        ]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.clone().into()),
            "author_id" => Some(self.author_id.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "title" => self.title = FromValue::from_value(value)?,
            "author_id" => self.author_id = FromValue::from_value(value)?,
            _ => return Err(Error::unaddressable("Book", field)),
        }
        Ok(())
    }

    fn take_relation(&mut self, field: &str) -> Option<Related> {
        match field {
            "author" => Some(Related::one(self.author.take())),
            _ => None,
        }
    }

    fn put_relation(&mut self, field: &str, related: Related) -> Result<()> {
        match field {
            "author" => self.author = related.into_one()?,
            _ => return Err(Error::unaddressable("Book", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub id: i64,
    pub bio: String,
    pub author_id: Option<i64>,
}

impl Model for Profile {
    fn type_name() -> &'static str {
        "Profile"
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::column("id", SqlType::BigInt),
            FieldDef::column("bio", SqlType::Text),
            FieldDef::column("author_id", SqlType::BigInt),
        ]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "bio" => Some(self.bio.clone().into()),
            "author_id" => Some(self.author_id.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "bio" => self.bio = FromValue::from_value(value)?,
            "author_id" => self.author_id = FromValue::from_value(value)?,
            _ => return Err(Error::unaddressable("Profile", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl Model for Tag {
    fn type_name() -> &'static str {
        "Tag"
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::column("id", SqlType::BigInt),
            FieldDef::column("name", SqlType::Text),
        ]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "name" => self.name = FromValue::from_value(value)?,
            _ => return Err(Error::unaddressable("Tag", field)),
        }
        Ok(())
    }
}
