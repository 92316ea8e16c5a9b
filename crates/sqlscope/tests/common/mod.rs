//! Records and schema shared by the SQLite integration tests.

#![allow(dead_code)]

use chrono::NaiveDateTime;
use sqlscope::prelude::*;

pub const SCHEMA: &str = "
CREATE TABLE users (
    id integer primary key autoincrement,
    name varchar(64) NOT NULL,
    age integer,
    active bool DEFAULT 1,
    created_at datetime,
    updated_at datetime,
    deleted_at datetime
);
CREATE TABLE authors (id integer primary key autoincrement, name text);
CREATE TABLE books (id integer primary key autoincrement, title text, author_id bigint);
CREATE TABLE profiles (id integer primary key autoincrement, bio text, author_id bigint);
CREATE TABLE tags (id integer primary key autoincrement, name text);
";

/// An in-memory database with [`SCHEMA`] applied.
pub fn setup() -> Db {
    setup_with(DbConfig::default())
}

pub fn setup_with(config: DbConfig) -> Db {
    let db = sqlscope::sqlite::open_in_memory(config).expect("open sqlite memory db");
    for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        db.exec(statement, args![]).expect("apply schema");
    }
    db
}

// ============================================================================
// Users
// ============================================================================

/// Timestamped, soft-deletable, with record hooks.
#[derive(Debug, Clone, Default)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub age: Option<i64>,
    pub active: bool,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub found: bool,
}

impl User {
    pub fn named(name: &str, age: i64) -> Self {
        Self {
            name: name.to_string(),
            age: Some(age),
            active: true,
            ..Self::default()
        }
    }
}

impl Model for User {
    fn type_name() -> &'static str {
        "User"
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::column("id", SqlType::BigInt),
            FieldDef::column("name", SqlType::Text).tag("size:64;not null"),
            FieldDef::column("age", SqlType::Int),
            FieldDef::column("active", SqlType::Bool),
            FieldDef::column("created_at", SqlType::Timestamp),
            FieldDef::column("updated_at", SqlType::Timestamp),
            FieldDef::column("deleted_at", SqlType::Timestamp),
        ]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            "age" => Some(self.age.into()),
            "active" => Some(self.active.into()),
            "created_at" => Some(self.created_at.into()),
            "updated_at" => Some(self.updated_at.into()),
            "deleted_at" => Some(self.deleted_at.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "name" => self.name = FromValue::from_value(value)?,
            "age" => self.age = FromValue::from_value(value)?,
            "active" => self.active = FromValue::from_value(value)?,
            "created_at" => self.created_at = FromValue::from_value(value)?,
            "updated_at" => self.updated_at = FromValue::from_value(value)?,
            "deleted_at" => self.deleted_at = FromValue::from_value(value)?,
            _ => return Err(Error::unaddressable("User", field)),
        }
        Ok(())
    }

    fn before_save(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::custom("name can't be blank"));
        }
        Ok(())
    }

    fn after_find(&mut self) -> Result<()> {
        self.found = true;
        Ok(())
    }
}

// ============================================================================
// Authors, books, profiles and tags
// ============================================================================

/// Has many books, has one profile, many-to-many tags through `author_tags`.
#[derive(Debug, Clone, Default)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub books: Vec<Book>,
    pub profile: Option<Profile>,
    pub tags: Vec<Tag>,
}

impl Author {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
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

impl Book {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
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

impl Tag {
    pub fn named(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
        }
    }
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

/// Names of `tags`, sorted.
pub fn tag_names(tags: &[Tag]) -> Vec<String> {
    let mut names: Vec<String> = tags.iter().map(|t| t.name.clone()).collect();
    names.sort();
    names
}
