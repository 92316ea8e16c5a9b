//! Relationship metadata and the many-to-many join-table collaborator.
//!
//! Relationships are classified by the registry when a type is first
//! described. A collection field becomes has-many (or many-to-many when it
//! names a join table). A single-record field becomes has-one when the
//! related type carries the owner's key, or belongs-to when the owner carries
//! the related type's key.

use std::collections::HashSet;
use std::fmt;

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::key::KeyTuple;
use crate::model::{DynModel, ModelType};
use crate::value::Value;

/// The kind of relationship between two record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// `User` has one `Profile`; the key lives on `Profile`.
    HasOne,
    /// `User` has many `Email`s; the key lives on `Email`.
    HasMany,
    /// `Email` belongs to `User`; the key lives on `Email` itself.
    BelongsTo,
    /// `Blog` has many `Tag`s through a join table.
    ManyToMany,
}

impl RelationshipKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipKind::HasOne => "has_one",
            RelationshipKind::HasMany => "has_many",
            RelationshipKind::BelongsTo => "belongs_to",
            RelationshipKind::ManyToMany => "many_to_many",
        }
    }
}

/// Discriminator for polymorphic has-one/has-many relationships.
///
/// `polymorphic:Owner` on a `User.toys` field means `Toy` carries `owner_id`
/// and `owner_type`, and rows belonging to users have `owner_type = "users"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polymorphic {
    /// Logical name of the type field on the related record.
    pub type_field: String,
    /// Column of the type field.
    pub type_db_name: String,
    /// Value written to and matched against the type column.
    pub value: String,
}

/// A wired relationship on one field of a record type.
///
/// Key lists are parallel. For has-one/has-many the foreign fields live on the
/// related type and the association fields on the owner; for belongs-to the
/// foreign fields live on the owner and the association fields on the related
/// type. For many-to-many the foreign fields are the owner's keys and the
/// association fields the related type's keys, while the `*_db_names` lists
/// name the join-table columns.
#[derive(Clone)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Owner field holding the related record(s).
    pub field: String,
    pub target: ModelType,
    pub foreign_field_names: Vec<String>,
    pub foreign_db_names: Vec<String>,
    pub association_field_names: Vec<String>,
    pub association_db_names: Vec<String>,
    pub polymorphic: Option<Polymorphic>,
    pub join_table: Option<std::sync::Arc<dyn JoinTableHandler>>,
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("kind", &self.kind)
            .field("field", &self.field)
            .field("target", &self.target)
            .field("foreign_field_names", &self.foreign_field_names)
            .field("foreign_db_names", &self.foreign_db_names)
            .field("association_field_names", &self.association_field_names)
            .field("association_db_names", &self.association_db_names)
            .field("polymorphic", &self.polymorphic)
            .field("join_table", &self.join_table.as_ref().map(|h| h.table().to_string()))
            .finish()
    }
}

// ============================================================================
// Join tables
// ============================================================================

/// One key column of a join table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTableForeignKey {
    /// Column in the join table (`blog_id`).
    pub db_name: String,
    /// Column it references on the model's table (`id`).
    pub association_db_name: String,
    /// Logical field on the model holding the referenced value.
    pub field_name: String,
}

/// Which links [`JoinTableHandler::remove`] deletes for a source record.
#[derive(Debug, Clone, Copy)]
pub enum LinkSelection<'a> {
    /// Every link of the source.
    All,
    /// Links to these destinations only.
    Only(&'a [&'a dyn DynModel]),
    /// Every link except those to these destinations.
    Except(&'a [&'a dyn DynModel]),
}

/// SQL needed to read destinations through a join table.
///
/// `condition` uses `?` placeholders bound, in order, to `args`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub joins: String,
    pub condition: String,
    pub args: Vec<Value>,
}

/// Manages the linking table of a many-to-many relationship.
pub trait JoinTableHandler: Send + Sync + fmt::Debug {
    fn table(&self) -> &str;

    /// Join-table columns referencing the owning (source) record.
    fn source_foreign_keys(&self) -> &[JoinTableForeignKey];

    /// Join-table columns referencing the related (destination) record.
    fn destination_foreign_keys(&self) -> &[JoinTableForeignKey];

    /// Link `source` to `destination` unless the link already exists.
    fn add(
        &self,
        conn: &dyn Connection,
        dialect: &dyn Dialect,
        source: &dyn DynModel,
        destination: &dyn DynModel,
    ) -> Result<()>;

    /// Delete links of `source`, returning how many were removed.
    fn remove(
        &self,
        conn: &dyn Connection,
        dialect: &dyn Dialect,
        source: &dyn DynModel,
        selection: LinkSelection<'_>,
    ) -> Result<u64>;

    /// Join from `destination_table` through the join table, restricted to
    /// links of `sources`.
    fn join_with(
        &self,
        dialect: &dyn Dialect,
        destination_table: &str,
        sources: &[&dyn DynModel],
    ) -> JoinClause;
}

/// Join-table handler derived from the relationship declaration.
#[derive(Debug, Clone)]
pub struct DefaultJoinTableHandler {
    table: String,
    source: Vec<JoinTableForeignKey>,
    destination: Vec<JoinTableForeignKey>,
}

impl DefaultJoinTableHandler {
    pub fn new(
        table: impl Into<String>,
        source: Vec<JoinTableForeignKey>,
        destination: Vec<JoinTableForeignKey>,
    ) -> Self {
        Self {
            table: table.into(),
            source,
            destination,
        }
    }

    fn key_values(keys: &[JoinTableForeignKey], record: &dyn DynModel) -> Vec<Value> {
        keys.iter()
            .map(|k| record.read(&k.field_name).unwrap_or_default())
            .collect()
    }

    /// `(a, b) IN ((?, ?), (?, ?))`, or `a IN (?, ?)` for a single column.
    fn in_clause(columns: &[String], tuples: &[Vec<Value>], args: &mut Vec<Value>) -> String {
        let placeholders = |n: usize| vec!["?"; n].join(",");
        if columns.len() == 1 {
            for t in tuples {
                args.extend(t.iter().cloned());
            }
            format!("{} IN ({})", columns[0], placeholders(tuples.len()))
        } else {
            let groups: Vec<String> = tuples
                .iter()
                .map(|t| {
                    args.extend(t.iter().cloned());
                    format!("({})", placeholders(t.len()))
                })
                .collect();
            format!("({}) IN ({})", columns.join(","), groups.join(","))
        }
    }
}

impl JoinTableHandler for DefaultJoinTableHandler {
    fn table(&self) -> &str {
        &self.table
    }

    fn source_foreign_keys(&self) -> &[JoinTableForeignKey] {
        &self.source
    }

    fn destination_foreign_keys(&self) -> &[JoinTableForeignKey] {
        &self.destination
    }

    fn add(
        &self,
        conn: &dyn Connection,
        dialect: &dyn Dialect,
        source: &dyn DynModel,
        destination: &dyn DynModel,
    ) -> Result<()> {
        let table = dialect.quote(&self.table);
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for key in &self.source {
            columns.push(dialect.quote(&key.db_name));
        }
        values.extend(Self::key_values(&self.source, source));
        for key in &self.destination {
            columns.push(dialect.quote(&key.db_name));
        }
        values.extend(Self::key_values(&self.destination, destination));

        let n = values.len();
        let binds: Vec<String> = (1..=n).map(|i| dialect.bind_var(i)).collect();
        let conditions: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = {}", dialect.bind_var(n + i + 1)))
            .collect();

        let mut select = format!("SELECT {}", binds.join(","));
        let dummy = dialect.select_from_dummy_table();
        if !dummy.is_empty() {
            select.push(' ');
            select.push_str(dummy);
        }
        let sql = format!(
            "INSERT INTO {table} ({}) {select} WHERE NOT EXISTS (SELECT * FROM {table} WHERE {})",
            columns.join(","),
            conditions.join(" AND ")
        );

        let mut params = values.clone();
        params.extend(values);
        conn.execute(&sql, &params)?;
        Ok(())
    }

    fn remove(
        &self,
        conn: &dyn Connection,
        dialect: &dyn Dialect,
        source: &dyn DynModel,
        selection: LinkSelection<'_>,
    ) -> Result<u64> {
        let mut args = Vec::new();
        let mut conditions: Vec<String> = self
            .source
            .iter()
            .map(|k| format!("{} = ?", dialect.quote(&k.db_name)))
            .collect();
        args.extend(Self::key_values(&self.source, source));

        let columns: Vec<String> = self
            .destination
            .iter()
            .map(|k| dialect.quote(&k.db_name))
            .collect();
        let tuples = |records: &[&dyn DynModel]| -> Vec<Vec<Value>> {
            records
                .iter()
                .map(|r| Self::key_values(&self.destination, *r))
                .collect()
        };
        match selection {
            LinkSelection::All => {}
            LinkSelection::Only([]) => return Ok(0),
            LinkSelection::Only(records) => {
                conditions.push(Self::in_clause(&columns, &tuples(records), &mut args));
            }
            LinkSelection::Except([]) => {}
            LinkSelection::Except(records) => {
                let clause = Self::in_clause(&columns, &tuples(records), &mut args);
                conditions.push(format!("NOT ({clause})"));
            }
        }

        let mut position = 0;
        let sql_conditions: Vec<String> = conditions
            .into_iter()
            .map(|c| {
                let mut out = String::with_capacity(c.len());
                for ch in c.chars() {
                    if ch == '?' {
                        position += 1;
                        out.push_str(&dialect.bind_var(position));
                    } else {
                        out.push(ch);
                    }
                }
                out
            })
            .collect();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            dialect.quote(&self.table),
            sql_conditions.join(" AND ")
        );
        conn.execute(&sql, &args)
    }

    fn join_with(
        &self,
        dialect: &dyn Dialect,
        destination_table: &str,
        sources: &[&dyn DynModel],
    ) -> JoinClause {
        let table = dialect.quote(&self.table);
        let destination = dialect.quote(destination_table);
        let on: Vec<String> = self
            .destination
            .iter()
            .map(|k| {
                format!(
                    "{table}.{} = {destination}.{}",
                    dialect.quote(&k.db_name),
                    dialect.quote(&k.association_db_name)
                )
            })
            .collect();
        let joins = format!("INNER JOIN {table} ON {}", on.join(" AND "));

        let mut seen = HashSet::new();
        let mut tuples = Vec::new();
        for source in sources {
            let values = Self::key_values(&self.source, *source);
            let key = KeyTuple::from_values(&values);
            if !key.is_null() && seen.insert(key) {
                tuples.push(values);
            }
        }

        let mut args = Vec::new();
        let condition = if tuples.is_empty() {
            "1 <> 1".to_string()
        } else {
            let columns: Vec<String> = self
                .source
                .iter()
                .map(|k| format!("{table}.{}", dialect.quote(&k.db_name)))
                .collect();
            Self::in_clause(&columns, &tuples, &mut args)
        };

        JoinClause {
            joins,
            condition,
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::CommonDialect;
    use crate::error::Error;
    use crate::field::FieldDef;
    use crate::model::Model;
    use crate::row::Row;
    use crate::types::SqlType;
    use crate::value::FromValue;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    struct Node {
        id: i64,
    }

    impl Model for Node {
        fn type_name() -> &'static str {
            "Node"
        }

        fn fields() -> Vec<FieldDef> {
            vec![FieldDef::column("id", SqlType::BigInt)]
        }

        fn get_value(&self, field: &str) -> Option<Value> {
            (field == "id").then(|| self.id.into())
        }

        fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
            match field {
                "id" => self.id = FromValue::from_value(value)?,
                _ => return Err(Error::unaddressable("Node", field)),
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        statements: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl Connection for Recorder {
        fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(1)
        }

        fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
            self.execute(sql, params).map(|n| n as i64)
        }

        fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        fn begin(&self) -> Result<()> {
            Ok(())
        }

        fn commit(&self) -> Result<()> {
            Ok(())
        }

        fn rollback(&self) -> Result<()> {
            Ok(())
        }
    }

    fn handler() -> DefaultJoinTableHandler {
        DefaultJoinTableHandler::new(
            "node_links",
            vec![JoinTableForeignKey {
                db_name: "node_id".into(),
                association_db_name: "id".into(),
                field_name: "id".into(),
            }],
            vec![JoinTableForeignKey {
                db_name: "link_id".into(),
                association_db_name: "id".into(),
                field_name: "id".into(),
            }],
        )
    }

    #[test]
    fn test_add_is_conditional_insert() {
        let conn = Recorder::default();
        handler()
            .add(&conn, &CommonDialect, &Node { id: 1 }, &Node { id: 2 })
            .unwrap();
        let statements = conn.statements.lock().unwrap();
        let (sql, params) = &statements[0];
        assert_eq!(
            sql,
            "INSERT INTO \"node_links\" (\"node_id\",\"link_id\") SELECT ?,? WHERE NOT EXISTS \
             (SELECT * FROM \"node_links\" WHERE \"node_id\" = ? AND \"link_id\" = ?)"
        );
        assert_eq!(
            params,
            &vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(1), Value::BigInt(2)]
        );
    }

    #[test]
    fn test_remove_selections() {
        let conn = Recorder::default();
        let h = handler();
        let keep = Node { id: 3 };
        h.remove(&conn, &CommonDialect, &Node { id: 1 }, LinkSelection::Except(&[&keep]))
            .unwrap();
        h.remove(&conn, &CommonDialect, &Node { id: 1 }, LinkSelection::All)
            .unwrap();
        assert_eq!(
            h.remove(&conn, &CommonDialect, &Node { id: 1 }, LinkSelection::Only(&[]))
                .unwrap(),
            0
        );

        let statements = conn.statements.lock().unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].0,
            "DELETE FROM \"node_links\" WHERE \"node_id\" = ? AND NOT (\"link_id\" IN (?))"
        );
        assert_eq!(statements[0].1, vec![Value::BigInt(1), Value::BigInt(3)]);
        assert_eq!(statements[1].0, "DELETE FROM \"node_links\" WHERE \"node_id\" = ?");
    }

    #[test]
    fn test_join_with_deduplicates_sources() {
        let a = Node { id: 1 };
        let b = Node { id: 1 };
        let c = Node { id: 2 };
        let clause = handler().join_with(&CommonDialect, "nodes", &[&a, &b, &c]);
        assert_eq!(
            clause.joins,
            "INNER JOIN \"node_links\" ON \"node_links\".\"link_id\" = \"nodes\".\"id\""
        );
        assert_eq!(clause.condition, "\"node_links\".\"node_id\" IN (?,?)");
        assert_eq!(clause.args, vec![Value::BigInt(1), Value::BigInt(2)]);
    }

    #[test]
    fn test_join_with_no_sources_matches_nothing() {
        let clause = handler().join_with(&CommonDialect, "nodes", &[]);
        assert_eq!(clause.condition, "1 <> 1");
        assert!(clause.args.is_empty());
    }
}
