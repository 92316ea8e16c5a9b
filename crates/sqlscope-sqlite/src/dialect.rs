//! SQLite flavour of [`Dialect`].

use sqlscope_core::dialect::{column_constraints, field_size};
use sqlscope_core::{Connection, Dialect, FieldDescriptor, Result, SqlType, Value};

/// SQLite syntax: double-quoted identifiers, `?` placeholders and
/// `sqlite_master` catalog lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    fn exists(conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<bool> {
        let row = conn.query_row(sql, params)?;
        Ok(row
            .and_then(|r| r.get(0).and_then(Value::as_i64))
            .is_some_and(|n| n > 0))
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn data_type_of(&self, field: &FieldDescriptor) -> String {
        if let Some(explicit) = field.settings.get("TYPE") {
            return format!("{explicit}{}", column_constraints(field));
        }
        let base = match field.sql_type {
            SqlType::Bool => "bool".to_string(),
            // Only an INTEGER PRIMARY KEY aliases the rowid.
            t if t.is_integer() && field.is_auto_increment() => {
                "integer primary key autoincrement".to_string()
            }
            SqlType::SmallInt | SqlType::Int => "integer".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Float | SqlType::Double => "real".to_string(),
            SqlType::Decimal => "decimal".to_string(),
            SqlType::Text => match field_size(field) {
                Some(size) if size > 0 && size < 65532 => format!("varchar({size})"),
                _ => "text".to_string(),
            },
            SqlType::Bytes => "blob".to_string(),
            SqlType::Timestamp => "datetime".to_string(),
            SqlType::Json => "text".to_string(),
        };
        format!("{base}{}", column_constraints(field))
    }

    fn has_table(&self, conn: &dyn Connection, table: &str) -> Result<bool> {
        Self::exists(
            conn,
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )
    }

    fn has_column(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool> {
        Self::exists(
            conn,
            "SELECT count(*) FROM pragma_table_info(?) WHERE name = ?",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn has_index(&self, conn: &dyn Connection, table: &str, index: &str) -> Result<bool> {
        Self::exists(
            conn,
            "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?",
            &[Value::from(table), Value::from(index)],
        )
    }

    fn has_foreign_key(&self, _conn: &dyn Connection, _table: &str, _key: &str) -> Result<bool> {
        Ok(false)
    }
}
