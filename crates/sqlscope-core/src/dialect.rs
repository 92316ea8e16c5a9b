//! The SQL dialect collaborator.
//!
//! A [`Dialect`] owns everything that varies between databases: identifier
//! quoting, placeholder tokens, column types, LIMIT/OFFSET syntax and catalog
//! lookups. [`CommonDialect`] is an ANSI-flavoured default.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::connection::Connection;
use crate::error::Result;
use crate::field::FieldDescriptor;
use crate::types::SqlType;
use crate::value::Value;

/// Database-specific SQL syntax.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Quote a single identifier.
    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Placeholder token for the 1-based parameter `position`.
    fn bind_var(&self, _position: usize) -> String {
        "?".to_string()
    }

    /// Column type (plus constraints from the field's tag) for DDL.
    fn data_type_of(&self, field: &FieldDescriptor) -> String;

    fn has_table(&self, conn: &dyn Connection, table: &str) -> Result<bool>;

    fn has_column(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool>;

    fn has_index(&self, conn: &dyn Connection, table: &str, index: &str) -> Result<bool>;

    fn has_foreign_key(&self, conn: &dyn Connection, table: &str, key: &str) -> Result<bool>;

    /// `LIMIT`/`OFFSET` clause, empty when neither is set.
    fn limit_and_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(&format!("LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            if !sql.is_empty() {
                sql.push(' ');
            }
            sql.push_str(&format!("OFFSET {offset}"));
        }
        sql
    }

    /// `FROM` clause for a table-less `SELECT`, e.g. `FROM DUAL`.
    fn select_from_dummy_table(&self) -> &'static str {
        ""
    }

    /// Name for an index or foreign key: `{kind}_{table}_{fields}`, with every
    /// run of non-alphanumeric characters collapsed to `_`.
    fn build_key_name(&self, kind: &str, table: &str, fields: &[&str]) -> String {
        let raw = format!("{}_{}_{}", kind, table, fields.join("_"));
        match key_name_regex() {
            Some(re) => re.replace_all(&raw, "_").into_owned(),
            None => raw,
        }
    }
}

fn key_name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^a-zA-Z0-9]+").ok()).as_ref()
}

/// Quote an identifier that may be qualified (`table.column`), quoting each
/// segment on its own.
pub fn quote_path(dialect: &dyn Dialect, ident: &str) -> String {
    ident
        .split('.')
        .map(|segment| dialect.quote(segment))
        .collect::<Vec<_>>()
        .join(".")
}

/// Size from a field's `size:` setting.
pub fn field_size(field: &FieldDescriptor) -> Option<u32> {
    field.settings.get("SIZE").and_then(|s| s.trim().parse().ok())
}

/// ` NOT NULL`, ` UNIQUE` and ` DEFAULT x` suffixes from a field's settings.
pub fn column_constraints(field: &FieldDescriptor) -> String {
    let mut extra = String::new();
    if field.settings.has("NOT NULL") {
        extra.push_str(" NOT NULL");
    }
    if field.settings.has("UNIQUE") {
        extra.push_str(" UNIQUE");
    }
    if let Some(default) = field.settings.get("DEFAULT") {
        extra.push_str(" DEFAULT ");
        extra.push_str(default);
    }
    extra
}

/// ANSI SQL with `?` placeholders and `INFORMATION_SCHEMA` catalog lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonDialect;

impl CommonDialect {
    fn count(conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<bool> {
        let row = conn.query_row(sql, params)?;
        Ok(row
            .and_then(|r| r.get(0).and_then(Value::as_i64))
            .is_some_and(|n| n > 0))
    }
}

impl Dialect for CommonDialect {
    fn name(&self) -> &'static str {
        "common"
    }

    fn data_type_of(&self, field: &FieldDescriptor) -> String {
        if let Some(explicit) = field.settings.get("TYPE") {
            return format!("{explicit}{}", column_constraints(field));
        }
        let auto = field.is_auto_increment();
        let base = match field.sql_type {
            SqlType::Bool => "BOOLEAN".to_string(),
            SqlType::SmallInt | SqlType::Int if auto => "INTEGER AUTO_INCREMENT".to_string(),
            SqlType::SmallInt | SqlType::Int => "INTEGER".to_string(),
            SqlType::BigInt if auto => "BIGINT AUTO_INCREMENT".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Float | SqlType::Double => "FLOAT".to_string(),
            SqlType::Decimal => "DECIMAL".to_string(),
            SqlType::Text => match field_size(field) {
                Some(size) if size > 0 && size < 65532 => format!("VARCHAR({size})"),
                _ => "VARCHAR(65532)".to_string(),
            },
            SqlType::Bytes => match field_size(field) {
                Some(size) if size > 0 && size < 65532 => format!("BINARY({size})"),
                _ => "BINARY(65532)".to_string(),
            },
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "TEXT".to_string(),
        };
        format!("{base}{}", column_constraints(field))
    }

    fn has_table(&self, conn: &dyn Connection, table: &str) -> Result<bool> {
        Self::count(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.TABLES WHERE table_name = ?",
            &[Value::from(table)],
        )
    }

    fn has_column(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool> {
        Self::count(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.COLUMNS WHERE table_name = ? AND column_name = ?",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn has_index(&self, conn: &dyn Connection, table: &str, index: &str) -> Result<bool> {
        Self::count(
            conn,
            "SELECT count(*) FROM INFORMATION_SCHEMA.STATISTICS WHERE table_name = ? AND index_name = ?",
            &[Value::from(table), Value::from(index)],
        )
    }

    fn has_foreign_key(&self, _conn: &dyn Connection, _table: &str, _key: &str) -> Result<bool> {
        Ok(false)
    }
}
