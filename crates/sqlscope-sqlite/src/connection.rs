//! A [`Connection`] over a single `rusqlite` handle.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::types::{Value as SqliteValue, ValueRef};
use sqlscope_core::{Connection, Error, Result, Row, TIMESTAMP_TEXT_FORMAT, Value};

/// One SQLite database handle, serialized behind a mutex.
///
/// Timestamps are stored as text in [`TIMESTAMP_TEXT_FORMAT`], booleans as
/// `0`/`1`, JSON as its text form.
pub struct SqliteConnection {
    inner: Mutex<rusqlite::Connection>,
}

impl SqliteConnection {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening sqlite database");
        let conn = rusqlite::Connection::open(path).map_err(Error::driver)?;
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(Error::driver)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self {
            inner: Mutex::new(conn),
        }
    }

    fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run several `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock().execute_batch(sql).map_err(Error::driver)
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::TinyInt(i) => SqliteValue::Integer(i64::from(*i)),
        Value::SmallInt(i) => SqliteValue::Integer(i64::from(*i)),
        Value::Int(i) => SqliteValue::Integer(i64::from(*i)),
        Value::BigInt(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(f64::from(*f)),
        Value::Double(f) => SqliteValue::Real(*f),
        Value::Decimal(s) | Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Timestamp(t) => SqliteValue::Text(t.format(TIMESTAMP_TEXT_FORMAT).to_string()),
        Value::Json(j) => SqliteValue::Text(j.to_string()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::BigInt(i),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn bind(params: &[Value]) -> impl rusqlite::Params + '_ {
    rusqlite::params_from_iter(params.iter().map(to_sqlite))
}

impl Connection for SqliteConnection {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let changed = self.lock().execute(sql, bind(params)).map_err(Error::driver)?;
        Ok(changed as u64)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let conn = self.lock();
        conn.execute(sql, bind(params)).map_err(Error::driver)?;
        Ok(conn.last_insert_rowid())
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.lock();
        let mut statement = conn.prepare(sql).map_err(Error::driver)?;
        let columns = std::sync::Arc::new(
            statement
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>(),
        );
        let width = columns.len();
        let mut rows = statement.query(bind(params)).map_err(Error::driver)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(Error::driver)? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(from_sqlite(row.get_ref(index).map_err(Error::driver)?));
            }
            out.push(Row::new(std::sync::Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn begin(&self) -> Result<()> {
        self.execute_batch("BEGIN")
    }

    fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sqlscope_core::FromValue;

    fn conn() -> SqliteConnection {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, seen_at TEXT, done BOOLEAN)")
            .unwrap();
        conn
    }

    #[test]
    fn test_insert_returns_rowid() {
        let conn = conn();
        let first = conn
            .insert("INSERT INTO items (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        let second = conn
            .insert("INSERT INTO items (name) VALUES (?)", &[Value::from("b")])
            .unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[test]
    fn test_values_round_trip_through_text_and_integers() {
        let conn = conn();
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        conn.insert(
            "INSERT INTO items (name, seen_at, done) VALUES (?, ?, ?)",
            &[Value::from("a"), Value::Timestamp(at), Value::Bool(true)],
        )
        .unwrap();
        let rows = conn.query("SELECT id, name, seen_at, done FROM items", &[]).unwrap();
        let row = &rows[0];
        assert_eq!(row.columns(), ["id", "name", "seen_at", "done"]);
        assert_eq!(row.get_named("id"), Some(&Value::BigInt(1)));
        let seen = chrono::NaiveDateTime::from_value(row.get_named("seen_at").cloned().unwrap()).unwrap();
        assert_eq!(seen, at);
        assert!(bool::from_value(row.get_named("done").cloned().unwrap()).unwrap());
    }

    #[test]
    fn test_execute_reports_changed_rows() {
        let conn = conn();
        for name in ["a", "b", "c"] {
            conn.insert("INSERT INTO items (name) VALUES (?)", &[Value::from(name)])
                .unwrap();
        }
        let changed = conn
            .execute("UPDATE items SET name = ? WHERE id > ?", &[Value::from("z"), Value::BigInt(1)])
            .unwrap();
        assert_eq!(changed, 2);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let conn = conn();
        conn.begin().unwrap();
        conn.insert("INSERT INTO items (name) VALUES (?)", &[Value::from("a")])
            .unwrap();
        conn.rollback().unwrap();
        let rows = conn.query("SELECT count(*) FROM items", &[]).unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::BigInt(0)));
    }

    #[test]
    fn test_driver_errors_are_reported() {
        let conn = conn();
        let err = conn.query("SELECT * FROM missing", &[]).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
