//! The database connection collaborator.
//!
//! Drivers implement [`Connection`]. Every call is synchronous: scopes run
//! their callback pipelines sequentially on the caller's thread, and
//! timeouts or cancellation belong to the driver.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// A database connection able to run statements with positional parameters.
pub trait Connection: Send + Sync {
    /// Run a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run an INSERT, returning the generated row id.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Run a query and collect every row.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a query and return its first row.
    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Whether [`Connection::begin`] is meaningful for this connection.
    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}
