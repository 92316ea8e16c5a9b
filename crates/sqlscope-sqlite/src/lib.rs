//! SQLite driver for sqlscope.
//!
//! `sqlscope-sqlite` provides the two collaborators a `Db` handle needs to
//! talk to SQLite:
//!
//! - [`SqliteConnection`]: a [`Connection`](sqlscope_core::Connection) over a
//!   bundled `rusqlite` handle, file-backed or in memory.
//! - [`SqliteDialect`]: quoting, column types and `sqlite_master` lookups.
//!
//! ```ignore
//! let conn = SqliteConnection::open_in_memory()?;
//! let db = Db::open(Arc::new(conn), Arc::new(SqliteDialect));
//! ```

pub mod connection;
pub mod dialect;

pub use connection::SqliteConnection;
pub use dialect::SqliteDialect;
