//! sqlscope: record-to-table mapping with scoped operations.
//!
//! This is the facade crate. It re-exports the layers most applications need:
//!
//! - [`sqlscope_core`]: the `Model` contract, values, dialects and the
//!   metadata cache.
//! - [`sqlscope_query`]: the `Search` condition builder and SQL rendering.
//! - [`sqlscope_session`]: the `Db` handle, scopes, callback pipelines,
//!   preload and association management.
//! - `sqlscope_sqlite` (feature `sqlite`, on by default): a SQLite driver.
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlscope::prelude::*;
//!
//! let db = sqlscope::sqlite::open_in_memory(DbConfig::default())?;
//! db.exec("CREATE TABLE users (id integer primary key autoincrement, name text)", args![])?;
//!
//! let mut user = User { name: "ann".into(), ..User::default() };
//! db.create(&mut user)?;
//!
//! let found: Vec<User> = db.filter("name = ?", args!["ann"]).find()?;
//! ```
//!
//! # Callbacks
//!
//! Every write and query runs a named pipeline. Pipelines can be extended:
//!
//! ```ignore
//! db.callback(|cb| {
//!     cb.create()
//!         .before("sqlscope:create")
//!         .register("audit:stamp", |scope| { /* ... */ });
//! });
//! ```

pub use sqlscope_core;
pub use sqlscope_query;
pub use sqlscope_session;
#[cfg(feature = "sqlite")]
pub use sqlscope_sqlite;

pub use sqlscope_core::{
    CommonDialect, Connection, Dialect, DynModel, Error, Errors, FieldDef, FromValue, Model,
    ModelDescriptor, ModelRegistry, ModelType, Related, Relationship, RelationshipKind, Result,
    Row, SqlType, Value,
};
pub use sqlscope_query::{Arg, Condition, Order, Search, args, expr};
pub use sqlscope_session::{
    Association, Callback, CallbackKind, Db, DbConfig, Registrar, Scope, ScopeValue,
};

/// Open a [`Db`] over SQLite.
#[cfg(feature = "sqlite")]
pub mod sqlite {
    use std::path::Path;
    use std::sync::Arc;

    use sqlscope_core::Result;
    use sqlscope_session::{Db, DbConfig};
    pub use sqlscope_sqlite::{SqliteConnection, SqliteDialect};

    /// A handle over the database file at `path`.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Db> {
        let conn = SqliteConnection::open(path)?;
        Ok(Db::with_config(Arc::new(conn), Arc::new(SqliteDialect), config))
    }

    /// A handle over a private in-memory database.
    pub fn open_in_memory(config: DbConfig) -> Result<Db> {
        let conn = SqliteConnection::open_in_memory()?;
        Ok(Db::with_config(Arc::new(conn), Arc::new(SqliteDialect), config))
    }
}

/// Everything needed to declare models and run operations.
pub mod prelude {
    pub use sqlscope_core::{
        Error, FieldDef, FromValue, Model, Related, Result, SqlType, Value,
    };
    pub use sqlscope_query::{Arg, Condition, Order, Search, args, expr};
    pub use sqlscope_session::{Db, DbConfig, Scope, ScopeValue};
}
