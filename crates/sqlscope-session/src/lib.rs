//! Scopes, callback pipelines and association handling for sqlscope.
//!
//! `sqlscope-session` is the **execution layer**. It turns a [`Db`] handle's
//! accumulated [`Search`](sqlscope_query::Search) into statements by running
//! named callback pipelines over a [`Scope`].
//!
//! # Role In The Architecture
//!
//! - **Handle**: [`Db`] owns the connection, dialect, metadata registry and
//!   callbacks; chain methods derive new handles with extended searches.
//! - **Scope**: one operation's context. It holds the target records, a private
//!   search, settings and collected errors.
//! - **Callbacks**: per-kind pipelines (create, update, delete, query, row
//!   query) ordered by `before`/`after` constraints. The defaults are
//!   registered by [`register_defaults`].
//! - **Associations**: related records are saved with their owner, eagerly
//!   loaded with `preload`, and managed explicitly through [`Association`].
//!
//! # Example
//!
//! ```ignore
//! let db = Db::open(conn, Arc::new(SqliteDialect));
//! let mut author = Author { name: "ann".into(), ..Author::default() };
//! db.create(&mut author)?;
//!
//! let authors: Vec<Author> = db.preload("books").order("name").find()?;
//! db.association(&mut author, "tags")?.append(vec![rust_tag])?;
//! ```

pub mod association;
pub mod callbacks;
pub mod config;
pub mod db;
pub mod preload;
pub mod scope;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use association::Association;
pub use callbacks::{Callback, CallbackKind, HookFn, Registrar, register_defaults};
pub use config::DbConfig;
pub use db::{Db, TracedConnection};
pub use scope::{Scope, ScopeState, ScopeValue, scan_into, scan_record};
pub use settings::{
    ASSOCIATION_AUTOCREATE, ASSOCIATION_AUTOUPDATE, ASSOCIATION_SAVE_REFERENCE, DELETE_OPTION,
    INSERT_OPTION, ORDER_BY_PRIMARY_KEY, QUERY_OPTION, SAVE_ASSOCIATIONS, Settings, UPDATE_COLUMN,
    UPDATE_OPTION,
};
