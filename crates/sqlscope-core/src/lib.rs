//! Core types and traits for sqlscope.
//!
//! `sqlscope-core` is the **foundation layer** of the workspace. It defines the
//! record contract, the value model and the metadata cache every other crate
//! builds on.
//!
//! # Role In The Architecture
//!
//! - **Contract layer**: `Model` is implemented by record types, `Connection`
//!   and `Dialect` by drivers, `JoinTableHandler` by many-to-many link tables.
//! - **Data model**: `Value`, `Row` and `SqlType` carry query inputs and outputs.
//! - **Metadata cache**: `ModelRegistry` derives a `ModelDescriptor` (table name,
//!   columns, primary keys, relationships) per record type, once.
//!
//! # Who Uses This Crate
//!
//! - `sqlscope-query` renders `Search` condition sets against descriptors.
//! - `sqlscope-session` drives scopes, callbacks and preload on top of it.
//! - `sqlscope-sqlite` implements `Connection` and `Dialect` for SQLite.
//!
//! Most applications should use the `sqlscope` facade.

pub mod binder;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod field;
pub mod key;
pub mod model;
pub mod naming;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod tag;
pub mod types;
pub mod value;

pub use binder::{BoundField, BoundFields, set_field};
pub use connection::Connection;
pub use dialect::{CommonDialect, Dialect, quote_path};
pub use error::{Error, Errors, Result};
pub use field::{FieldDef, FieldDescriptor, FieldFlags, FieldKind};
pub use key::{KeyPart, KeyTuple};
pub use model::{DynModel, Hook, Model, ModelType, Related, downcast, downcast_ref, embedded_field};
pub use naming::{pluralize, table_name_for, to_db_name};
pub use registry::{ModelDescriptor, ModelRegistry, SOFT_DELETE_COLUMN};
pub use relationship::{
    DefaultJoinTableHandler, JoinClause, JoinTableForeignKey, JoinTableHandler, LinkSelection,
    Polymorphic, Relationship, RelationshipKind,
};
pub use row::Row;
pub use tag::TagSettings;
pub use types::SqlType;
pub use value::{FromValue, TIMESTAMP_TEXT_FORMAT, Value};
