//! Scope settings.
//!
//! Settings are a string-keyed map of arbitrary values. Operation-wide
//! settings are copied from the [`Db`](crate::Db) handle into every scope and
//! from a scope into the nested scopes its callbacks create. Instance
//! settings live on one scope only.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// `bool` (or `"false"`/`"skip"`): save related records with their owner.
pub const SAVE_ASSOCIATIONS: &str = "sqlscope:save_associations";
/// `bool`: update related records that already have a primary key.
pub const ASSOCIATION_AUTOUPDATE: &str = "sqlscope:association_autoupdate";
/// `bool`: create related records that have no primary key yet.
pub const ASSOCIATION_AUTOCREATE: &str = "sqlscope:association_autocreate";
/// `bool`: write foreign keys and join-table links for related records.
pub const ASSOCIATION_SAVE_REFERENCE: &str = "sqlscope:association_save_reference";
/// `String` (`"ASC"`/`"DESC"`): order a query by the primary key.
pub const ORDER_BY_PRIMARY_KEY: &str = "sqlscope:order_by_primary_key";
/// `String` appended to SELECT statements.
pub const QUERY_OPTION: &str = "sqlscope:query_option";
/// `String` appended to INSERT statements.
pub const INSERT_OPTION: &str = "sqlscope:insert_option";
/// `String` appended to UPDATE statements.
pub const UPDATE_OPTION: &str = "sqlscope:update_option";
/// `String` appended to DELETE statements.
pub const DELETE_OPTION: &str = "sqlscope:delete_option";
/// `bool`: write columns directly, skipping hooks and timestamps.
pub const UPDATE_COLUMN: &str = "sqlscope:update_column";

/// Instance: `Vec<(String, Value)>` requested by an attribute update.
pub const UPDATE_INTERFACE: &str = "sqlscope:update_interface";
/// Instance: `Vec<(String, Value)>` columns the UPDATE statement writes.
pub const UPDATE_ATTRS: &str = "sqlscope:update_attrs";
/// Instance: set by the scope that began the running transaction.
pub const STARTED_TRANSACTION: &str = "sqlscope:started_transaction";
/// Instance: `Vec<String>` columns left to their database default on insert.
pub const BLANK_COLUMNS_WITH_DEFAULT: &str = "sqlscope:blank_columns_with_default_value";

/// A string-keyed map of shared, type-erased values.
#[derive(Clone, Default)]
pub struct Settings {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Borrow a value if it is present and of type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Read a switch. `bool` values are taken as-is; text is false when it
    /// reads `false` or `skip`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        let value = self.values.get(key)?;
        if let Some(b) = value.downcast_ref::<bool>() {
            return Some(*b);
        }
        let text = value
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| value.downcast_ref::<&'static str>().copied())?;
        Some(!(text.eq_ignore_ascii_case("false") || text.eq_ignore_ascii_case("skip")))
    }

    /// Text value, accepting both `String` and `&'static str`.
    pub fn text(&self, key: &str) -> Option<&str> {
        let value = self.values.get(key)?;
        value
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| value.downcast_ref::<&'static str>().copied())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Settings").field("keys", &keys).finish()
    }
}
