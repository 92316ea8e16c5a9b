//! Handle-wide configuration.

use serde::{Deserialize, Serialize};
use sqlscope_core::Result;

/// Configuration for a [`Db`](crate::Db) handle and every scope it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Derive singular table names (`user` instead of `users`).
    pub singular_table: bool,
    /// Emit a `sqlscope::sql` debug event for every statement.
    pub log_sql: bool,
    /// Save related records together with their owner.
    pub save_associations: bool,
    /// Refuse DELETE statements that have no WHERE clause.
    pub blocking_delete_without_conditions: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            singular_table: false,
            log_sql: false,
            save_associations: true,
            blocking_delete_without_conditions: false,
        }
    }
}

impl DbConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn singular_table(mut self, enabled: bool) -> Self {
        self.singular_table = enabled;
        self
    }

    #[must_use]
    pub const fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    #[must_use]
    pub const fn save_associations(mut self, enabled: bool) -> Self {
        self.save_associations = enabled;
        self
    }

    #[must_use]
    pub const fn blocking_delete_without_conditions(mut self, enabled: bool) -> Self {
        self.blocking_delete_without_conditions = enabled;
        self
    }

    /// Parse a JSON document. Missing keys keep their defaults.
    ///
    /// ```ignore
    /// let config = DbConfig::from_json(r#"{"singular_table": true, "log_sql": true}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
