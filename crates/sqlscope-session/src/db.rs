//! The `Db` handle.
//!
//! A [`Db`] is cheap to clone. Every chain method returns a new handle
//! carrying an extended [`Search`], so a base handle can be shared and
//! specialized freely:
//!
//! ```ignore
//! let db = Db::open(conn, Arc::new(SqliteDialect));
//! let adults = db.filter("age >= ?", args![18]).order("name");
//! let first: User = adults.first()?;
//! let all: Vec<User> = adults.find()?;
//! ```
//!
//! The registry, dialect, callbacks and configuration are shared by all
//! clones. Typed operations build a [`Scope`], run the matching pipeline and
//! move the records back into the caller's values.
//!
//! # Transactions
//!
//! [`Db::begin`] returns a handle whose scopes run inside the transaction and
//! never open their own. Without an explicit transaction each write pipeline
//! begins one and commits it, or rolls it back when a hook reported an error.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use sqlscope_core::{
    Connection, Dialect, Error, FromValue, Model, ModelDescriptor, ModelRegistry, ModelType,
    Result, Row, Value,
};
use sqlscope_query::{Arg, Condition, Order, Search, substitute};

use crate::association::Association;
use crate::callbacks::{Callback, CallbackKind, HookFn};
use crate::config::DbConfig;
use crate::scope::{Scope, ScopeValue};
use crate::settings::{SAVE_ASSOCIATIONS, Settings, UPDATE_COLUMN, UPDATE_INTERFACE};

/// State shared by every clone of a handle.
struct Shared {
    registry: Arc<ModelRegistry>,
    dialect: Arc<dyn Dialect>,
    callbacks: RwLock<Callback>,
    config: DbConfig,
    join_tables: Mutex<HashSet<String>>,
}

/// A database handle: a connection, shared metadata, and an accumulated search.
#[derive(Clone)]
pub struct Db {
    shared: Arc<Shared>,
    conn: Arc<dyn Connection>,
    search: Search,
    settings: Settings,
    log_mode: Option<bool>,
    in_transaction: bool,
}

impl Db {
    // ========================================================================
    // Construction
    // ========================================================================

    /// A handle with the default configuration.
    pub fn open(conn: Arc<dyn Connection>, dialect: Arc<dyn Dialect>) -> Self {
        Self::with_config(conn, dialect, DbConfig::default())
    }

    /// A handle with its own registry built from `config`.
    pub fn with_config(conn: Arc<dyn Connection>, dialect: Arc<dyn Dialect>, config: DbConfig) -> Self {
        let registry = Arc::new(ModelRegistry::with_singular_table(config.singular_table));
        Self::with_registry(conn, dialect, registry, config)
    }

    /// A handle sharing an existing registry.
    pub fn with_registry(
        conn: Arc<dyn Connection>,
        dialect: Arc<dyn Dialect>,
        registry: Arc<ModelRegistry>,
        config: DbConfig,
    ) -> Self {
        let mut settings = Settings::new();
        if !config.save_associations {
            settings.set(SAVE_ASSOCIATIONS, false);
        }
        tracing::debug!(dialect = dialect.name(), ?config, "opening handle");
        Self {
            shared: Arc::new(Shared {
                registry,
                dialect,
                callbacks: RwLock::new(Callback::with_defaults()),
                config,
                join_tables: Mutex::new(HashSet::new()),
            }),
            conn,
            search: Search::new(),
            settings,
            log_mode: None,
            in_transaction: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn registry(&self) -> &ModelRegistry {
        &self.shared.registry
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.shared.dialect.as_ref()
    }

    /// The raw connection, without SQL tracing.
    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    /// The connection wrapped with SQL tracing.
    pub fn conn(&self) -> TracedConnection<'_> {
        TracedConnection {
            inner: self.conn.as_ref(),
            enabled: self.log_mode.unwrap_or(self.shared.config.log_sql),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn describe<M: Model>(&self) -> Arc<ModelDescriptor> {
        self.shared.registry.describe::<M>()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn set_in_transaction(&mut self, active: bool) {
        self.in_transaction = active;
    }

    /// Finalized hooks of one pipeline.
    pub fn hooks(&self, kind: CallbackKind) -> Vec<HookFn> {
        self.shared
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .hooks(kind)
    }

    /// Register, replace or remove callbacks on the shared pipelines.
    pub fn callback(&self, configure: impl FnOnce(&mut Callback)) {
        let mut callbacks = self
            .shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        configure(&mut callbacks);
    }

    /// This handle with an empty search, keeping connection, settings and
    /// transaction state.
    pub fn detached(&self) -> Db {
        Db {
            search: Search::new(),
            ..self.clone()
        }
    }

    /// Remember that the join table `table` exists.
    pub(crate) fn mark_join_table(&self, table: &str) -> bool {
        self.shared
            .join_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string())
    }

    pub(crate) fn knows_join_table(&self, table: &str) -> bool {
        self.shared
            .join_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table)
    }

    // ========================================================================
    // Chain methods
    // ========================================================================

    fn chain(&self, build: impl FnOnce(Search) -> Search) -> Db {
        let mut db = self.clone();
        db.search = build(std::mem::take(&mut db.search));
        db
    }

    #[must_use]
    pub fn filter(&self, condition: impl Into<Condition>, args: Vec<Arg>) -> Db {
        self.chain(|s| s.filter(condition, args))
    }

    #[must_use]
    pub fn or(&self, condition: impl Into<Condition>, args: Vec<Arg>) -> Db {
        self.chain(|s| s.or(condition, args))
    }

    #[must_use]
    pub fn not(&self, condition: impl Into<Condition>, args: Vec<Arg>) -> Db {
        self.chain(|s| s.not(condition, args))
    }

    #[must_use]
    pub fn having(&self, condition: impl Into<Condition>, args: Vec<Arg>) -> Db {
        self.chain(|s| s.having(condition, args))
    }

    #[must_use]
    pub fn joins(&self, sql: impl Into<String>, args: Vec<Arg>) -> Db {
        self.chain(|s| s.joins(sql, args))
    }

    #[must_use]
    pub fn select(&self, sql: impl Into<String>, args: Vec<Arg>) -> Db {
        self.chain(|s| s.select(sql, args))
    }

    #[must_use]
    pub fn omit(&self, columns: &[&str]) -> Db {
        self.chain(|s| s.omit(columns))
    }

    #[must_use]
    pub fn order(&self, order: impl Into<Order>) -> Db {
        self.chain(|s| s.order(order))
    }

    #[must_use]
    pub fn group(&self, group: impl Into<String>) -> Db {
        self.chain(|s| s.group(group))
    }

    #[must_use]
    pub fn limit(&self, limit: u64) -> Db {
        self.chain(|s| s.limit(limit))
    }

    #[must_use]
    pub fn offset(&self, offset: u64) -> Db {
        self.chain(|s| s.offset(offset))
    }

    #[must_use]
    pub fn preload(&self, path: impl Into<String>) -> Db {
        self.chain(|s| s.preload(path))
    }

    /// Preload `path`, filtering its last hop with `conditions`.
    #[must_use]
    pub fn preload_with(&self, path: impl Into<String>, conditions: Search) -> Db {
        self.chain(|s| s.preload_with(path, conditions))
    }

    /// Include soft-deleted rows and hard-delete instead of soft-deleting.
    #[must_use]
    pub fn unscoped(&self) -> Db {
        self.chain(Search::unscoped)
    }

    #[must_use]
    pub fn table(&self, name: impl Into<String>) -> Db {
        self.chain(|s| s.table(name))
    }

    #[must_use]
    pub fn raw(&self, sql: impl Into<String>, args: Vec<Arg>) -> Db {
        self.chain(|s| s.raw(sql, args))
    }

    /// Attributes used by [`Db::first_or_init`] when nothing matches.
    #[must_use]
    pub fn attrs<K: Into<String>, V: Into<Value>>(&self, attrs: impl IntoIterator<Item = (K, V)>) -> Db {
        let attrs = collect_attrs(attrs);
        self.chain(|s| s.attrs(attrs))
    }

    /// Attributes assigned by [`Db::first_or_init`] whether or not a row matches.
    #[must_use]
    pub fn assign<K: Into<String>, V: Into<Value>>(&self, attrs: impl IntoIterator<Item = (K, V)>) -> Db {
        let attrs = collect_attrs(attrs);
        self.chain(|s| s.assign(attrs))
    }

    /// Set an operation-wide setting for scopes created from this handle.
    #[must_use]
    pub fn set<T: std::any::Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> Db {
        let mut db = self.clone();
        db.settings.set(key, value);
        db
    }

    /// Force SQL tracing on or off for this handle.
    #[must_use]
    pub fn log_mode(&self, enabled: bool) -> Db {
        let mut db = self.clone();
        db.log_mode = Some(enabled);
        db
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    /// A scope over `value` carrying this handle's search and settings.
    pub fn new_scope(&self, value: ScopeValue) -> Scope {
        Scope::new(self, value)
    }

    /// Run `op` on a scope holding `record`, then move the record back.
    fn with_record<M: Model, T>(
        &self,
        record: &mut M,
        op: impl FnOnce(&mut Scope) -> Result<T>,
    ) -> Result<T> {
        let mut scope = self.new_scope(ScopeValue::one(std::mem::take(record)));
        let result = op(&mut scope);
        *record = scope.into_value().into_one()?;
        result
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every matching record.
    pub fn find<M: Model>(&self) -> Result<Vec<M>> {
        let mut scope = self.new_scope(ScopeValue::many::<M>());
        scope.find()?;
        scope.into_value().into_many()
    }

    /// The first record ordered by primary key.
    pub fn first<M: Model>(&self) -> Result<M> {
        let mut scope = self.new_scope(ScopeValue::one(M::default()));
        scope.first()?;
        scope.into_value().into_one()
    }

    /// The last record ordered by primary key.
    pub fn last<M: Model>(&self) -> Result<M> {
        let mut scope = self.new_scope(ScopeValue::one(M::default()));
        scope.last()?;
        scope.into_value().into_one()
    }

    /// One record, in whatever order the database returns it.
    pub fn take<M: Model>(&self) -> Result<M> {
        let mut scope = self.new_scope(ScopeValue::one(M::default()));
        scope.take()?;
        scope.into_value().into_one()
    }

    /// Number of matching rows.
    pub fn count<M: Model>(&self) -> Result<i64> {
        self.new_scope(ScopeValue::many::<M>()).count()
    }

    /// One column of every matching row.
    pub fn pluck<M: Model, T: FromValue>(&self, column: &str) -> Result<Vec<T>> {
        self.new_scope(ScopeValue::many::<M>())
            .pluck(column)?
            .into_iter()
            .map(T::from_value)
            .collect()
    }

    /// The first match, or a new unsaved record built from the map
    /// conditions and [`Db::attrs`]. [`Db::assign`] attributes are applied
    /// either way.
    pub fn first_or_init<M: Model>(&self) -> Result<M> {
        let mut record = match self.first::<M>() {
            Ok(found) => found,
            Err(err) if err.is_record_not_found() => {
                let mut record = M::default();
                let mut attrs: Vec<(String, Value)> = Vec::new();
                for fragment in self.search.wheres() {
                    if let Condition::Map(pairs) = &fragment.condition {
                        attrs.extend(pairs.iter().cloned());
                    }
                }
                attrs.extend(self.search.init_attrs().iter().cloned());
                self.assign_to(&mut record, &attrs)?;
                record
            }
            Err(err) => return Err(err),
        };
        let assigned = self.search.assign_attrs().to_vec();
        self.assign_to(&mut record, &assigned)?;
        Ok(record)
    }

    /// The first match updated with [`Db::assign`] attributes, or a record
    /// built like [`Db::first_or_init`] and inserted.
    pub fn first_or_create<M: Model>(&self) -> Result<M> {
        match self.first::<M>() {
            Ok(mut found) => {
                let assigned = self.search.assign_attrs().to_vec();
                if !assigned.is_empty() {
                    self.detached().update_attrs(&mut found, assigned)?;
                }
                Ok(found)
            }
            Err(err) if err.is_record_not_found() => {
                let mut record = self.first_or_init::<M>()?;
                self.detached().create(&mut record)?;
                Ok(record)
            }
            Err(err) => Err(err),
        }
    }

    fn assign_to<M: Model>(&self, record: &mut M, attrs: &[(String, Value)]) -> Result<()> {
        let descriptor = self.describe::<M>();
        for (name, value) in attrs {
            sqlscope_core::set_field(&descriptor, record, name, value.clone())?;
        }
        Ok(())
    }

    /// Records related to `owner` through its relationship on `field`.
    pub fn related<M: Model, R: Model>(&self, owner: &M, field: &str) -> Result<Vec<R>> {
        let mut scope = self.new_scope(ScopeValue::one(owner.clone()));
        scope
            .related(ModelType::of::<R>(), field)?
            .into_iter()
            .map(sqlscope_core::downcast)
            .collect()
    }

    /// Association operations for one relationship field of `owner`.
    pub fn association<'a, M: Model>(&self, owner: &'a mut M, field: &str) -> Result<Association<'a, M>> {
        Association::new(self.detached(), owner, field)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert `record`, filling in its generated primary key and timestamps.
    pub fn create<M: Model>(&self, record: &mut M) -> Result<()> {
        self.with_record(record, Scope::create)
    }

    /// Insert `record` when it has no primary key, update every column otherwise.
    pub fn save<M: Model>(&self, record: &mut M) -> Result<()> {
        self.with_record(record, Scope::save)
    }

    /// Update the given attributes of `record` that differ from its current
    /// values, running hooks and refreshing `updated_at`. Returns rows affected.
    pub fn update_attrs<M: Model, K: Into<String>, V: Into<Value>>(
        &self,
        record: &mut M,
        attrs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<u64> {
        let attrs = collect_attrs(attrs);
        self.with_record(record, |scope| {
            scope.instance_set(UPDATE_INTERFACE, attrs);
            scope.update()?;
            Ok(scope.rows_affected())
        })
    }

    /// Write attributes directly: no hooks, no timestamps, no associations.
    pub fn update_columns<M: Model, K: Into<String>, V: Into<Value>>(
        &self,
        record: &mut M,
        attrs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<u64> {
        self.set(UPDATE_COLUMN, true)
            .set(SAVE_ASSOCIATIONS, false)
            .update_attrs(record, attrs)
    }

    /// Update every row matching the search.
    pub fn update_all<M: Model, K: Into<String>, V: Into<Value>>(
        &self,
        attrs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<u64> {
        let mut scope = self.new_scope(ScopeValue::many::<M>());
        scope.instance_set(UPDATE_INTERFACE, collect_attrs(attrs));
        scope.update()?;
        Ok(scope.rows_affected())
    }

    /// Delete `record` (soft delete when the type has `deleted_at`).
    pub fn delete<M: Model>(&self, record: &M) -> Result<u64> {
        let mut scope = self.new_scope(ScopeValue::one(record.clone()));
        scope.delete()?;
        Ok(scope.rows_affected())
    }

    /// Delete every row matching the search.
    pub fn delete_all<M: Model>(&self) -> Result<u64> {
        let mut scope = self.new_scope(ScopeValue::many::<M>());
        scope.delete()?;
        Ok(scope.rows_affected())
    }

    // ========================================================================
    // Raw SQL
    // ========================================================================

    /// Run a statement with `?` placeholders. Returns rows affected.
    pub fn exec(&self, sql: &str, args: Vec<Arg>) -> Result<u64> {
        let mut vars = Vec::new();
        let sql = substitute(self.dialect(), sql, &args, &mut vars)?;
        self.conn().execute(&sql, &vars)
    }

    /// Run a query with `?` placeholders through the row-query pipeline.
    pub fn raw_rows(&self, sql: &str, args: Vec<Arg>) -> Result<Vec<Row>> {
        let mut scope = self.raw(sql, args).new_scope(ScopeValue::Empty);
        scope.query_rows()
    }

    /// Rows of the current search against `M`'s table.
    pub fn rows<M: Model>(&self) -> Result<Vec<Row>> {
        self.new_scope(ScopeValue::many::<M>()).query_rows()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction. The returned handle runs every scope inside it.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&self) -> Result<Db> {
        if self.in_transaction || !self.conn.supports_transactions() {
            return Err(Error::CantStartTransaction);
        }
        tracing::info!("Beginning transaction");
        self.conn.begin()?;
        let mut tx = self.clone();
        tx.in_transaction = true;
        Ok(tx)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::InvalidTransaction);
        }
        tracing::info!("Committing transaction");
        self.conn.commit()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::InvalidTransaction);
        }
        tracing::info!("Rolling back transaction");
        self.conn.rollback()
    }

    /// Run `body` in a transaction, committing on `Ok` and rolling back on `Err`.
    pub fn transaction<T>(&self, body: impl FnOnce(&Db) -> Result<T>) -> Result<T> {
        let tx = self.begin()?;
        match body(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.shared.dialect.name())
            .field("config", &self.shared.config)
            .field("search", &self.search)
            .field("settings", &self.settings)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

fn collect_attrs<K: Into<String>, V: Into<Value>>(attrs: impl IntoIterator<Item = (K, V)>) -> Vec<(String, Value)> {
    attrs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

// ============================================================================
// SQL tracing
// ============================================================================

/// A connection that emits `sqlscope::sql` debug events when enabled.
pub struct TracedConnection<'a> {
    inner: &'a dyn Connection,
    enabled: bool,
}

impl TracedConnection<'_> {
    fn trace<T>(&self, sql: &str, params: &[Value], run: impl FnOnce() -> Result<T>, rows: impl Fn(&T) -> u64) -> Result<T> {
        if !self.enabled {
            return run();
        }
        let started = Instant::now();
        let result = run();
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        match &result {
            Ok(value) => tracing::debug!(
                target: "sqlscope::sql",
                sql,
                vars = ?params,
                elapsed_us,
                rows_affected = rows(value),
                "statement"
            ),
            Err(err) => tracing::debug!(
                target: "sqlscope::sql",
                sql,
                vars = ?params,
                elapsed_us,
                error = %err,
                "statement failed"
            ),
        }
        result
    }
}

impl Connection for TracedConnection<'_> {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.trace(sql, params, || self.inner.execute(sql, params), |n| *n)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.trace(sql, params, || self.inner.insert(sql, params), |_| 1)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.trace(sql, params, || self.inner.query(sql, params), |rows| rows.len() as u64)
    }

    fn supports_transactions(&self) -> bool {
        self.inner.supports_transactions()
    }

    fn begin(&self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }
}
