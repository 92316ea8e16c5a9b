//! Per-operation execution context.
//!
//! A [`Scope`] binds one target value, a private [`Search`] and two settings
//! maps to one run of a callback pipeline. Hooks receive `&mut Scope`: they
//! read and write record fields through the model descriptor, extend the
//! search, render and execute SQL, and open nested scopes for related
//! records.
//!
//! Hooks never unwind. Failures are pushed with [`Scope::err`], and later
//! hooks check [`Scope::has_error`] before doing anything with side effects.
//! When the pipeline finishes, the collected errors fold into the operation's
//! result.
//!
//! # States
//!
//! `Built` → `Executing(kind)` → `Completed`. A scope normally runs one
//! pipeline; running another on the same scope keeps its accumulated errors.

use std::fmt;
use std::sync::Arc;

use sqlscope_core::{
    BoundFields, Connection, Dialect, DynModel, Error, Errors, Hook, Model, ModelDescriptor,
    ModelRegistry, ModelType, Result, Row, Value, downcast, set_field,
};
use sqlscope_query::{RenderContext, Search, args};

use crate::association;
use crate::callbacks::CallbackKind;
use crate::db::Db;
use crate::settings::{ORDER_BY_PRIMARY_KEY, STARTED_TRANSACTION, Settings, UPDATE_ATTRS};

// ============================================================================
// Scope value
// ============================================================================

/// The records an operation works on.
#[derive(Debug, Clone)]
pub enum ScopeValue {
    /// No target, e.g. raw statements.
    Empty,
    /// A single record.
    One(Box<dyn DynModel>),
    /// A collection of records of one type.
    Many {
        model: ModelType,
        records: Vec<Box<dyn DynModel>>,
    },
}

impl ScopeValue {
    pub fn one<M: Model>(record: M) -> Self {
        ScopeValue::One(Box::new(record))
    }

    /// An empty collection of `M`, to be filled by a query.
    pub fn many<M: Model>() -> Self {
        ScopeValue::Many {
            model: ModelType::of::<M>(),
            records: Vec::new(),
        }
    }

    pub fn model_type(&self) -> Option<ModelType> {
        match self {
            ScopeValue::Empty => None,
            ScopeValue::One(record) => Some(record.model_type()),
            ScopeValue::Many { model, .. } => Some(*model),
        }
    }

    /// The single record, for [`ScopeValue::One`].
    pub fn record(&self) -> Option<&dyn DynModel> {
        match self {
            ScopeValue::One(record) => Some(record.as_ref()),
            _ => None,
        }
    }

    pub fn records(&self) -> &[Box<dyn DynModel>] {
        match self {
            ScopeValue::Empty => &[],
            ScopeValue::One(record) => std::slice::from_ref(record),
            ScopeValue::Many { records, .. } => records,
        }
    }

    pub fn records_mut(&mut self) -> &mut [Box<dyn DynModel>] {
        match self {
            ScopeValue::Empty => &mut [],
            ScopeValue::One(record) => std::slice::from_mut(record),
            ScopeValue::Many { records, .. } => records,
        }
    }

    pub fn into_records(self) -> Vec<Box<dyn DynModel>> {
        match self {
            ScopeValue::Empty => Vec::new(),
            ScopeValue::One(record) => vec![record],
            ScopeValue::Many { records, .. } => records,
        }
    }

    /// Recover a single typed record.
    pub fn into_one<M: Model>(self) -> Result<M> {
        match self {
            ScopeValue::One(record) => downcast(record),
            ScopeValue::Many { records, .. } => records
                .into_iter()
                .next()
                .map_or(Err(Error::RecordNotFound), downcast),
            ScopeValue::Empty => Err(Error::RecordNotFound),
        }
    }

    /// Recover typed records.
    pub fn into_many<M: Model>(self) -> Result<Vec<M>> {
        self.into_records().into_iter().map(downcast).collect()
    }
}

/// Lifecycle of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Built,
    Executing(CallbackKind),
    Completed,
}

// ============================================================================
// Scope
// ============================================================================

/// Execution context of one operation.
pub struct Scope {
    db: Db,
    search: Search,
    value: ScopeValue,
    descriptor: Option<Arc<ModelDescriptor>>,
    settings: Settings,
    instance: Settings,
    errors: Errors,
    skip_left: bool,
    sql: String,
    vars: Vec<Value>,
    rows: Vec<Row>,
    rows_affected: u64,
    state: ScopeState,
}

impl Scope {
    /// A scope over `value` with a clone of the handle's search and settings.
    pub(crate) fn new(db: &Db, value: ScopeValue) -> Self {
        let descriptor = value
            .model_type()
            .map(|model| db.registry().describe_type(model));
        Self {
            search: db.search().clone(),
            settings: db.settings().clone(),
            db: db.detached(),
            value,
            descriptor,
            instance: Settings::new(),
            errors: Errors::default(),
            skip_left: false,
            sql: String::new(),
            vars: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            state: ScopeState::Built,
        }
    }

    /// A nested scope for hooks: same connection and transaction, a fresh
    /// search, this scope's operation-wide settings and no instance settings.
    pub fn new_scope(&self, value: ScopeValue) -> Scope {
        let mut nested = Scope::new(&self.db, value);
        nested.settings = self.settings.clone();
        nested
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut Search {
        &mut self.search
    }

    /// Replace the search through a builder chain.
    pub fn with_search(&mut self, build: impl FnOnce(Search) -> Search) -> &mut Self {
        let search = std::mem::take(&mut self.search);
        self.search = build(search);
        self
    }

    pub fn value(&self) -> &ScopeValue {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut ScopeValue {
        &mut self.value
    }

    pub fn into_value(self) -> ScopeValue {
        self.value
    }

    /// Descriptor of the target type, when the scope has one.
    pub fn descriptor(&self) -> Option<&Arc<ModelDescriptor>> {
        self.descriptor.as_ref()
    }

    /// Descriptor of the target type, or an error for scopes without a model.
    pub fn model(&self) -> Result<Arc<ModelDescriptor>> {
        self.descriptor
            .clone()
            .ok_or_else(|| Error::custom("scope has no model to operate on"))
    }

    pub fn type_name(&self) -> &'static str {
        self.descriptor
            .as_ref()
            .map_or("<none>", |d| d.type_name())
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn vars(&self) -> &[Value] {
        &self.vars
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    pub fn set_rows_affected(&mut self, rows: u64) {
        self.rows_affected = rows;
    }

    /// Records and the handle, borrowed together.
    pub fn split_records(&mut self) -> (&Db, &mut [Box<dyn DynModel>]) {
        (&self.db, self.value.records_mut())
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Record an error on the scope.
    pub fn err(&mut self, err: Error) -> &mut Self {
        tracing::debug!(model = self.type_name(), error = %err, "scope error");
        self.errors.push(err);
        self
    }

    /// Unwrap `result`, recording its error.
    pub fn check<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.err(err);
                None
            }
        }
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    /// Everything collected so far, folded into one error.
    pub fn error(&self) -> Option<Error> {
        self.errors.clone().into_error()
    }

    fn result(&self) -> Result<()> {
        self.error().map_or(Ok(()), Err)
    }

    /// Stop the running pipeline after the current hook.
    pub fn skip_left(&mut self) {
        self.skip_left = true;
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Set an operation-wide setting, visible to nested scopes.
    pub fn set<T: std::any::Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        self.settings.set(key, value);
        self
    }

    pub fn get<T: std::any::Any>(&self, key: &str) -> Option<&T> {
        self.settings.get(key)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Set a setting for this scope only.
    pub fn instance_set<T: std::any::Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> &mut Self {
        self.instance.set(key, value);
        self
    }

    pub fn instance_get<T: std::any::Any>(&self, key: &str) -> Option<&T> {
        self.instance.get(key)
    }

    pub fn instance_settings(&self) -> &Settings {
        &self.instance
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Read-only field view of the single target record.
    pub fn fields(&self) -> Option<BoundFields<'_>> {
        let descriptor = self.descriptor.as_deref()?;
        let record = self.value.record()?;
        Some(BoundFields::new(descriptor, record))
    }

    /// Whether the single target record has no primary key value.
    pub fn primary_key_zero(&self) -> bool {
        self.fields().is_none_or(|f| f.primary_key_blank())
    }

    /// Write a field on every target record, addressed by logical or column
    /// name. When an update is collecting its column list, the write joins it.
    pub fn set_column(&mut self, name: &str, value: Value) -> Result<()> {
        let descriptor = self.model()?;
        let field = descriptor
            .field(name)
            .ok_or_else(|| Error::unknown_field(descriptor.type_name(), name))?;
        for record in self.value.records_mut() {
            set_field(&descriptor, record.as_mut(), &field.name, value.clone())?;
        }
        if let Some(attrs) = self.instance.get::<Vec<(String, Value)>>(UPDATE_ATTRS) {
            let mut attrs = attrs.clone();
            match attrs.iter_mut().find(|(column, _)| *column == field.db_name) {
                Some(entry) => entry.1 = value,
                None => attrs.push((field.db_name.clone(), value)),
            }
            self.instance.set(UPDATE_ATTRS, attrs);
        }
        Ok(())
    }

    /// Run record hooks on every target record, stopping a record at its
    /// first failure.
    pub fn call_hooks(&mut self, hooks: &[Hook]) {
        let mut failures = Vec::new();
        for record in self.value.records_mut() {
            for hook in hooks {
                if let Err(err) = record.run_hook(*hook) {
                    failures.push(err);
                    break;
                }
            }
        }
        for err in failures {
            self.err(err);
        }
    }

    // ========================================================================
    // SQL
    // ========================================================================

    pub fn quote(&self, ident: &str) -> String {
        self.db.dialect().quote(ident)
    }

    /// Quoted table of the statement: the search's override or the model's.
    pub fn quoted_table(&self) -> String {
        self.search.quoted_table(self).unwrap_or_default()
    }

    pub fn table_name(&self) -> String {
        match (self.search.table_name(), &self.descriptor) {
            (Some(table), _) => table.to_string(),
            (None, Some(descriptor)) => descriptor.table_name().to_string(),
            (None, None) => String::new(),
        }
    }

    /// The `WHERE ...` clause for this scope, appending bound values to `vars`.
    pub fn where_sql(&self, vars: &mut Vec<Value>) -> Result<String> {
        self.search.where_sql(self, vars)
    }

    /// Set the statement the next [`Scope::exec`] runs.
    pub fn set_sql(&mut self, sql: impl Into<String>, vars: Vec<Value>) -> &mut Self {
        self.sql = sql.into();
        self.vars = vars;
        self
    }

    /// Execute the prepared statement, recording rows affected or the error.
    pub fn exec(&mut self) -> Option<u64> {
        if self.has_error() || self.sql.is_empty() {
            return None;
        }
        let result = self.db.conn().execute(&self.sql, &self.vars);
        let rows = self.check(result)?;
        self.rows_affected = rows;
        Some(rows)
    }

    /// Execute the prepared statement as an INSERT, returning the new row id.
    pub fn exec_insert(&mut self) -> Option<i64> {
        if self.has_error() || self.sql.is_empty() {
            return None;
        }
        let result = self.db.conn().insert(&self.sql, &self.vars);
        let id = self.check(result)?;
        self.rows_affected = 1;
        Some(id)
    }

    /// Run the prepared statement as a query.
    pub fn query_prepared(&mut self) -> Option<Vec<Row>> {
        if self.has_error() || self.sql.is_empty() {
            return None;
        }
        let result = self.db.conn().query(&self.sql, &self.vars);
        let rows = self.check(result)?;
        self.rows_affected = rows.len() as u64;
        Some(rows)
    }

    /// Store rows produced by the row-query pipeline.
    pub fn set_rows(&mut self, rows: Vec<Row>) {
        self.rows = rows;
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction unless one is already running on this handle.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn begin(&mut self) -> &mut Self {
        if self.db.in_transaction() || !self.db.connection().supports_transactions() {
            return self;
        }
        tracing::info!("Beginning transaction");
        match self.db.connection().begin() {
            Ok(()) => {
                self.db.set_in_transaction(true);
                self.instance_set(STARTED_TRANSACTION, true);
            }
            Err(err) => tracing::warn!(error = %err, "could not begin transaction"),
        }
        self
    }

    /// Commit or roll back the transaction this scope began.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit_or_rollback(&mut self) -> &mut Self {
        if !self.instance.remove(STARTED_TRANSACTION) {
            return self;
        }
        if self.has_error() {
            tracing::info!("Rolling back transaction");
            if let Err(err) = self.db.connection().rollback() {
                self.err(err);
            }
        } else {
            tracing::info!("Committing transaction");
            if let Err(err) = self.db.connection().commit() {
                self.err(err);
            }
        }
        self.db.set_in_transaction(false);
        self
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Walk the finalized pipeline of `kind`.
    fn run(&mut self, kind: CallbackKind) -> Result<()> {
        self.state = ScopeState::Executing(kind);
        for hook in self.db.hooks(kind) {
            hook(self);
            if self.skip_left {
                break;
            }
        }
        self.skip_left = false;
        if self.instance.contains(STARTED_TRANSACTION) {
            self.commit_or_rollback();
        }
        self.state = ScopeState::Completed;
        self.result()
    }

    fn require_model(&self) -> Result<()> {
        self.model().map(|_| ())
    }

    /// Load every matching record into the target.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn find(&mut self) -> Result<()> {
        self.require_model()?;
        self.run(CallbackKind::Query)
    }

    /// Load the first record ordered by primary key.
    pub fn first(&mut self) -> Result<()> {
        self.with_search(|s| s.limit(1));
        self.instance_set(ORDER_BY_PRIMARY_KEY, "ASC".to_string());
        self.find()
    }

    /// Load the last record ordered by primary key.
    pub fn last(&mut self) -> Result<()> {
        self.with_search(|s| s.limit(1));
        self.instance_set(ORDER_BY_PRIMARY_KEY, "DESC".to_string());
        self.find()
    }

    /// Load one record in database order.
    pub fn take(&mut self) -> Result<()> {
        self.with_search(|s| s.limit(1));
        self.find()
    }

    /// Insert the single target record.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn create(&mut self) -> Result<()> {
        self.require_model()?;
        if !matches!(self.value, ScopeValue::One(_)) {
            return Err(Error::custom("create expects a single record"));
        }
        self.run(CallbackKind::Create)
    }

    /// Update the target, scoped to its primary key when it has one.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn update(&mut self) -> Result<()> {
        self.require_model()?;
        self.run(CallbackKind::Update)
    }

    /// Delete (or soft-delete) the target, scoped to its primary key when it
    /// has one.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete(&mut self) -> Result<()> {
        self.require_model()?;
        self.run(CallbackKind::Delete)
    }

    /// Create the record when its primary key is blank, update it otherwise.
    pub fn save(&mut self) -> Result<()> {
        if self.primary_key_zero() {
            self.create()
        } else {
            self.update()
        }
    }

    /// Rows of the row-query pipeline.
    pub fn query_rows(&mut self) -> Result<Vec<Row>> {
        self.run(CallbackKind::RowQuery)?;
        Ok(std::mem::take(&mut self.rows))
    }

    /// `count(*)` of the matching rows.
    pub fn count(&mut self) -> Result<i64> {
        let counting = self
            .search
            .select_columns()
            .first()
            .is_some_and(|s| s.to_ascii_lowercase().starts_with("count("));
        if !counting {
            self.with_search(|s| s.reselect("count(*)", args![]));
        }
        self.with_search(Search::counting);
        let rows = self.query_rows()?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    /// First column of every matching row.
    pub fn pluck(&mut self, column: &str) -> Result<Vec<Value>> {
        let column = column.to_string();
        self.with_search(|s| s.reselect(column, args![]));
        let rows = self.query_rows()?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_values().into_iter().next())
            .collect())
    }

    /// Records of type `target` related to the single target record through
    /// the relationship on `field`.
    pub fn related(&mut self, target: ModelType, field: &str) -> Result<Vec<Box<dyn DynModel>>> {
        let descriptor = self.model()?;
        let owner = self
            .value
            .record()
            .ok_or_else(|| Error::custom("related expects a single owner record"))?;
        let relationship = association::relationship_of(&descriptor, field)?;
        if relationship.target != target {
            return Err(Error::Conversion {
                expected: target.name(),
                actual: relationship.target.name().to_string(),
            });
        }
        let search = association::related_search(self.db(), relationship, owner)?
            .merge(self.search.clone());
        let mut nested = self.new_scope(ScopeValue::Many {
            model: target,
            records: Vec::new(),
        });
        nested.search = search;
        nested.find()?;
        Ok(nested.into_value().into_records())
    }
}

impl RenderContext for Scope {
    fn dialect(&self) -> &dyn Dialect {
        self.db.dialect()
    }

    fn registry(&self) -> &ModelRegistry {
        self.db.registry()
    }

    fn descriptor(&self) -> Option<&ModelDescriptor> {
        self.descriptor.as_deref()
    }

    fn record(&self) -> Option<&dyn DynModel> {
        self.value.record()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("model", &self.type_name())
            .field("state", &self.state)
            .field("records", &self.value.records().len())
            .field("settings", &self.settings)
            .field("instance", &self.instance)
            .field("errors", &self.errors)
            .field("sql", &self.sql)
            .finish_non_exhaustive()
    }
}

/// Write a result row onto `record`. Columns with no matching field are
/// ignored; with duplicate column names the first occurrence wins.
pub fn scan_into(descriptor: &ModelDescriptor, row: &Row, record: &mut dyn DynModel) -> Result<()> {
    for field in descriptor.normal_fields() {
        if let Some(value) = row.get_named(&field.db_name) {
            record.write(&field.name, value.clone())?;
        }
    }
    Ok(())
}

/// Build a fresh record of the descriptor's type from a result row.
pub fn scan_record(descriptor: &ModelDescriptor, row: &Row) -> Result<Box<dyn DynModel>> {
    let mut record = descriptor.model_type().new_record();
    scan_into(descriptor, row, record.as_mut())?;
    Ok(record)
}
