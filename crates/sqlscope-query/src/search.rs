//! The condition-set builder.
//!
//! A [`Search`] accumulates typed clause fragments. Every builder method takes
//! and returns `Self`, and `Clone` deep-copies every list, so a derived search
//! never shares state with the one it came from.
//!
//! # Example
//!
//! ```ignore
//! let search = Search::new()
//!     .filter("name = ?", args!["jinzhu"])
//!     .or("role = ?", args!["admin"])
//!     .order("age desc")
//!     .limit(10);
//!
//! let (sql, vars) = search.render(&ctx)?;
//! ```

use sqlscope_core::{FieldDescriptor, Value};

use crate::fragment::{Arg, Condition, Fragment, SqlExpr};

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    /// Column name or `column direction` text. Plain identifiers are quoted.
    Column(String),
    /// Raw expression with bound arguments.
    Expr(SqlExpr),
}

impl From<&str> for Order {
    fn from(column: &str) -> Self {
        Order::Column(column.to_string())
    }
}

impl From<String> for Order {
    fn from(column: String) -> Self {
        Order::Column(column)
    }
}

impl From<SqlExpr> for Order {
    fn from(expr: SqlExpr) -> Self {
        Order::Expr(expr)
    }
}

/// An eager-load request: a dotted relationship path plus conditions applied
/// to its last hop.
#[derive(Debug, Clone)]
pub struct Preload {
    pub path: String,
    pub conditions: Option<Box<Search>>,
}

/// Accumulated query clauses.
#[derive(Debug, Clone, Default)]
pub struct Search {
    pub(crate) wheres: Vec<Fragment>,
    pub(crate) ors: Vec<Fragment>,
    pub(crate) nots: Vec<Fragment>,
    pub(crate) havings: Vec<Fragment>,
    pub(crate) joins: Vec<Fragment>,
    pub(crate) selects: Vec<Fragment>,
    pub(crate) omits: Vec<String>,
    pub(crate) orders: Vec<Order>,
    pub(crate) group: Option<String>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) init_attrs: Vec<(String, Value)>,
    pub(crate) assign_attrs: Vec<(String, Value)>,
    pub(crate) preloads: Vec<Preload>,
    pub(crate) table: Option<String>,
    pub(crate) raw: Option<Fragment>,
    pub(crate) unscoped: bool,
    pub(crate) counting: bool,
}

impl Search {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    /// Add an AND condition.
    pub fn filter(mut self, condition: impl Into<Condition>, args: Vec<Arg>) -> Self {
        self.wheres.push(Fragment::new(condition, args));
        self
    }

    /// Add an OR condition.
    pub fn or(mut self, condition: impl Into<Condition>, args: Vec<Arg>) -> Self {
        self.ors.push(Fragment::new(condition, args));
        self
    }

    /// Add a negated condition, combined with AND.
    pub fn not(mut self, condition: impl Into<Condition>, args: Vec<Arg>) -> Self {
        self.nots.push(Fragment::new(condition, args));
        self
    }

    pub fn having(mut self, condition: impl Into<Condition>, args: Vec<Arg>) -> Self {
        self.havings.push(Fragment::new(condition, args));
        self
    }

    /// Add a JOIN clause, e.g. `"LEFT JOIN emails ON emails.user_id = users.id"`.
    pub fn joins(mut self, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        self.joins.push(Fragment::new(sql.into(), args));
        self
    }

    // ========================================================================
    // Projection and ordering
    // ========================================================================

    /// Select columns or expressions instead of `*`.
    pub fn select(mut self, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        self.selects.push(Fragment::new(sql.into(), args));
        self
    }

    /// Replace every earlier select.
    pub fn reselect(mut self, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        self.selects.clear();
        self.selects.push(Fragment::new(sql.into(), args));
        self
    }

    /// Exclude columns from inserts and updates.
    pub fn omit(mut self, columns: &[&str]) -> Self {
        self.omits.extend(columns.iter().map(|c| (*c).to_string()));
        self
    }

    pub fn order(mut self, order: impl Into<Order>) -> Self {
        self.orders.push(order.into());
        self
    }

    /// Replace every earlier order with `order`.
    pub fn reorder(mut self, order: impl Into<Order>) -> Self {
        self.orders.clear();
        self.orders.push(order.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Drop limit and offset, as count queries do.
    #[must_use]
    pub const fn clear_limit_and_offset(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self
    }

    // ========================================================================
    // Preload
    // ========================================================================

    /// Eager-load a relationship path. Preloading the same path again
    /// replaces the earlier request.
    pub fn preload(self, path: impl Into<String>) -> Self {
        self.push_preload(path.into(), None)
    }

    /// Eager-load with conditions applied to the last hop of `path`.
    pub fn preload_with(self, path: impl Into<String>, conditions: Search) -> Self {
        self.push_preload(path.into(), Some(Box::new(conditions)))
    }

    fn push_preload(mut self, path: String, conditions: Option<Box<Search>>) -> Self {
        self.preloads.retain(|p| p.path != path);
        self.preloads.push(Preload { path, conditions });
        self
    }

    // ========================================================================
    // Flags and overrides
    // ========================================================================

    /// Query a table other than the model's. A name containing a space
    /// (`"users u"`) is used verbatim.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Use `sql` verbatim as the whole statement.
    pub fn raw(mut self, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        self.raw = Some(Fragment::new(sql.into(), args));
        self
    }

    /// Skip the soft-delete scoping; the record's own primary key still applies.
    #[must_use]
    pub const fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Mark as a count query: ORDER BY is suppressed.
    #[must_use]
    pub const fn counting(mut self) -> Self {
        self.counting = true;
        self
    }

    /// Attributes used to initialize a record that was not found.
    pub fn attrs(mut self, attrs: Vec<(String, Value)>) -> Self {
        self.init_attrs.extend(attrs);
        self
    }

    /// Attributes assigned to the record whether it was found or not.
    pub fn assign(mut self, attrs: Vec<(String, Value)>) -> Self {
        self.assign_attrs.extend(attrs);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn wheres(&self) -> &[Fragment] {
        &self.wheres
    }

    pub fn ors(&self) -> &[Fragment] {
        &self.ors
    }

    pub fn nots(&self) -> &[Fragment] {
        &self.nots
    }

    pub fn selects(&self) -> &[Fragment] {
        &self.selects
    }

    pub fn omits(&self) -> &[String] {
        &self.omits
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn preloads(&self) -> &[Preload] {
        &self.preloads
    }

    /// Take the preload requests out, leaving none behind.
    pub fn take_preloads(&mut self) -> Vec<Preload> {
        std::mem::take(&mut self.preloads)
    }

    pub fn init_attrs(&self) -> &[(String, Value)] {
        &self.init_attrs
    }

    pub fn assign_attrs(&self) -> &[(String, Value)] {
        &self.assign_attrs
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }

    pub fn is_raw(&self) -> bool {
        self.raw.is_some()
    }

    pub fn is_counting(&self) -> bool {
        self.counting
    }

    pub fn has_conditions(&self) -> bool {
        !(self.wheres.is_empty() && self.ors.is_empty() && self.nots.is_empty())
    }

    /// Column names named by `select` clauses.
    pub fn select_columns(&self) -> Vec<&str> {
        self.selects
            .iter()
            .filter_map(Fragment::sql)
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Whether `field` may be written: a selected field when any select is
    /// present, otherwise any field not omitted.
    pub fn changeable(&self, field: &FieldDescriptor) -> bool {
        let named = |name: &str| name == field.name || name == field.db_name;
        let selected = self.select_columns();
        if !selected.is_empty() {
            return selected.into_iter().any(named);
        }
        !self.omits.iter().any(|o| named(o))
    }

    /// Fold another search's conditions, orders and limits into this one.
    pub fn merge(mut self, other: Search) -> Self {
        self.wheres.extend(other.wheres);
        self.ors.extend(other.ors);
        self.nots.extend(other.nots);
        self.havings.extend(other.havings);
        self.joins.extend(other.joins);
        self.selects.extend(other.selects);
        self.omits.extend(other.omits);
        self.orders.extend(other.orders);
        if other.group.is_some() {
            self.group = other.group;
        }
        if other.limit.is_some() {
            self.limit = other.limit;
        }
        if other.offset.is_some() {
            self.offset = other.offset;
        }
        self.unscoped |= other.unscoped;
        self
    }
}
