//! SQL rendering for [`Search`].
//!
//! Rendering is the injection boundary: every value is pushed onto the
//! positional variable list and replaced by a dialect placeholder. Values are
//! never written into SQL text.
//!
//! Clause emission order is fixed: joins, where, group, having, order,
//! limit/offset. Counting searches drop ORDER BY.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use sqlscope_core::{
    BoundFields, Dialect, DynModel, Error, ModelDescriptor, ModelRegistry, Result,
    SOFT_DELETE_COLUMN, Value, quote_path,
};

use crate::fragment::{Arg, Condition, Fragment, SqlExpr};
use crate::search::{Order, Search};

// ============================================================================
// Context
// ============================================================================

/// What rendering needs to know about the statement's target.
pub trait RenderContext {
    fn dialect(&self) -> &dyn Dialect;

    /// Registry used to describe record conditions.
    fn registry(&self) -> &ModelRegistry;

    /// Descriptor of the target type, when there is one.
    fn descriptor(&self) -> Option<&ModelDescriptor>;

    /// Single target record. A non-blank primary key on it scopes the
    /// statement to that row.
    fn record(&self) -> Option<&dyn DynModel>;
}

/// A [`RenderContext`] over borrowed parts.
#[derive(Clone, Copy)]
pub struct TableContext<'a> {
    pub dialect: &'a dyn Dialect,
    pub registry: &'a ModelRegistry,
    pub descriptor: Option<&'a ModelDescriptor>,
    pub record: Option<&'a dyn DynModel>,
}

impl<'a> TableContext<'a> {
    pub fn new(dialect: &'a dyn Dialect, registry: &'a ModelRegistry) -> Self {
        Self {
            dialect,
            registry,
            descriptor: None,
            record: None,
        }
    }

    #[must_use]
    pub fn with_descriptor(mut self, descriptor: &'a ModelDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    #[must_use]
    pub fn with_record(mut self, record: &'a dyn DynModel) -> Self {
        self.record = Some(record);
        self
    }
}

impl RenderContext for TableContext<'_> {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect
    }

    fn registry(&self) -> &ModelRegistry {
        self.registry
    }

    fn descriptor(&self) -> Option<&ModelDescriptor> {
        self.descriptor
    }

    fn record(&self) -> Option<&dyn DynModel> {
        self.record
    }
}

// ============================================================================
// Binding helpers
// ============================================================================

fn number_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+\s*$").ok()).as_ref()
}

fn operator_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i) (=|<>|>|<|LIKE|IS|IN) ").ok())
        .as_ref()
}

fn column_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z\d_]+(\.[a-zA-Z\d_]+)*$").ok())
        .as_ref()
}

fn is_number(text: &str) -> bool {
    number_regex().is_some_and(|re| re.is_match(text))
}

fn has_operator(text: &str) -> bool {
    operator_regex().is_some_and(|re| re.is_match(text))
}

/// Quote `text` when it is a plain (optionally qualified) identifier.
pub fn quote_if_possible(dialect: &dyn Dialect, text: &str) -> String {
    if column_regex().is_some_and(|re| re.is_match(text)) {
        quote_path(dialect, text)
    } else {
        text.to_string()
    }
}

/// Quote a table name. Names containing a space are aliases and stay verbatim.
pub fn quote_table(dialect: &dyn Dialect, name: &str) -> String {
    if name.contains(' ') {
        name.to_string()
    } else {
        quote_path(dialect, name)
    }
}

/// Push `value` and return its placeholder.
pub fn bind_value(dialect: &dyn Dialect, value: Value, vars: &mut Vec<Value>) -> String {
    vars.push(value);
    dialect.bind_var(vars.len())
}

/// Inline an expression, binding its arguments.
pub fn bind_expr(dialect: &dyn Dialect, expr: &SqlExpr, vars: &mut Vec<Value>) -> Result<String> {
    let args: Vec<Arg> = expr.args.iter().cloned().map(Arg::Value).collect();
    substitute(dialect, &expr.sql, &args, vars)
}

/// Bind one argument, returning the SQL that replaces its placeholder.
pub fn bind_arg(dialect: &dyn Dialect, arg: &Arg, vars: &mut Vec<Value>) -> Result<String> {
    Ok(match arg {
        Arg::Value(value) => bind_value(dialect, value.clone(), vars),
        Arg::List(values) if values.is_empty() => "NULL".to_string(),
        Arg::List(values) => values
            .iter()
            .map(|v| bind_value(dialect, v.clone(), vars))
            .collect::<Vec<_>>()
            .join(","),
        Arg::Expr(expr) => bind_expr(dialect, expr, vars)?,
    })
}

/// Replace each `?` in `template` with the next argument, left to right.
///
/// The placeholder count must equal the argument count.
pub fn substitute(
    dialect: &dyn Dialect,
    template: &str,
    args: &[Arg],
    vars: &mut Vec<Value>,
) -> Result<String> {
    let placeholders = template.matches('?').count();
    if placeholders != args.len() {
        tracing::debug!(
            template,
            placeholders,
            args = args.len(),
            "placeholder count does not match arguments"
        );
        return Err(Error::PlaceholderMismatch {
            placeholders,
            args: args.len(),
        });
    }
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    for (i, piece) in template.split('?').enumerate() {
        if i > 0 {
            if let Some(arg) = args.next() {
                out.push_str(&bind_arg(dialect, arg, vars)?);
            }
        }
        out.push_str(piece);
    }
    Ok(out)
}

/// `count` comma-joined `?` placeholders, for building templates.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

// ============================================================================
// Renderer
// ============================================================================

struct Renderer<'a> {
    search: &'a Search,
    ctx: &'a dyn RenderContext,
    table: String,
    primary_key: String,
}

impl<'a> Renderer<'a> {
    fn new(search: &'a Search, ctx: &'a dyn RenderContext) -> Self {
        let primary_key = ctx
            .descriptor()
            .and_then(ModelDescriptor::primary_field)
            .map_or_else(|| "id".to_string(), |f| f.db_name.clone());
        Self {
            search,
            ctx,
            table: search.quoted_table(ctx).unwrap_or_default(),
            primary_key,
        }
    }

    fn dialect(&self) -> &dyn Dialect {
        self.ctx.dialect()
    }

    fn quoted_pk(&self) -> String {
        quote_path(self.dialect(), &self.primary_key)
    }

    fn record_descriptor(&self, record: &dyn DynModel) -> Arc<ModelDescriptor> {
        self.ctx.registry().describe_type(record.model_type())
    }

    /// Non-blank, non-ignored columns of `record` as `(quoted table, column, value)`.
    fn record_columns(&self, record: &dyn DynModel) -> (String, Vec<(String, Value)>) {
        let descriptor = self.record_descriptor(record);
        let table = quote_path(self.dialect(), descriptor.table_name());
        let bound = BoundFields::new(&descriptor, record);
        let columns = bound
            .normal()
            .filter(|f| !f.is_blank())
            .map(|f| (f.field.db_name.clone(), f.value))
            .collect();
        (table, columns)
    }

    fn where_condition(&self, fragment: &Fragment, vars: &mut Vec<Value>) -> Result<String> {
        let dialect = self.dialect();
        match &fragment.condition {
            Condition::PrimaryKey(value) => Ok(format!(
                "({}.{} = {})",
                self.table,
                self.quoted_pk(),
                bind_value(dialect, value.clone(), vars)
            )),
            Condition::PrimaryKeys(keys) => Ok(format!(
                "({}.{} IN ({}))",
                self.table,
                self.quoted_pk(),
                bind_arg(dialect, &Arg::List(keys.clone()), vars)?
            )),
            Condition::Map(pairs) => Ok(pairs
                .iter()
                .map(|(column, value)| {
                    let column = quote_path(dialect, column);
                    if value.is_null() {
                        format!("({}.{column} IS NULL)", self.table)
                    } else {
                        format!(
                            "({}.{column} = {})",
                            self.table,
                            bind_value(dialect, value.clone(), vars)
                        )
                    }
                })
                .collect::<Vec<_>>()
                .join(" AND ")),
            Condition::Record(record) => {
                let (table, columns) = self.record_columns(record.as_ref());
                Ok(columns
                    .into_iter()
                    .map(|(column, value)| {
                        format!(
                            "({table}.{} = {})",
                            quote_path(dialect, &column),
                            bind_value(dialect, value, vars)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND "))
            }
            Condition::Sql(sql) if is_number(sql) => {
                let key = sql.trim().parse::<i64>().map_or_else(
                    |_| Value::Text(sql.trim().to_string()),
                    Value::BigInt,
                );
                Ok(format!(
                    "({}.{} = {})",
                    self.table,
                    self.quoted_pk(),
                    bind_value(dialect, key, vars)
                ))
            }
            Condition::Sql(sql) if sql.trim().is_empty() => Ok(String::new()),
            Condition::Sql(sql) => Ok(format!(
                "({})",
                substitute(dialect, sql, &fragment.args, vars)?
            )),
        }
    }

    fn not_condition(&self, fragment: &Fragment, vars: &mut Vec<Value>) -> Result<String> {
        let dialect = self.dialect();
        match &fragment.condition {
            Condition::PrimaryKey(value) => Ok(format!(
                "({}.{} <> {})",
                self.table,
                self.quoted_pk(),
                bind_value(dialect, value.clone(), vars)
            )),
            Condition::PrimaryKeys(keys) if keys.is_empty() => Ok(String::new()),
            Condition::PrimaryKeys(keys) => Ok(format!(
                "({}.{} NOT IN ({}))",
                self.table,
                self.quoted_pk(),
                bind_arg(dialect, &Arg::List(keys.clone()), vars)?
            )),
            Condition::Map(pairs) => Ok(pairs
                .iter()
                .map(|(column, value)| {
                    let column = quote_path(dialect, column);
                    if value.is_null() {
                        format!("({}.{column} IS NOT NULL)", self.table)
                    } else {
                        format!(
                            "({}.{column} <> {})",
                            self.table,
                            bind_value(dialect, value.clone(), vars)
                        )
                    }
                })
                .collect::<Vec<_>>()
                .join(" AND ")),
            Condition::Record(record) => {
                let (table, columns) = self.record_columns(record.as_ref());
                Ok(columns
                    .into_iter()
                    .map(|(column, value)| {
                        format!(
                            "({table}.{} <> {})",
                            quote_path(dialect, &column),
                            bind_value(dialect, value, vars)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND "))
            }
            Condition::Sql(sql) if is_number(sql) => {
                let key = sql.trim().parse::<i64>().map_or_else(
                    |_| Value::Text(sql.trim().to_string()),
                    Value::BigInt,
                );
                Ok(format!(
                    "({}.{} <> {})",
                    self.table,
                    self.quoted_pk(),
                    bind_value(dialect, key, vars)
                ))
            }
            Condition::Sql(sql) if sql.trim().is_empty() => Ok(String::new()),
            Condition::Sql(sql) if has_operator(sql) => Ok(format!(
                "NOT ({})",
                substitute(dialect, sql, &fragment.args, vars)?
            )),
            Condition::Sql(column) => {
                let column = quote_path(dialect, column.trim());
                match fragment.args.as_slice() {
                    [Arg::List(values)] => Ok(format!(
                        "({}.{column} NOT IN ({}))",
                        self.table,
                        bind_arg(dialect, &Arg::List(values.clone()), vars)?
                    )),
                    [arg] => Ok(format!(
                        "({}.{column} <> {})",
                        self.table,
                        bind_arg(dialect, arg, vars)?
                    )),
                    args => {
                        tracing::debug!(
                            column = %column,
                            args = args.len(),
                            "NOT on a column takes exactly one argument"
                        );
                        Err(Error::PlaceholderMismatch {
                            placeholders: 1,
                            args: args.len(),
                        })
                    }
                }
            }
        }
    }

    fn primary_conditions(&self, vars: &mut Vec<Value>) -> Vec<String> {
        let mut conditions = Vec::new();
        let Some(descriptor) = self.ctx.descriptor() else {
            return conditions;
        };
        if descriptor.has_column(SOFT_DELETE_COLUMN) {
            if self.search.unscoped {
                tracing::trace!(table = %self.table, "unscoped: soft-deleted rows included");
            } else {
                conditions.push(format!(
                    "{}.{} IS NULL",
                    self.table,
                    self.dialect().quote(SOFT_DELETE_COLUMN)
                ));
            }
        }
        if let Some(record) = self.ctx.record() {
            if record.model_type() == descriptor.model_type() {
                let bound = BoundFields::new(descriptor, record);
                if !bound.primary_key_blank() {
                    for (field, value) in descriptor.primary_fields().zip(bound.primary_values()) {
                        conditions.push(format!(
                            "{}.{} = {}",
                            self.table,
                            quote_path(self.dialect(), &field.db_name),
                            bind_value(self.dialect(), value, vars)
                        ));
                    }
                }
            }
        }
        conditions
    }

    fn where_sql(&self, vars: &mut Vec<Value>) -> Result<String> {
        let primary = self.primary_conditions(vars);

        let mut ands = Vec::new();
        for fragment in &self.search.wheres {
            let sql = self.where_condition(fragment, vars)?;
            if !sql.is_empty() {
                ands.push(sql);
            }
        }
        let mut ors = Vec::new();
        for fragment in &self.search.ors {
            let sql = self.where_condition(fragment, vars)?;
            if !sql.is_empty() {
                ors.push(sql);
            }
        }
        for fragment in &self.search.nots {
            let sql = self.not_condition(fragment, vars)?;
            if !sql.is_empty() {
                ands.push(sql);
            }
        }

        let combined = match (ands.is_empty(), ors.is_empty()) {
            (true, true) => String::new(),
            (false, true) => ands.join(" AND "),
            (true, false) => ors.join(" OR "),
            (false, false) => format!("({}) OR ({})", ands.join(" AND "), ors.join(" OR ")),
        };

        Ok(match (primary.is_empty(), combined.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!("WHERE {combined}"),
            (false, true) => format!("WHERE {}", primary.join(" AND ")),
            (false, false) => format!("WHERE {} AND ({combined})", primary.join(" AND ")),
        })
    }

    fn joins_sql(&self, vars: &mut Vec<Value>) -> Result<String> {
        let mut joins = Vec::new();
        for fragment in &self.search.joins {
            if let Some(sql) = fragment.sql() {
                let sql = substitute(self.dialect(), sql, &fragment.args, vars)?;
                if !sql.trim().is_empty() {
                    joins.push(sql);
                }
            }
        }
        Ok(joins.join(" "))
    }

    fn having_sql(&self, vars: &mut Vec<Value>) -> Result<String> {
        let mut havings = Vec::new();
        for fragment in &self.search.havings {
            let sql = self.where_condition(fragment, vars)?;
            if !sql.is_empty() {
                havings.push(sql);
            }
        }
        Ok(if havings.is_empty() {
            String::new()
        } else {
            format!("HAVING {}", havings.join(" AND "))
        })
    }

    fn order_sql(&self, vars: &mut Vec<Value>) -> Result<String> {
        if self.search.orders.is_empty() || self.search.counting {
            return Ok(String::new());
        }
        let mut orders = Vec::with_capacity(self.search.orders.len());
        for order in &self.search.orders {
            orders.push(match order {
                Order::Column(column) => quote_if_possible(self.dialect(), column),
                Order::Expr(expr) => bind_expr(self.dialect(), expr, vars)?,
            });
        }
        Ok(format!("ORDER BY {}", orders.join(",")))
    }

    fn select_sql(&self, vars: &mut Vec<Value>) -> Result<String> {
        if self.search.selects.is_empty() {
            return Ok(if self.search.joins.is_empty() {
                "*".to_string()
            } else {
                format!("{}.*", self.table)
            });
        }
        let mut parts = Vec::with_capacity(self.search.selects.len());
        for fragment in &self.search.selects {
            if let Some(sql) = fragment.sql() {
                parts.push(substitute(self.dialect(), sql, &fragment.args, vars)?);
            }
        }
        Ok(parts.join(", "))
    }

    fn combined_sql(&self, vars: &mut Vec<Value>) -> Result<String> {
        let mut clauses = vec![self.joins_sql(vars)?, self.where_sql(vars)?];
        if let Some(group) = &self.search.group {
            clauses.push(format!("GROUP BY {group}"));
        }
        clauses.push(self.having_sql(vars)?);
        clauses.push(self.order_sql(vars)?);
        clauses.push(
            self.dialect()
                .limit_and_offset_sql(self.search.limit, self.search.offset),
        );
        Ok(clauses
            .into_iter()
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

// ============================================================================
// Search entry points
// ============================================================================

impl Search {
    /// Quoted table for the statement: the override, else the descriptor's.
    pub fn quoted_table(&self, ctx: &dyn RenderContext) -> Option<String> {
        match (&self.table, ctx.descriptor()) {
            (Some(table), _) => Some(quote_table(ctx.dialect(), table)),
            (None, Some(descriptor)) => Some(quote_path(ctx.dialect(), descriptor.table_name())),
            (None, None) => None,
        }
    }

    /// Render the condition clauses (joins through limit/offset).
    pub fn render(&self, ctx: &dyn RenderContext) -> Result<(String, Vec<Value>)> {
        let mut vars = Vec::new();
        let sql = self.render_into(ctx, &mut vars)?;
        Ok((sql, vars))
    }

    /// [`Search::render`], appending to existing variables.
    pub fn render_into(&self, ctx: &dyn RenderContext, vars: &mut Vec<Value>) -> Result<String> {
        Renderer::new(self, ctx).combined_sql(vars)
    }

    /// Only the `WHERE ...` clause, appending to existing variables.
    pub fn where_sql(&self, ctx: &dyn RenderContext, vars: &mut Vec<Value>) -> Result<String> {
        Renderer::new(self, ctx).where_sql(vars)
    }

    /// A complete SELECT, or the raw statement for raw searches.
    pub fn query_sql(&self, ctx: &dyn RenderContext) -> Result<(String, Vec<Value>)> {
        let mut vars = Vec::new();
        if let Some(raw) = &self.raw {
            let sql = match raw.sql() {
                Some(sql) => substitute(ctx.dialect(), sql, &raw.args, &mut vars)?,
                None => String::new(),
            };
            return Ok((sql, vars));
        }
        let table = self
            .quoted_table(ctx)
            .ok_or_else(|| Error::custom("no table to query: set a model or a table name"))?;
        let renderer = Renderer::new(self, ctx);
        let select = renderer.select_sql(&mut vars)?;
        let conditions = renderer.combined_sql(&mut vars)?;
        let sql = if conditions.is_empty() {
            format!("SELECT {select} FROM {table}")
        } else {
            format!("SELECT {select} FROM {table} {conditions}")
        };
        Ok((sql, vars))
    }
}
