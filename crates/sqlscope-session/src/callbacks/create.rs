//! Default create pipeline hooks.

use sqlscope_core::{Error, Hook, Value};
use sqlscope_query::args;

use crate::scope::{Scope, ScopeValue};
use crate::settings::{BLANK_COLUMNS_WITH_DEFAULT, INSERT_OPTION};

/// Run `before_save` then `before_create` on the record.
pub fn before_create(scope: &mut Scope) {
    if !scope.has_error() {
        scope.call_hooks(&[Hook::BeforeSave, Hook::BeforeCreate]);
    }
}

/// Fill `created_at` when blank and `updated_at` when blank.
pub fn update_time_stamp(scope: &mut Scope) {
    if scope.has_error() {
        return;
    }
    let now = Value::Timestamp(chrono::Utc::now().naive_utc());
    for column in ["created_at", "updated_at"] {
        let blank = scope
            .fields()
            .and_then(|f| f.field(column).ok())
            .is_some_and(|f| f.field.is_normal() && f.is_blank());
        if blank {
            let result = scope.set_column(column, now.clone());
            scope.check(result);
        }
    }
}

/// Insert the record.
///
/// Blank primary keys are left to the database. Blank columns that declare a
/// default are left out as well and reloaded afterwards.
pub fn create(scope: &mut Scope) {
    if scope.has_error() {
        return;
    }
    let descriptor = scope.model();
    let Some(descriptor) = scope.check(descriptor) else {
        return;
    };

    let dialect = scope.db().dialect();
    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut vars = Vec::new();
    let mut blank_with_default = Vec::new();
    let Some(fields) = scope.fields() else {
        scope.err(Error::custom("create expects a single record"));
        return;
    };
    for bound in fields.normal() {
        if !scope.search().changeable(bound.field) {
            continue;
        }
        if bound.is_blank() && bound.field.has_default() {
            blank_with_default.push(bound.field.db_name.clone());
        } else if !bound.field.is_primary_key() || !bound.is_blank() {
            columns.push(dialect.quote(&bound.field.db_name));
            vars.push(bound.value);
            placeholders.push(dialect.bind_var(vars.len()));
        }
    }
    let assign_key = descriptor
        .primary_field()
        .filter(|pk| pk.is_auto_increment() && fields.is_blank(&pk.name).unwrap_or(false))
        .map(|pk| pk.name.clone());

    let table = scope.quoted_table();
    let extra = scope
        .settings()
        .text(INSERT_OPTION)
        .map(|option| format!(" {option}"))
        .unwrap_or_default();
    let sql = if columns.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES{extra}")
    } else {
        format!(
            "INSERT INTO {table} ({}) VALUES ({}){extra}",
            columns.join(","),
            placeholders.join(",")
        )
    };

    if !blank_with_default.is_empty() {
        scope.instance_set(BLANK_COLUMNS_WITH_DEFAULT, blank_with_default);
    }
    scope.set_sql(sql, vars);
    let Some(id) = scope.exec_insert() else {
        return;
    };
    if let Some(key) = assign_key {
        let result = scope.set_column(&key, Value::BigInt(id));
        scope.check(result);
    }
}

/// Read back columns that were left to their database defaults.
pub fn force_reload_after_create(scope: &mut Scope) {
    if scope.has_error() {
        return;
    }
    let Some(columns) = scope
        .instance_get::<Vec<String>>(BLANK_COLUMNS_WITH_DEFAULT)
        .cloned()
    else {
        return;
    };
    let Some(record) = scope.value().record().map(|r| r.clone_box()) else {
        return;
    };
    let dialect = scope.db().dialect();
    let select = columns
        .iter()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(",");

    let mut reload = scope.new_scope(ScopeValue::One(record));
    reload.with_search(|s| s.select(select, args![]).limit(1));
    let rows = reload.query_rows();
    let Some(rows) = scope.check(rows) else {
        return;
    };
    let Some(row) = rows.first() else {
        return;
    };
    for column in &columns {
        if let Some(value) = row.get_named(column) {
            let result = scope.set_column(column, value.clone());
            scope.check(result);
        }
    }
}

/// Run `after_create` then `after_save` on the record.
pub fn after_create(scope: &mut Scope) {
    if !scope.has_error() {
        scope.call_hooks(&[Hook::AfterCreate, Hook::AfterSave]);
    }
}
