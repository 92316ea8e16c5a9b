//! Default query and row-query pipeline hooks.

use sqlscope_core::{DynModel, Error, Hook, Result};

use crate::scope::{Scope, ScopeValue, scan_into, scan_record};
use crate::settings::{ORDER_BY_PRIMARY_KEY, QUERY_OPTION};

/// Render the SELECT for the scope, honoring the primary-key ordering and
/// query option settings.
fn prepare_query(scope: &mut Scope) -> Option<()> {
    let direction = scope
        .instance_get::<String>(ORDER_BY_PRIMARY_KEY)
        .cloned();
    if let (Some(direction), Some(descriptor)) = (direction, scope.descriptor().cloned()) {
        if let Some(pk) = descriptor.primary_field() {
            let order = format!(
                "{}.{} {direction}",
                scope.quoted_table(),
                scope.quote(&pk.db_name)
            );
            scope.with_search(|s| s.order(order));
        }
    }

    let rendered = scope.search().query_sql(&*scope);
    let (mut sql, vars) = scope.check(rendered)?;
    if let Some(option) = scope.settings().text(QUERY_OPTION) {
        sql.push(' ');
        sql.push_str(option);
    }
    scope.set_sql(sql, vars);
    Some(())
}

/// Run the SELECT and scan rows into the target.
///
/// A single-record target with no matching row reports
/// [`Error::RecordNotFound`].
pub fn query(scope: &mut Scope) {
    if scope.has_error() {
        return;
    }
    let descriptor = scope.model();
    let Some(descriptor) = scope.check(descriptor) else {
        return;
    };
    if prepare_query(scope).is_none() {
        return;
    }
    let Some(rows) = scope.query_prepared() else {
        return;
    };

    let outcome: Result<()> = match scope.value_mut() {
        ScopeValue::One(record) => match rows.first() {
            Some(row) => scan_into(&descriptor, row, record.as_mut()),
            None => Err(Error::RecordNotFound),
        },
        ScopeValue::Many { records, .. } => rows
            .iter()
            .map(|row| scan_record(&descriptor, row))
            .collect::<Result<Vec<Box<dyn DynModel>>>>()
            .map(|scanned| *records = scanned),
        ScopeValue::Empty => Ok(()),
    };
    scope.check(outcome);
}

/// Load the search's preload paths.
pub fn preload(scope: &mut Scope) {
    if !scope.has_error() {
        crate::preload::preload(scope);
    }
}

/// Run `after_find` on every loaded record.
pub fn after_query(scope: &mut Scope) {
    if !scope.has_error() {
        scope.call_hooks(&[Hook::AfterFind]);
    }
}

/// Run the SELECT and keep the raw rows on the scope.
pub fn row_query(scope: &mut Scope) {
    if scope.has_error() || prepare_query(scope).is_none() {
        return;
    }
    if let Some(rows) = scope.query_prepared() {
        scope.set_rows(rows);
    }
}
