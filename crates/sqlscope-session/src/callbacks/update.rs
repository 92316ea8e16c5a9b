//! Default update pipeline hooks.

use sqlscope_core::{Hook, RelationshipKind, Value, set_field};
use sqlscope_query::bind_value;

use crate::scope::Scope;
use crate::settings::{UPDATE_ATTRS, UPDATE_COLUMN, UPDATE_INTERFACE, UPDATE_OPTION};

fn updating_columns_only(scope: &Scope) -> bool {
    scope.settings().flag(UPDATE_COLUMN) == Some(true)
}

/// Turn requested attributes into the column list the UPDATE writes.
///
/// With a single record, attributes equal to the current values are dropped
/// and the rest are written onto the record; when nothing changes the rest
/// of the pipeline is skipped.
pub fn assign_updating_attributes(scope: &mut Scope) {
    let Some(attrs) = scope
        .instance_get::<Vec<(String, Value)>>(UPDATE_INTERFACE)
        .cloned()
    else {
        return;
    };
    let descriptor = scope.model();
    let Some(descriptor) = scope.check(descriptor) else {
        return;
    };

    let changed = match scope.fields() {
        Some(fields) => fields.changed(&attrs),
        None => attrs
            .into_iter()
            .filter_map(|(name, value)| match descriptor.field(&name) {
                Some(field) if field.is_normal() => Some((field.db_name.clone(), value)),
                Some(_) => None,
                None => Some((name, value)),
            })
            .collect(),
    };
    if changed.is_empty() {
        scope.skip_left();
        return;
    }

    let mut failures = Vec::new();
    for record in scope.value_mut().records_mut() {
        for (column, value) in &changed {
            if descriptor.field(column).is_some() {
                if let Err(err) = set_field(&descriptor, record.as_mut(), column, value.clone()) {
                    failures.push(err);
                }
            }
        }
    }
    for err in failures {
        scope.err(err);
    }
    scope.instance_set(UPDATE_ATTRS, changed);
}

/// Run `before_save` then `before_update`, unless writing columns directly.
pub fn before_update(scope: &mut Scope) {
    if !scope.has_error() && !updating_columns_only(scope) {
        scope.call_hooks(&[Hook::BeforeSave, Hook::BeforeUpdate]);
    }
}

/// Refresh `updated_at`, unless writing columns directly.
pub fn update_time_stamp(scope: &mut Scope) {
    if scope.has_error() || updating_columns_only(scope) {
        return;
    }
    let has_column = scope
        .descriptor()
        .is_some_and(|d| d.field("updated_at").is_some_and(|f| f.is_normal()));
    if has_column {
        let now = Value::Timestamp(chrono::Utc::now().naive_utc());
        let result = scope.set_column("updated_at", now);
        scope.check(result);
    }
}

/// Issue the UPDATE: the collected attributes, or every changeable column of
/// the record.
pub fn update(scope: &mut Scope) {
    if scope.has_error() {
        return;
    }
    let dialect = scope.db().dialect();
    let mut vars = Vec::new();
    let mut sets = Vec::new();
    if let Some(attrs) = scope.instance_get::<Vec<(String, Value)>>(UPDATE_ATTRS) {
        for (column, value) in attrs {
            let placeholder = bind_value(dialect, value.clone(), &mut vars);
            sets.push(format!("{} = {placeholder}", dialect.quote(column)));
        }
    } else if let Some(fields) = scope.fields() {
        for bound in fields.normal() {
            let field = bound.field;
            if field.is_primary_key() || !scope.search().changeable(field) {
                continue;
            }
            if field.db_name == "created_at" && bound.is_blank() {
                continue;
            }
            let placeholder = bind_value(dialect, bound.value, &mut vars);
            sets.push(format!("{} = {placeholder}", dialect.quote(&field.db_name)));
        }
        // a selected belongs-to field writes its foreign keys even when they
        // were not selected themselves
        for (field, relationship) in fields.descriptor().relationships() {
            if relationship.kind != RelationshipKind::BelongsTo || !scope.search().changeable(field) {
                continue;
            }
            for name in &relationship.foreign_field_names {
                let Ok(foreign) = fields.field(name) else {
                    continue;
                };
                if !scope.search().changeable(foreign.field) {
                    let placeholder = bind_value(dialect, foreign.value, &mut vars);
                    sets.push(format!("{} = {placeholder}", dialect.quote(&foreign.field.db_name)));
                }
            }
        }
    }
    if sets.is_empty() {
        return;
    }

    let conditions = scope.where_sql(&mut vars);
    let Some(conditions) = scope.check(conditions) else {
        return;
    };
    let mut sql = format!("UPDATE {} SET {}", scope.quoted_table(), sets.join(", "));
    if !conditions.is_empty() {
        sql.push(' ');
        sql.push_str(&conditions);
    }
    if let Some(option) = scope.settings().text(UPDATE_OPTION) {
        sql.push(' ');
        sql.push_str(option);
    }
    scope.set_sql(sql, vars);
    scope.exec();
}

/// Run `after_update` then `after_save`, unless writing columns directly.
pub fn after_update(scope: &mut Scope) {
    if !scope.has_error() && !updating_columns_only(scope) {
        scope.call_hooks(&[Hook::AfterUpdate, Hook::AfterSave]);
    }
}
