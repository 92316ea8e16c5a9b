//! Default delete pipeline hooks.

use sqlscope_core::{Error, Hook, SOFT_DELETE_COLUMN, Value};

use crate::scope::Scope;
use crate::settings::DELETE_OPTION;

/// Run `before_delete` on the record.
pub fn before_delete(scope: &mut Scope) {
    if !scope.has_error() {
        scope.call_hooks(&[Hook::BeforeDelete]);
    }
}

/// Soft-delete by stamping `deleted_at`, or hard-delete when the type has no
/// such column or the search is unscoped.
pub fn delete(scope: &mut Scope) {
    if scope.has_error() {
        return;
    }
    let descriptor = scope.model();
    let Some(descriptor) = scope.check(descriptor) else {
        return;
    };
    let soft = !scope.search().is_unscoped() && descriptor.soft_delete_field().is_some();
    let dialect = scope.db().dialect();
    let table = scope.quoted_table();

    let mut vars = Vec::new();
    let mut sql = if soft {
        vars.push(Value::Timestamp(chrono::Utc::now().naive_utc()));
        format!(
            "UPDATE {table} SET {} = {}",
            dialect.quote(SOFT_DELETE_COLUMN),
            dialect.bind_var(1)
        )
    } else {
        format!("DELETE FROM {table}")
    };

    let unconditional = scope.primary_key_zero() && !scope.search().has_conditions();
    if unconditional && scope.db().config().blocking_delete_without_conditions {
        scope.err(Error::custom(format!(
            "refusing to delete every row of {table}: no conditions"
        )));
        return;
    }
    let conditions = scope.where_sql(&mut vars);
    let Some(conditions) = scope.check(conditions) else {
        return;
    };
    if !conditions.is_empty() {
        sql.push(' ');
        sql.push_str(&conditions);
    }
    if let Some(option) = scope.settings().text(DELETE_OPTION) {
        sql.push(' ');
        sql.push_str(option);
    }
    scope.set_sql(sql, vars);
    scope.exec();
}

/// Run `after_delete` on the record.
pub fn after_delete(scope: &mut Scope) {
    if !scope.has_error() {
        scope.call_hooks(&[Hook::AfterDelete]);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DbConfig;
    use crate::test_support::{Gadget, Note, mock_db, mock_db_with, recorded};
    use sqlscope_core::Value;

    #[test]
    fn test_soft_delete_stamps_deleted_at() {
        let db = mock_db();
        let note = Note {
            id: 5,
            ..Note::default()
        };
        db.delete(&note).unwrap();
        let statements = recorded(&db);
        let (sql, vars) = &statements[1];
        assert_eq!(
            sql,
            "UPDATE \"notes\" SET \"deleted_at\" = ? WHERE \"notes\".\"deleted_at\" IS NULL AND \"notes\".\"id\" = ?"
        );
        assert!(matches!(vars[0], Value::Timestamp(_)));
        assert_eq!(vars[1], Value::BigInt(5));
    }

    #[test]
    fn test_unscoped_delete_is_permanent() {
        let db = mock_db();
        let note = Note {
            id: 5,
            ..Note::default()
        };
        db.unscoped().delete(&note).unwrap();
        assert_eq!(
            recorded(&db)[1].0,
            "DELETE FROM \"notes\" WHERE \"notes\".\"id\" = ?"
        );
    }

    #[test]
    fn test_delete_without_soft_delete_column() {
        let db = mock_db();
        let gadget = Gadget {
            id: 2,
            ..Gadget::default()
        };
        db.delete(&gadget).unwrap();
        assert_eq!(
            recorded(&db)[1].0,
            "DELETE FROM \"gadgets\" WHERE \"gadgets\".\"id\" = ?"
        );
    }

    #[test]
    fn test_blocking_delete_without_conditions() {
        let db = mock_db_with(DbConfig::new().blocking_delete_without_conditions(true));
        let err = db.delete_all::<Gadget>().unwrap_err();
        assert!(err.to_string().contains("no conditions"));
        let statements: Vec<String> = recorded(&db).into_iter().map(|(sql, _)| sql).collect();
        assert_eq!(statements, vec!["BEGIN", "ROLLBACK"]);
    }
}
