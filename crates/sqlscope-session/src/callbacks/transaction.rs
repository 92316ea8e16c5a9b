//! Transaction boundaries around write pipelines.

use crate::scope::Scope;

/// Begin a transaction unless the scope already runs inside one.
pub fn begin_transaction(scope: &mut Scope) {
    scope.begin();
}

/// Commit, or roll back when the scope collected errors. Only the scope that
/// began the transaction acts.
pub fn commit_or_rollback_transaction(scope: &mut Scope) {
    scope.commit_or_rollback();
}
