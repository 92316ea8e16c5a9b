//! Named callback pipelines.
//!
//! Every scope operation (create, update, delete, query, row query) is a list
//! of named hooks run in order. Hooks register with optional placement
//! constraints:
//!
//! ```ignore
//! db.callback(|cb| {
//!     cb.create()
//!         .before("sqlscope:create")
//!         .register("audit:stamp_owner", |scope| { /* ... */ });
//!     cb.query().remove("sqlscope:preload");
//! });
//! ```
//!
//! # Ordering
//!
//! After each change the pipeline is re-sorted. Processors are visited in
//! registration order. A processor constrained `before(x)` is spliced in
//! directly ahead of `x`, one constrained `after(x)` directly behind it,
//! placing the anchor first when it has not been placed yet. Unconstrained
//! processors keep their registration position.
//!
//! - `replace` swaps a hook's behavior in place.
//! - `remove` drops a name from the sorted output (it still works as an anchor).
//! - Registering an existing name warns; the new behavior wins, the first
//!   position is kept.
//! - A missing anchor warns and leaves the processor unconstrained; a cycle
//!   warns and leaves the whole pipeline in registration order.

pub mod associations;
pub mod create;
pub mod delete;
pub mod query;
pub mod transaction;
pub mod update;

use std::fmt;
use std::sync::Arc;

use crate::scope::Scope;

/// A pipeline hook.
pub type HookFn = Arc<dyn Fn(&mut Scope) + Send + Sync>;

/// The operation a pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Create,
    Update,
    Delete,
    Query,
    RowQuery,
}

impl CallbackKind {
    pub const ALL: [CallbackKind; 5] = [
        CallbackKind::Create,
        CallbackKind::Update,
        CallbackKind::Delete,
        CallbackKind::Query,
        CallbackKind::RowQuery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CallbackKind::Create => "create",
            CallbackKind::Update => "update",
            CallbackKind::Delete => "delete",
            CallbackKind::Query => "query",
            CallbackKind::RowQuery => "row_query",
        }
    }

    const fn index(self) -> usize {
        match self {
            CallbackKind::Create => 0,
            CallbackKind::Update => 1,
            CallbackKind::Delete => 2,
            CallbackKind::Query => 3,
            CallbackKind::RowQuery => 4,
        }
    }
}

// ============================================================================
// Pipelines
// ============================================================================

struct Processor {
    name: String,
    before: Option<String>,
    after: Option<String>,
    hook: HookFn,
    removed: bool,
}

#[derive(Default)]
struct Pipeline {
    processors: Vec<Processor>,
    sorted: Vec<usize>,
}

impl Pipeline {
    fn position(&self, name: &str) -> Option<usize> {
        self.processors.iter().position(|p| p.name == name)
    }

    fn anchor(&self, kind: CallbackKind, name: &str, anchor: Option<&str>) -> Option<usize> {
        let anchor = anchor?;
        let found = self.position(anchor);
        if found.is_none() {
            tracing::warn!(
                kind = kind.as_str(),
                callback = name,
                anchor,
                "callback anchor not registered, keeping registration order"
            );
        }
        found
    }

    /// `(before, after)` anchor indexes per processor.
    fn anchors(&self, kind: CallbackKind) -> Vec<(Option<usize>, Option<usize>)> {
        self.processors
            .iter()
            .map(|p| {
                (
                    self.anchor(kind, &p.name, p.before.as_deref()),
                    self.anchor(kind, &p.name, p.after.as_deref()),
                )
            })
            .collect()
    }

    /// Whether the precedence graph has a cycle.
    fn has_cycle(anchors: &[(Option<usize>, Option<usize>)]) -> bool {
        // successors[i]: processors that must run after i
        let mut successors = vec![Vec::new(); anchors.len()];
        for (i, (before, after)) in anchors.iter().enumerate() {
            if let Some(b) = before {
                successors[i].push(*b);
            }
            if let Some(a) = after {
                successors[*a].push(i);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }
        fn visit(i: usize, successors: &[Vec<usize>], marks: &mut [Mark]) -> bool {
            match marks[i] {
                Mark::Active => return true,
                Mark::Done => return false,
                Mark::New => {}
            }
            marks[i] = Mark::Active;
            for &next in &successors[i] {
                if visit(next, successors, marks) {
                    return true;
                }
            }
            marks[i] = Mark::Done;
            false
        }

        let mut marks = vec![Mark::New; anchors.len()];
        (0..anchors.len()).any(|i| visit(i, &successors, &mut marks))
    }

    fn place(i: usize, anchors: &[(Option<usize>, Option<usize>)], sorted: &mut Vec<usize>) {
        if sorted.contains(&i) {
            return;
        }
        let (before, after) = anchors[i];
        if let Some(b) = before {
            if let Some(at) = sorted.iter().position(|&s| s == b) {
                sorted.insert(at, i);
            } else {
                sorted.push(i);
                Self::place(b, anchors, sorted);
            }
        }
        if let Some(a) = after {
            if !sorted.contains(&i) {
                Self::place(a, anchors, sorted);
                let at = sorted.iter().position(|&s| s == a).map_or(sorted.len(), |p| p + 1);
                sorted.insert(at, i);
            }
        }
        if !sorted.contains(&i) {
            sorted.push(i);
        }
    }

    fn finalize(&mut self, kind: CallbackKind) {
        let anchors = self.anchors(kind);
        let order: Vec<usize> = if Self::has_cycle(&anchors) {
            tracing::warn!(
                kind = kind.as_str(),
                "callback constraints form a cycle, using registration order"
            );
            (0..self.processors.len()).collect()
        } else {
            let mut sorted = Vec::with_capacity(self.processors.len());
            for i in 0..self.processors.len() {
                Self::place(i, &anchors, &mut sorted);
            }
            sorted
        };
        self.sorted = order
            .into_iter()
            .filter(|&i| !self.processors[i].removed)
            .collect();
    }
}

/// Callback pipelines for every operation kind.
#[derive(Default)]
pub struct Callback {
    pipelines: [Pipeline; 5],
}

impl Callback {
    /// Empty pipelines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipelines holding the built-in `sqlscope:*` callbacks.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut callback = Self::new();
        register_defaults(&mut callback);
        callback
    }

    pub fn create(&mut self) -> Registrar<'_> {
        self.kind(CallbackKind::Create)
    }

    pub fn update(&mut self) -> Registrar<'_> {
        self.kind(CallbackKind::Update)
    }

    pub fn delete(&mut self) -> Registrar<'_> {
        self.kind(CallbackKind::Delete)
    }

    pub fn query(&mut self) -> Registrar<'_> {
        self.kind(CallbackKind::Query)
    }

    pub fn row_query(&mut self) -> Registrar<'_> {
        self.kind(CallbackKind::RowQuery)
    }

    pub fn kind(&mut self, kind: CallbackKind) -> Registrar<'_> {
        Registrar {
            pipeline: &mut self.pipelines[kind.index()],
            kind,
            before: None,
            after: None,
        }
    }

    /// Finalized hook names, in run order.
    pub fn names(&self, kind: CallbackKind) -> Vec<&str> {
        let pipeline = &self.pipelines[kind.index()];
        pipeline
            .sorted
            .iter()
            .map(|&i| pipeline.processors[i].name.as_str())
            .collect()
    }

    /// Finalized hooks, in run order.
    pub fn hooks(&self, kind: CallbackKind) -> Vec<HookFn> {
        let pipeline = &self.pipelines[kind.index()];
        pipeline
            .sorted
            .iter()
            .map(|&i| Arc::clone(&pipeline.processors[i].hook))
            .collect()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in CallbackKind::ALL {
            map.entry(&kind.as_str(), &self.names(kind));
        }
        map.finish()
    }
}

/// Registers, replaces or removes hooks of one operation kind.
pub struct Registrar<'a> {
    pipeline: &'a mut Pipeline,
    kind: CallbackKind,
    before: Option<String>,
    after: Option<String>,
}

impl Registrar<'_> {
    /// Place the next registration directly ahead of `name`.
    #[must_use]
    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.before = Some(name.into());
        self
    }

    /// Place the next registration directly behind `name`.
    #[must_use]
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after = Some(name.into());
        self
    }

    pub fn register<F>(self, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut Scope) + Send + Sync + 'static,
    {
        self.register_hook(name.into(), Arc::new(hook));
    }

    /// Replace the behavior of `name`, keeping its position.
    pub fn replace<F>(self, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut Scope) + Send + Sync + 'static,
    {
        let name = name.into();
        let kind = self.kind;
        let pipeline = self.pipeline;
        match pipeline.position(&name) {
            Some(i) => {
                tracing::debug!(kind = kind.as_str(), callback = %name, "replacing callback");
                let processor = &mut pipeline.processors[i];
                processor.hook = Arc::new(hook);
                processor.removed = false;
            }
            None => pipeline.processors.push(Processor {
                name,
                before: None,
                after: None,
                hook: Arc::new(hook),
                removed: false,
            }),
        }
        pipeline.finalize(kind);
    }

    /// Drop `name` from the pipeline.
    pub fn remove(self, name: &str) {
        let kind = self.kind;
        let pipeline = self.pipeline;
        match pipeline.position(name) {
            Some(i) => {
                tracing::debug!(kind = kind.as_str(), callback = name, "removing callback");
                pipeline.processors[i].removed = true;
            }
            None => tracing::warn!(
                kind = kind.as_str(),
                callback = name,
                "removing a callback that is not registered"
            ),
        }
        pipeline.finalize(kind);
    }

    /// The current hook registered as `name`, removed or not.
    pub fn get(&self, name: &str) -> Option<HookFn> {
        self.pipeline
            .position(name)
            .map(|i| Arc::clone(&self.pipeline.processors[i].hook))
    }

    fn register_hook(self, name: String, hook: HookFn) {
        let kind = self.kind;
        let pipeline = self.pipeline;
        match pipeline.position(&name) {
            Some(i) => {
                let processor = &mut pipeline.processors[i];
                if !processor.removed {
                    tracing::warn!(
                        kind = kind.as_str(),
                        callback = %name,
                        "duplicated callback registration"
                    );
                }
                processor.hook = hook;
                processor.removed = false;
            }
            None => pipeline.processors.push(Processor {
                name,
                before: self.before,
                after: self.after,
                hook,
                removed: false,
            }),
        }
        pipeline.finalize(kind);
    }
}

/// Register the built-in callbacks.
pub fn register_defaults(callback: &mut Callback) {
    use associations::{save_after_associations, save_before_associations};
    use transaction::{begin_transaction, commit_or_rollback_transaction};

    let creates: [(&str, fn(&mut Scope)); 9] = [
        ("sqlscope:begin_transaction", begin_transaction),
        ("sqlscope:before_create", create::before_create),
        ("sqlscope:save_before_associations", save_before_associations),
        ("sqlscope:update_time_stamp", create::update_time_stamp),
        ("sqlscope:create", create::create),
        ("sqlscope:force_reload_after_create", create::force_reload_after_create),
        ("sqlscope:save_after_associations", save_after_associations),
        ("sqlscope:after_create", create::after_create),
        ("sqlscope:commit_or_rollback_transaction", commit_or_rollback_transaction),
    ];
    for (name, hook) in creates {
        callback.create().register(name, hook);
    }

    let updates: [(&str, fn(&mut Scope)); 9] = [
        ("sqlscope:begin_transaction", begin_transaction),
        ("sqlscope:assign_updating_attributes", update::assign_updating_attributes),
        ("sqlscope:before_update", update::before_update),
        ("sqlscope:save_before_associations", save_before_associations),
        ("sqlscope:update_time_stamp", update::update_time_stamp),
        ("sqlscope:update", update::update),
        ("sqlscope:save_after_associations", save_after_associations),
        ("sqlscope:after_update", update::after_update),
        ("sqlscope:commit_or_rollback_transaction", commit_or_rollback_transaction),
    ];
    for (name, hook) in updates {
        callback.update().register(name, hook);
    }

    let deletes: [(&str, fn(&mut Scope)); 5] = [
        ("sqlscope:begin_transaction", begin_transaction),
        ("sqlscope:before_delete", delete::before_delete),
        ("sqlscope:delete", delete::delete),
        ("sqlscope:after_delete", delete::after_delete),
        ("sqlscope:commit_or_rollback_transaction", commit_or_rollback_transaction),
    ];
    for (name, hook) in deletes {
        callback.delete().register(name, hook);
    }

    let queries: [(&str, fn(&mut Scope)); 3] = [
        ("sqlscope:query", query::query),
        ("sqlscope:preload", query::preload),
        ("sqlscope:after_query", query::after_query),
    ];
    for (name, hook) in queries {
        callback.query().register(name, hook);
    }

    callback
        .row_query()
        .register("sqlscope:row_query", query::row_query);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopeValue;
    use crate::test_support::mock_db;

    fn noop(_: &mut Scope) {}

    fn names(callback: &Callback) -> Vec<&str> {
        callback.names(CallbackKind::Create)
    }

    #[test]
    fn test_insert_before_splices_ahead_of_anchor() {
        let mut cb = Callback::new();
        cb.create().register("A", noop);
        cb.create().register("B", noop);
        cb.create().register("C", noop);
        cb.create().before("B").register("D", noop);
        assert_eq!(names(&cb), vec!["A", "D", "B", "C"]);
    }

    #[test]
    fn test_insert_after_splices_behind_anchor() {
        let mut cb = Callback::new();
        cb.create().register("A", noop);
        cb.create().register("B", noop);
        cb.create().register("C", noop);
        cb.create().after("A").register("D", noop);
        assert_eq!(names(&cb), vec!["A", "D", "B", "C"]);
    }

    #[test]
    fn test_anchor_registered_later() {
        let mut cb = Callback::new();
        cb.create().after("C").register("X", noop);
        cb.create().register("A", noop);
        cb.create().register("C", noop);
        assert_eq!(names(&cb), vec!["C", "X", "A"]);
    }

    #[test]
    fn test_remove_drops_name() {
        let mut cb = Callback::new();
        cb.create().register("a", noop);
        cb.create().register("b", noop);
        cb.create().remove("a");
        assert_eq!(names(&cb), vec!["b"]);
    }

    #[test]
    fn test_remove_in_middle_keeps_anchor_for_others() {
        let mut cb = Callback::new();
        cb.create().register("a", noop);
        cb.create().register("b", noop);
        cb.create().register("c", noop);
        cb.create().remove("b");
        cb.create().before("b").register("d", noop);
        assert_eq!(names(&cb), vec!["a", "d", "c"]);
    }

    #[test]
    fn test_missing_anchor_keeps_registration_position() {
        let mut cb = Callback::new();
        cb.create().register("a", noop);
        cb.create().before("nope").register("b", noop);
        cb.create().register("c", noop);
        assert_eq!(names(&cb), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_falls_back_to_registration_order() {
        let mut cb = Callback::new();
        cb.create().before("b").register("a", noop);
        cb.create().before("a").register("b", noop);
        cb.create().register("c", noop);
        assert_eq!(names(&cb), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_keeps_first_position_and_last_behavior() {
        let db = mock_db();
        let mut cb = Callback::new();
        cb.create().register("first", |scope: &mut Scope| {
            scope.set("marker", 1_i32);
        });
        cb.create().register("second", noop);
        cb.create().register("first", |scope: &mut Scope| {
            scope.set("marker", 2_i32);
        });
        assert_eq!(names(&cb), vec!["first", "second"]);

        let mut scope = db.new_scope(ScopeValue::Empty);
        for hook in cb.hooks(CallbackKind::Create) {
            hook(&mut scope);
        }
        assert_eq!(scope.get::<i32>("marker"), Some(&2));
    }

    #[test]
    fn test_replace_swaps_behavior_in_place() {
        let db = mock_db();
        let mut cb = Callback::new();
        cb.query().register("a", noop);
        cb.query().register("b", |scope: &mut Scope| {
            scope.set("who", "original");
        });
        cb.query().register("c", noop);
        cb.query().replace("b", |scope: &mut Scope| {
            scope.set("who", "replacement");
        });
        assert_eq!(cb.names(CallbackKind::Query), vec!["a", "b", "c"]);

        let mut scope = db.new_scope(ScopeValue::Empty);
        let hook = cb.query().get("b").unwrap();
        hook(&mut scope);
        assert_eq!(scope.get::<&'static str>("who"), Some(&"replacement"));
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut cb = Callback::new();
        cb.create().register("x", noop);
        cb.delete().register("y", noop);
        assert_eq!(cb.names(CallbackKind::Create), vec!["x"]);
        assert_eq!(cb.names(CallbackKind::Delete), vec!["y"]);
        assert!(cb.names(CallbackKind::Update).is_empty());
    }

    #[test]
    fn test_default_create_order() {
        let cb = Callback::with_defaults();
        assert_eq!(
            cb.names(CallbackKind::Create),
            vec![
                "sqlscope:begin_transaction",
                "sqlscope:before_create",
                "sqlscope:save_before_associations",
                "sqlscope:update_time_stamp",
                "sqlscope:create",
                "sqlscope:force_reload_after_create",
                "sqlscope:save_after_associations",
                "sqlscope:after_create",
                "sqlscope:commit_or_rollback_transaction",
            ]
        );
        assert_eq!(
            cb.names(CallbackKind::Query),
            vec!["sqlscope:query", "sqlscope:preload", "sqlscope:after_query"]
        );
        assert_eq!(cb.names(CallbackKind::RowQuery), vec!["sqlscope:row_query"]);
    }

    #[test]
    fn test_user_hook_around_default() {
        let mut cb = Callback::with_defaults();
        cb.delete().before("sqlscope:delete").register("audit", noop);
        let names = cb.names(CallbackKind::Delete);
        let audit = names.iter().position(|n| *n == "audit").unwrap();
        let delete = names.iter().position(|n| *n == "sqlscope:delete").unwrap();
        assert_eq!(audit + 1, delete);
    }
}
