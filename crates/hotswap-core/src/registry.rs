//! Load-scope-aware manipulation registry
//!
//! Maps (owning scope, type name) to a set of manipulations. A lookup from
//! scope `L` sees everything owned by `L`, by any scope `L` delegates to, and
//! everything scope-less.
//!
//! Outer tables are `DashMap`s. Each (scope, type) cell is an `ArcSwap` over
//! an immutable set: readers load a snapshot pointer, writers publish a fully
//! built replacement, so a lookup never observes a half-inserted item and
//! never waits on an unrelated writer.
//!
//! Scopes are held weakly. Entries of an unreachable scope are invisible to
//! lookups at once and physically dropped by [`ManipulationRegistry::sweep`],
//! which also runs on every `add` when `sweep_on_add` is set.

use crate::manipulation::{Manipulation, ScopeFiltered};
use crate::scope::{LoadScope, ScopeId, WeakScope};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;

/// Key of the outer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    /// Scope-less and root-owned entries
    Global,
    /// Entries owned by one scope
    Scope(ScopeId),
}

impl ScopeKey {
    fn of(owner: Option<ScopeId>) -> Self {
        owner.map_or(Self::Global, Self::Scope)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Scope(id) => write!(f, "{}", id),
        }
    }
}

type Cell<T> = Arc<ArcSwap<FxHashSet<T>>>;

struct ScopeEntry<T> {
    scope: Option<WeakScope>,
    types: DashMap<String, Cell<T>>,
}

impl<T> ScopeEntry<T> {
    fn is_alive(&self) -> bool {
        self.scope.as_ref().map_or(true, WeakScope::is_alive)
    }
}

/// Full registry contents, for diagnostics
pub type RegistrySnapshot<T> = FxHashMap<ScopeKey, FxHashMap<String, FxHashSet<T>>>;

/// Concurrent (scope, type name) -> manipulations index
pub struct ManipulationRegistry<T: ScopeFiltered = Manipulation> {
    entries: DashMap<ScopeKey, Arc<ScopeEntry<T>>>,
    sweep_on_add: bool,
}

impl<T: ScopeFiltered> ManipulationRegistry<T> {
    /// Create an empty registry that sweeps on every add
    pub fn new() -> Self {
        Self::with_sweep_on_add(true)
    }

    /// Create an empty registry
    pub fn with_sweep_on_add(sweep_on_add: bool) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_on_add,
        }
    }

    /// File `item` for `type_name` under its owning scope
    ///
    /// Returns `false` when an equal item was already present.
    pub fn add(&self, type_name: &str, item: T) -> bool {
        if self.sweep_on_add {
            self.sweep();
        }

        let key = ScopeKey::of(item.owner_id());
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| {
                Arc::new(ScopeEntry {
                    scope: item.owner().cloned(),
                    types: DashMap::new(),
                })
            })
            .clone();

        let cell = entry
            .types
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(FxHashSet::default())))
            .clone();

        let mut inserted = false;
        cell.rcu(|current| {
            let mut next = FxHashSet::clone(current);
            inserted = next.insert(item.clone());
            next
        });

        if inserted {
            tracing::debug!(type_name, scope = %key, "manipulation registered");
        }
        inserted
    }

    /// Everything visible from `scope`, by type name
    ///
    /// Sets from different owning scopes for the same type name are unioned.
    pub fn lookup(&self, scope: Option<&LoadScope>) -> FxHashMap<String, FxHashSet<T>> {
        let mut result: FxHashMap<String, FxHashSet<T>> = FxHashMap::default();
        for entry in self.entries.iter() {
            if !includes_key(scope, *entry.key()) || !entry.value().is_alive() {
                continue;
            }
            for cell in entry.value().types.iter() {
                let set = cell.value().load();
                if set.is_empty() {
                    continue;
                }
                result
                    .entry(cell.key().clone())
                    .or_default()
                    .extend(set.iter().cloned());
            }
        }
        result
    }

    /// Everything visible from `scope` for one type name
    pub fn lookup_type(&self, scope: Option<&LoadScope>, type_name: &str) -> FxHashSet<T> {
        let mut result = FxHashSet::default();
        let scoped = scope
            .into_iter()
            .flat_map(|s| s.chain())
            .map(|s| ScopeKey::Scope(s.id()));

        for key in std::iter::once(ScopeKey::Global).chain(scoped) {
            let Some(entry) = self.entries.get(&key).map(|e| Arc::clone(e.value())) else {
                continue;
            };
            if !entry.is_alive() {
                continue;
            }
            if let Some(cell) = entry.types.get(type_name) {
                result.extend(cell.value().load().iter().cloned());
            };
        }
        result
    }

    /// Retract everything filed for `type_name` under exactly `scope`
    ///
    /// Returns the number of retracted items.
    pub fn remove(&self, type_name: &str, scope: Option<&LoadScope>) -> usize {
        let key = ScopeKey::of(scope.map(LoadScope::id));
        let Some(entry) = self.entries.get(&key).map(|e| Arc::clone(e.value())) else {
            return 0;
        };
        match entry.types.remove(type_name) {
            Some((_, cell)) => {
                let removed = cell.load().len();
                tracing::debug!(type_name, scope = %key, removed, "manipulations retracted");
                removed
            }
            None => 0,
        }
    }

    /// Drop entries of unreachable scopes; returns how many scopes were dropped
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_alive());
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            tracing::debug!(swept, "dropped manipulations of unreachable scopes");
        }
        swept
    }

    /// Copy of the whole table, including entries not yet swept
    pub fn raw_snapshot(&self) -> RegistrySnapshot<T> {
        self.entries
            .iter()
            .map(|entry| {
                let types = entry
                    .value()
                    .types
                    .iter()
                    .map(|cell| (cell.key().clone(), FxHashSet::clone(&cell.value().load())))
                    .collect();
                (*entry.key(), types)
            })
            .collect()
    }

    /// Number of owning scopes with entries (including the global key)
    pub fn scope_count(&self) -> usize {
        self.entries.len()
    }

    /// Check for an empty registry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ScopeFiltered> Default for ManipulationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ancestor-or-self rule
///
/// A scope-less owner is visible everywhere; otherwise `owner` must be
/// `requesting` or a scope it delegates to. The root scope only sees
/// scope-less entries.
pub fn includes_scope(requesting: Option<&LoadScope>, owner: Option<ScopeId>) -> bool {
    match owner {
        None => true,
        Some(owner) => requesting.is_some_and(|scope| scope.is_self_or_descendant_of(owner)),
    }
}

fn includes_key(requesting: Option<&LoadScope>, key: ScopeKey) -> bool {
    match key {
        ScopeKey::Global => true,
        ScopeKey::Scope(id) => includes_scope(requesting, Some(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manipulation::ManipulationKind;

    fn relax(name: &str, scope: Option<&Arc<LoadScope>>) -> Manipulation {
        Manipulation::new(
            ManipulationKind::RelaxFinal {
                name: name.to_string(),
                descriptor: None,
            },
            scope,
        )
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = ManipulationRegistry::new();
        assert!(registry.add("com.example.Widget", relax("render", None)));
        assert!(!registry.add("com.example.Widget", relax("render", None)));
        assert_eq!(registry.lookup_type(None, "com.example.Widget").len(), 1);
    }

    #[test]
    fn test_includes_scope() {
        let app = LoadScope::new("app", None, "com.example.AppLoader");
        let child = LoadScope::new("child", Some(app.clone()), "com.example.ChildLoader");

        assert!(includes_scope(None, None));
        assert!(includes_scope(Some(&child), None));
        assert!(includes_scope(Some(&child), Some(app.id())));
        assert!(!includes_scope(Some(&app), Some(child.id())));
        assert!(!includes_scope(None, Some(app.id())));
    }

    #[test]
    fn test_lookup_unions_across_scopes() {
        let app = LoadScope::new("app", None, "com.example.AppLoader");
        let child = LoadScope::new("child", Some(app.clone()), "com.example.ChildLoader");
        let registry = ManipulationRegistry::new();

        registry.add("com.example.Widget", relax("a", None));
        registry.add("com.example.Widget", relax("b", Some(&app)));
        registry.add("com.example.Widget", relax("c", Some(&child)));

        let from_child = registry.lookup(Some(&child));
        assert_eq!(from_child["com.example.Widget"].len(), 3);

        let from_app = registry.lookup(Some(&app));
        assert_eq!(from_app["com.example.Widget"].len(), 2);

        let from_root = registry.lookup(None);
        assert_eq!(from_root["com.example.Widget"].len(), 1);
    }

    #[test]
    fn test_lookup_type_matches_lookup() {
        let app = LoadScope::new("app", None, "com.example.AppLoader");
        let registry = ManipulationRegistry::new();
        registry.add("com.example.Widget", relax("a", None));
        registry.add("com.example.Widget", relax("b", Some(&app)));
        registry.add("com.example.Other", relax("c", Some(&app)));

        let all = registry.lookup(Some(&app));
        assert_eq!(
            registry.lookup_type(Some(&app), "com.example.Widget"),
            all["com.example.Widget"]
        );
        assert!(registry.lookup_type(Some(&app), "com.example.Missing").is_empty());
    }

    #[test]
    fn test_remove_exact_scope_only() {
        let app = LoadScope::new("app", None, "com.example.AppLoader");
        let other = LoadScope::new("other", None, "com.example.OtherLoader");
        let registry = ManipulationRegistry::new();

        registry.add("com.example.Widget", relax("a", Some(&app)));
        registry.add("com.example.Widget", relax("b", Some(&app)));
        registry.add("com.example.Widget", relax("c", Some(&other)));

        assert_eq!(registry.remove("com.example.Widget", Some(&app)), 2);
        assert!(registry.lookup_type(Some(&app), "com.example.Widget").is_empty());
        assert_eq!(registry.lookup_type(Some(&other), "com.example.Widget").len(), 1);
        assert_eq!(registry.remove("com.example.Widget", Some(&app)), 0);
    }

    #[test]
    fn test_dead_scope_invisible_then_swept() {
        let registry = ManipulationRegistry::with_sweep_on_add(false);
        let scope = LoadScope::new("temp", None, "com.example.TempLoader");
        registry.add("com.example.Widget", relax("a", Some(&scope)));
        assert_eq!(registry.scope_count(), 1);

        let snapshot = registry.raw_snapshot();
        assert!(snapshot.contains_key(&ScopeKey::Scope(scope.id())));

        drop(scope);
        assert!(registry.lookup(None).is_empty());
        assert_eq!(registry.scope_count(), 1);
        assert_eq!(registry.sweep(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_on_add() {
        let registry = ManipulationRegistry::new();
        let scope = LoadScope::new("temp", None, "com.example.TempLoader");
        registry.add("com.example.Widget", relax("a", Some(&scope)));
        drop(scope);

        registry.add("com.example.Widget", relax("b", None));
        assert_eq!(registry.scope_count(), 1);
        assert!(registry.raw_snapshot().contains_key(&ScopeKey::Global));
    }
}
