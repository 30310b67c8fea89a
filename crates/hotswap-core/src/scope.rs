//! Load scopes and type identity
//!
//! A load scope is the unit of type-name isolation: two types with the same
//! qualified name in different scopes are distinct. Scopes form a tree through
//! a single "delegates to" parent. The root (bootstrap) scope is written as
//! `None` throughout the crate.

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a load scope
///
/// Identifiers are never reused within a process, so an entry keyed by a
/// dead scope's id can never be confused with a later scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Create a new unique scope ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ScopeId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// A loaded type: qualified name plus owning scope
///
/// Holds the scope by id only, so an identifier never keeps a scope alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeIdentifier {
    /// Dotted qualified name
    pub name: String,
    /// Owning scope, `None` for the root scope
    pub scope: Option<ScopeId>,
}

impl TypeIdentifier {
    /// Create an identifier
    pub fn new(name: impl Into<String>, scope: Option<ScopeId>) -> Self {
        Self {
            name: name.into(),
            scope,
        }
    }

    /// Identifier of a type owned by the root scope
    pub fn root(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// Identifier of `name` owned by `scope`
    pub fn in_scope(name: impl Into<String>, scope: Option<&Arc<LoadScope>>) -> Self {
        Self::new(name, scope.map(|s| s.id()))
    }
}

impl fmt::Display for TypeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{}@{}", self.name, scope),
            None => write!(f, "{}@root", self.name),
        }
    }
}

/// One type-name isolation unit
#[derive(Debug)]
pub struct LoadScope {
    id: ScopeId,
    name: String,
    parent: Option<Arc<LoadScope>>,
    implementation: TypeIdentifier,
}

impl LoadScope {
    /// Create a scope whose implementation type is defined by its parent
    ///
    /// This is the usual arrangement: a loader class is itself loaded by the
    /// scope it delegates to.
    pub fn new(
        name: impl Into<String>,
        parent: Option<Arc<LoadScope>>,
        implementation_type: impl Into<String>,
    ) -> Arc<Self> {
        let implementation =
            TypeIdentifier::new(implementation_type, parent.as_ref().map(|p| p.id));
        Self::with_implementation(name, parent, implementation)
    }

    /// Create a scope with an explicit implementation type identity
    pub fn with_implementation(
        name: impl Into<String>,
        parent: Option<Arc<LoadScope>>,
        implementation: TypeIdentifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ScopeId::new(),
            name: name.into(),
            parent,
            implementation,
        })
    }

    /// Scope ID
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope this one delegates to, `None` when it delegates to the root
    pub fn parent(&self) -> Option<&Arc<LoadScope>> {
        self.parent.as_ref()
    }

    /// Identity of the type implementing this scope
    pub fn implementation(&self) -> &TypeIdentifier {
        &self.implementation
    }

    /// This scope followed by every ancestor, nearest first
    pub fn chain(&self) -> impl Iterator<Item = &LoadScope> + '_ {
        std::iter::successors(Some(self), |scope| scope.parent.as_deref())
    }

    /// Check whether `ancestor` is this scope or one it delegates to
    pub fn is_self_or_descendant_of(&self, ancestor: ScopeId) -> bool {
        self.chain().any(|scope| scope.id == ancestor)
    }

    /// Weak handle that does not keep the scope alive
    pub fn downgrade(this: &Arc<Self>) -> WeakScope {
        WeakScope {
            id: this.id,
            scope: Arc::downgrade(this),
        }
    }
}

impl fmt::Display for LoadScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Non-owning scope handle compared by id
#[derive(Debug, Clone)]
pub struct WeakScope {
    id: ScopeId,
    scope: Weak<LoadScope>,
}

impl WeakScope {
    /// Scope ID
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Upgrade to a strong reference while the scope is still reachable
    pub fn upgrade(&self) -> Option<Arc<LoadScope>> {
        self.scope.upgrade()
    }

    /// Check whether the scope is still reachable
    pub fn is_alive(&self) -> bool {
        self.scope.strong_count() > 0
    }
}

impl PartialEq for WeakScope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WeakScope {}

impl std::hash::Hash for WeakScope {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Scopes the engine has seen, held weakly
///
/// Stores keyed by [`TypeIdentifier`] hold scopes by id only; this table
/// tells which of those ids still belong to a reachable scope. Ids never
/// tracked count as reachable.
#[derive(Debug, Default)]
pub struct ScopeTracker {
    scopes: DashMap<ScopeId, WeakScope>,
}

impl ScopeTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `scope` and every scope it delegates to
    pub fn track(&self, scope: &Arc<LoadScope>) {
        let mut next = Some(scope);
        while let Some(scope) = next {
            if self.scopes.contains_key(&scope.id) {
                break;
            }
            self.scopes.insert(scope.id, LoadScope::downgrade(scope));
            next = scope.parent();
        }
    }

    /// Check whether entries keyed by `scope` can still be reached
    pub fn is_reachable(&self, scope: Option<ScopeId>) -> bool {
        match scope {
            None => true,
            Some(id) => self.scopes.get(&id).map_or(true, |weak| weak.is_alive()),
        }
    }

    /// Forget every unreachable scope and return their ids
    pub fn take_unreachable(&self) -> FxHashSet<ScopeId> {
        let mut dead = FxHashSet::default();
        self.scopes.retain(|id, weak| {
            let alive = weak.is_alive();
            if !alive {
                dead.insert(*id);
            }
            alive
        });
        dead
    }

    /// Number of tracked scopes
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Check for an empty tracker
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Whether an identity's owning scope is in `dead`
pub(crate) fn owned_by(identity: &TypeIdentifier, dead: &FxHashSet<ScopeId>) -> bool {
    identity.scope.is_some_and(|id| dead.contains(&id))
}
