//! Process-wide engine state
//!
//! Everything the components share lives in one [`AgentState`] built at
//! attach and handed around by `Arc`. Tests build their own.

use crate::aux_store::AuxiliaryTypeStore;
use crate::class_data::ClassDataStore;
use crate::config::AgentConfig;
use crate::observer::{ChangeObserver, IdentityCache};
use crate::registry::ManipulationRegistry;
use crate::retrofit::RetrofitLedger;
use crate::scope::ScopeTracker;
use crate::side_table::FieldTable;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared engine state
pub struct AgentState {
    config: AgentConfig,
    registry: ManipulationRegistry,
    class_data: ClassDataStore,
    aux_types: AuxiliaryTypeStore,
    retrofits: RetrofitLedger,
    scopes: ScopeTracker,
    field_table: Arc<FieldTable>,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
    caches: RwLock<Vec<Arc<dyn IdentityCache>>>,
}

impl AgentState {
    /// Create empty state for `config`
    pub fn new(config: AgentConfig) -> Self {
        let registry = ManipulationRegistry::with_sweep_on_add(config.sweep_on_add);
        Self {
            config,
            registry,
            class_data: ClassDataStore::new(),
            aux_types: AuxiliaryTypeStore::new(),
            retrofits: RetrofitLedger::new(),
            scopes: ScopeTracker::new(),
            field_table: Arc::new(FieldTable::new()),
            observers: RwLock::new(Vec::new()),
            caches: RwLock::new(Vec::new()),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Manipulation registry
    pub fn registry(&self) -> &ManipulationRegistry {
        &self.registry
    }

    /// Structural snapshots and replaced-type tracking
    pub fn class_data(&self) -> &ClassDataStore {
        &self.class_data
    }

    /// Auxiliary type binaries awaiting definition
    pub fn aux_types(&self) -> &AuxiliaryTypeStore {
        &self.aux_types
    }

    /// Retrofit done/failed ledger
    pub fn retrofits(&self) -> &RetrofitLedger {
        &self.retrofits
    }

    /// Scopes seen by the transformer and the coordinator
    pub fn scopes(&self) -> &ScopeTracker {
        &self.scopes
    }

    /// Drop what every store holds for scopes that are no longer reachable
    ///
    /// Returns the number of unreachable scopes forgotten.
    pub fn sweep(&self) -> usize {
        self.registry.sweep();
        let dead = self.scopes.take_unreachable();
        if dead.is_empty() {
            return 0;
        }
        let aux_types = self.aux_types.forget_scopes(&dead);
        let snapshots = self.class_data.forget_scopes(&dead);
        let retrofits = self.retrofits.forget_scopes(&dead);
        tracing::debug!(
            scopes = dead.len(),
            aux_types,
            snapshots,
            retrofits,
            "forgot unreachable scopes"
        );
        dead.len()
    }

    /// Added-field side-table
    pub fn field_table(&self) -> &Arc<FieldTable> {
        &self.field_table
    }

    /// Register a change observer
    pub fn add_observer(&self, observer: Arc<dyn ChangeObserver>) {
        self.observers.write().push(observer);
    }

    /// Registered observers, in registration order
    pub fn observers(&self) -> Vec<Arc<dyn ChangeObserver>> {
        self.observers.read().clone()
    }

    /// Register an identity-keyed cache
    pub fn add_identity_cache(&self, cache: Arc<dyn IdentityCache>) {
        self.caches.write().push(cache);
    }

    /// Registered identity caches
    pub fn identity_caches(&self) -> Vec<Arc<dyn IdentityCache>> {
        self.caches.read().clone()
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl fmt::Debug for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentState")
            .field("config", &self.config)
            .field("scopes", &self.registry.scope_count())
            .field("snapshots", &self.class_data.len())
            .field("aux_types", &self.aux_types.len())
            .field("tracked_scopes", &self.scopes.len())
            .field("observers", &self.observers.read().len())
            .field("caches", &self.caches.read().len())
            .finish()
    }
}
