//! Load-time store of auxiliary type binaries
//!
//! Redefinition batches may introduce brand-new types. Their binaries are
//! parked here, keyed by (name, owning scope), and a retrofitted scope's
//! resolution entry point asks for them through
//! `hotswap.runtime.AuxiliaryTypes.lookup` before its normal lookup.

use crate::scope::{owned_by, ScopeId, TypeIdentifier};
use crate::side_table::EntryPoint;
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// `byte[] lookup(String name, Object scope)`
pub const AUX_LOOKUP: EntryPoint = EntryPoint {
    owner: "hotswap.runtime.AuxiliaryTypes",
    name: "lookup",
    descriptor: "(Ljava/lang/String;Ljava/lang/Object;)[B",
};

/// Auxiliary type binaries awaiting definition
#[derive(Debug, Default)]
pub struct AuxiliaryTypeStore {
    types: DashMap<TypeIdentifier, Arc<[u8]>>,
}

impl AuxiliaryTypeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binary; replaces an earlier one for the same identity
    pub fn insert(&self, identity: TypeIdentifier, binary: impl Into<Arc<[u8]>>) {
        tracing::debug!(type_name = %identity, "auxiliary type registered");
        self.types.insert(identity, binary.into());
    }

    /// Binary for `name` in `scope`
    pub fn lookup(&self, name: &str, scope: Option<ScopeId>) -> Option<Arc<[u8]>> {
        self.types
            .get(&TypeIdentifier::new(name, scope))
            .map(|binary| Arc::clone(binary.value()))
    }

    /// Remove and return the binary once the scope has defined it
    pub fn take(&self, name: &str, scope: Option<ScopeId>) -> Option<Arc<[u8]>> {
        self.types
            .remove(&TypeIdentifier::new(name, scope))
            .map(|(_, binary)| binary)
    }

    /// Drop binaries parked for scopes in `dead`
    pub fn forget_scopes(&self, dead: &FxHashSet<ScopeId>) -> usize {
        let before = self.types.len();
        self.types.retain(|identity, _| !owned_by(identity, dead));
        before.saturating_sub(self.types.len())
    }

    /// Check for a registered binary
    pub fn contains(&self, identity: &TypeIdentifier) -> bool {
        self.types.contains_key(identity)
    }

    /// Number of registered binaries
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check for an empty store
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
