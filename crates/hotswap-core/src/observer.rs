//! Change notification and identity-keyed cache hooks

use crate::scope::TypeIdentifier;

/// Types touched by one redefinition batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Existing types being replaced
    pub changed: Vec<TypeIdentifier>,
    /// Auxiliary types introduced by the batch
    pub added: Vec<TypeIdentifier>,
}

/// Integration notified around every redefinition
///
/// Errors from `before_change` abort the batch before anything is committed;
/// errors from `after_change` are reported after the commit.
pub trait ChangeObserver: Send + Sync {
    /// Called before any binary is transformed or committed
    fn before_change(&self, changes: &ChangeSet) -> anyhow::Result<()>;

    /// Called once the batch is committed and caches are flushed
    fn after_change(&self, changes: &ChangeSet) -> anyhow::Result<()>;
}

/// Process-wide cache keyed by type identity
pub trait IdentityCache: Send + Sync {
    /// Drop every cached entry
    fn flush(&self) -> anyhow::Result<()>;
}
