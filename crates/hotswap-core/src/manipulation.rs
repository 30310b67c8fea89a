//! Structural manipulations
//!
//! A manipulation is an immutable description of one structural change a
//! requester wants applied whenever a given type is loaded or redefined. It
//! records the scope whose request installed it; that scope decides which
//! load scopes can see it (see [`crate::registry`]).

use crate::scope::{LoadScope, ScopeId, WeakScope};
use hotswap_bytecode::MemberRef;
use std::fmt;
use std::sync::Arc;

/// Kind-specific parameters of a manipulation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManipulationKind {
    /// Field added by a replacement version; accesses go through the side-table
    AddedField {
        /// Declaring type
        owner: String,
        /// Field name
        name: String,
        /// Field descriptor
        descriptor: String,
        /// Access flags granted to the declaration
        access: u16,
    },
    /// Method added or made visible by a replacement version
    AddedMethod {
        /// Declaring type
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
        /// Access flags granted to the declaration
        access: u16,
        /// Type hosting the static trampoline of the same name
        proxy: String,
    },
    /// Clear FINAL so a later replacement may override or reassign the member
    RelaxFinal {
        /// Member name
        name: String,
        /// Restrict to one descriptor
        descriptor: Option<String>,
    },
    /// Route a call site through a static indirection point
    RewriteCallSite {
        /// Invoked member to match
        site: MemberRef,
        /// Static method invoked instead
        target: MemberRef,
    },
}

impl ManipulationKind {
    /// Short kebab-case label
    pub fn label(&self) -> &'static str {
        match self {
            Self::AddedField { .. } => "added-field",
            Self::AddedMethod { .. } => "added-method",
            Self::RelaxFinal { .. } => "relax-final",
            Self::RewriteCallSite { .. } => "rewrite-call-site",
        }
    }
}

/// A structural change plus the scope that requested it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Manipulation {
    kind: ManipulationKind,
    owner: Option<WeakScope>,
}

impl Manipulation {
    /// Scope-less manipulation, visible to every load scope
    pub fn global(kind: ManipulationKind) -> Self {
        Self { kind, owner: None }
    }

    /// Manipulation owned by `scope`; `None` means the root scope
    pub fn new(kind: ManipulationKind, scope: Option<&Arc<LoadScope>>) -> Self {
        Self {
            kind,
            owner: scope.map(LoadScope::downgrade),
        }
    }

    /// Added-field access
    pub fn added_field(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access: u16,
    ) -> ManipulationKind {
        ManipulationKind::AddedField {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            access,
        }
    }

    /// Added-method access
    pub fn added_method(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access: u16,
        proxy: impl Into<String>,
    ) -> ManipulationKind {
        ManipulationKind::AddedMethod {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            proxy: proxy.into(),
        }
    }

    /// Final relaxation
    pub fn relax_final(name: impl Into<String>, descriptor: Option<String>) -> ManipulationKind {
        ManipulationKind::RelaxFinal {
            name: name.into(),
            descriptor,
        }
    }

    /// Call-site rewrite
    pub fn rewrite_call_site(site: MemberRef, target: MemberRef) -> ManipulationKind {
        ManipulationKind::RewriteCallSite { site, target }
    }

    /// Kind-specific parameters
    pub fn kind(&self) -> &ManipulationKind {
        &self.kind
    }

    /// Owning scope handle, `None` for scope-less manipulations
    pub fn owner(&self) -> Option<&WeakScope> {
        self.owner.as_ref()
    }
}

impl fmt::Display for Manipulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ManipulationKind::AddedField {
                owner,
                name,
                descriptor,
                ..
            } => write!(f, "added-field {}.{}:{}", owner, name, descriptor)?,
            ManipulationKind::AddedMethod {
                owner,
                name,
                descriptor,
                proxy,
                ..
            } => write!(f, "added-method {}.{}{} via {}", owner, name, descriptor, proxy)?,
            ManipulationKind::RelaxFinal { name, descriptor } => write!(
                f,
                "relax-final {}{}",
                name,
                descriptor.as_deref().unwrap_or("")
            )?,
            ManipulationKind::RewriteCallSite { site, target } => {
                write!(f, "rewrite-call-site {} -> {}", site, target)?
            }
        }
        match &self.owner {
            Some(owner) => write!(f, " [{}]", owner.id()),
            None => Ok(()),
        }
    }
}

/// Items the registry can file under an owning scope
pub trait ScopeFiltered: Clone + Eq + std::hash::Hash + Send + Sync + 'static {
    /// Owning scope, `None` when visible everywhere
    fn owner(&self) -> Option<&WeakScope>;

    /// Owning scope ID
    fn owner_id(&self) -> Option<ScopeId> {
        self.owner().map(WeakScope::id)
    }
}

impl ScopeFiltered for Manipulation {
    fn owner(&self) -> Option<&WeakScope> {
        self.owner.as_ref()
    }
}
