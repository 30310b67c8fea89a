//! Boundary with the host runtime

use crate::scope::{LoadScope, TypeIdentifier};
use crate::transform::TransformError;
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a runtime adapter
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Type is not loaded
    #[error("Type {0} is not loaded")]
    NotLoaded(TypeIdentifier),

    /// The runtime refused a definition
    #[error("Runtime rejected {identity}: {reason}")]
    Rejected {
        /// Offending type
        identity: TypeIdentifier,
        /// Reason given by the runtime
        reason: String,
    },

    /// Any other adapter failure
    #[error("Runtime error: {0}")]
    Other(String),
}

/// One (type, binary) pair handed to the runtime's commit primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    /// Type being redefined
    pub identity: TypeIdentifier,
    /// Replacement binary
    pub binary: Vec<u8>,
}

/// Result of a successful commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Committed types that need a full retransformation, not just a body swap
    pub requires_retransform: Vec<TypeIdentifier>,
}

/// Outcome of locating a type's binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Binary found
    ResolvedAt(Vec<u8>),
    /// The runtime has no binary for the type
    NotFound,
}

/// Load-time hook the runtime calls for every type definition or redefinition
pub trait TypeTransformer: Send + Sync {
    /// Return `binary` unchanged or a structurally valid replacement
    fn transform<'a>(
        &self,
        type_name: &str,
        scope: Option<&Arc<LoadScope>>,
        binary: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, TransformError>;
}

/// Operations the engine needs from the host runtime
pub trait Runtime: Send + Sync {
    /// Atomically replace a set of loaded types
    fn redefine(&self, definitions: &[TypeDefinition]) -> Result<CommitReport, RuntimeError>;

    /// Fully reload already committed types
    fn retransform(&self, types: &[TypeIdentifier]) -> Result<(), RuntimeError>;

    /// Locate the binary a loaded type was defined from
    fn locate_binary(&self, identity: &TypeIdentifier) -> Result<Resolution, RuntimeError>;

    /// Superclass of a loaded type
    fn superclass(&self, identity: &TypeIdentifier) -> Option<TypeIdentifier>;

    /// Install the load-time hook
    fn register_transformer(&self, transformer: Arc<dyn TypeTransformer>);
}
