//! Hotswap engine core
//!
//! Structural live redefinition of already-loaded types:
//! - Manipulation registry scoped by load scope
//! - Transformation dispatcher (added fields and methods, final relaxation,
//!   call-site rewriting)
//! - Load-scope retrofitting for auxiliary types
//! - Batch redefinition with failure dumps
//! - Box/unbox code generation and the added-field side-table

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod aux_store;
pub mod boxing;
pub mod class_data;
pub mod config;
pub mod error;
pub mod manipulation;
pub mod observer;
pub mod plan;
pub mod redefine;
pub mod registry;
pub mod retrofit;
pub mod runtime;
pub mod scope;
pub mod side_table;
pub mod state;
pub mod transform;

pub use agent::Agent;
pub use aux_store::{AuxiliaryTypeStore, AUX_LOOKUP};
pub use boxing::{box_value, coerce, unbox_value, BoxingError, CodeBuilder, PrimitiveKind};
pub use class_data::{BaseClassData, ClassDataStore, FieldData, MethodData};
pub use config::{AgentConfig, ConfigError};
pub use error::{HotswapError, Result};
pub use manipulation::{Manipulation, ManipulationKind, ScopeFiltered};
pub use observer::{ChangeObserver, ChangeSet, IdentityCache};
pub use plan::{ManipulationPlan, PlanEntry, PlanError, PlanKind};
pub use redefine::{
    AuxiliaryType, ChangePhase, CommitFailure, RedefinitionBatch, RedefinitionError, Redefiner,
    TypeChange,
};
pub use registry::{includes_scope, ManipulationRegistry, RegistrySnapshot, ScopeKey};
pub use retrofit::{RetrofitError, RetrofitLedger, RetrofitOutcome, RetrofitState, Retrofitter};
pub use runtime::{CommitReport, Resolution, Runtime, RuntimeError, TypeDefinition, TypeTransformer};
pub use scope::{LoadScope, ScopeId, ScopeTracker, TypeIdentifier, WeakScope};
pub use side_table::{AttributeStore, FieldTable, FieldValue, InstanceId};
pub use state::AgentState;
pub use transform::{TransformError, Transformer};
