//! Crate-level error type

use crate::boxing::BoxingError;
use crate::config::ConfigError;
use crate::plan::PlanError;
use crate::redefine::RedefinitionError;
use crate::retrofit::RetrofitError;
use crate::runtime::RuntimeError;
use crate::transform::TransformError;
use hotswap_bytecode::ClassFileError;
use thiserror::Error;

/// Any error the engine reports
#[derive(Debug, Error)]
pub enum HotswapError {
    /// Box/unbox code generation failed
    #[error(transparent)]
    Boxing(#[from] BoxingError),

    /// A type could not be transformed
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// A scope could not be retrofitted
    #[error(transparent)]
    Retrofit(#[from] RetrofitError),

    /// A redefinition batch failed
    #[error(transparent)]
    Redefinition(#[from] RedefinitionError),

    /// The runtime adapter failed
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A manipulation plan could not be loaded
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// A binary could not be decoded
    #[error("Invalid class file: {0}")]
    ClassFile(#[from] ClassFileError),
}

/// Result alias using [`HotswapError`]
pub type Result<T> = std::result::Result<T, HotswapError>;
