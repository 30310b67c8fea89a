//! Redefinition coordinator
//!
//! Commits a batch of replacement binaries as one unit:
//! 1. mark the old types replaced
//! 2. notify observers (`before_change`)
//! 3. transform every replacement exactly once
//! 4. register auxiliary types for load-time lookup
//! 5. commit to the runtime, retransforming what it asks for
//! 6. flush identity-keyed caches
//! 7. notify observers (`after_change`)
//!
//! A replacement whose manipulations do not apply is committed as given, so
//! one bad manipulation never holds back unrelated types. A failure in steps
//! 4 to 6 dumps every replacement binary for diagnosis and surfaces as
//! [`RedefinitionError::RedefinitionFailed`]. Nothing already committed is
//! rolled back.

use crate::class_data::BaseClassData;
use crate::observer::ChangeSet;
use crate::runtime::{CommitReport, Runtime, RuntimeError, TypeDefinition};
use crate::scope::{LoadScope, TypeIdentifier};
use crate::state::AgentState;
use crate::transform::Transformer;
use hotswap_bytecode::ClassFile;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Replacement for one loaded type
#[derive(Debug, Clone)]
pub struct TypeChange {
    /// Qualified type name
    pub name: String,
    /// Owning scope, `None` for the root scope
    pub scope: Option<Arc<LoadScope>>,
    /// Binary currently loaded, when the requester has it
    pub previous: Option<Vec<u8>>,
    /// Replacement binary
    pub replacement: Vec<u8>,
}

impl TypeChange {
    /// Create a change without the previous binary
    pub fn new(
        name: impl Into<String>,
        scope: Option<Arc<LoadScope>>,
        replacement: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            previous: None,
            replacement,
        }
    }

    /// Attach the binary being replaced
    pub fn with_previous(mut self, previous: Vec<u8>) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Identity of the replaced type
    pub fn identity(&self) -> TypeIdentifier {
        TypeIdentifier::in_scope(&self.name, self.scope.as_ref())
    }
}

/// Brand-new type introduced by a batch
#[derive(Debug, Clone)]
pub struct AuxiliaryType {
    /// Qualified type name
    pub name: String,
    /// Scope that will define it
    pub scope: Option<Arc<LoadScope>>,
    /// Type binary
    pub binary: Vec<u8>,
}

impl AuxiliaryType {
    /// Create an auxiliary type
    pub fn new(name: impl Into<String>, scope: Option<Arc<LoadScope>>, binary: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            scope,
            binary,
        }
    }

    /// Identity the type will have once defined
    pub fn identity(&self) -> TypeIdentifier {
        TypeIdentifier::in_scope(&self.name, self.scope.as_ref())
    }
}

/// Unit of atomic commit
#[derive(Debug, Clone, Default)]
pub struct RedefinitionBatch {
    /// Replaced types
    pub changes: Vec<TypeChange>,
    /// Added types
    pub added: Vec<AuxiliaryType>,
}

impl RedefinitionBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replacement
    pub fn change(mut self, change: TypeChange) -> Self {
        self.changes.push(change);
        self
    }

    /// Add an auxiliary type
    pub fn add(mut self, added: AuxiliaryType) -> Self {
        self.added.push(added);
        self
    }

    /// Identities the batch touches
    pub fn change_set(&self) -> ChangeSet {
        ChangeSet {
            changed: self.changes.iter().map(TypeChange::identity).collect(),
            added: self.added.iter().map(AuxiliaryType::identity).collect(),
        }
    }

    /// Check for an empty batch
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.added.is_empty()
    }
}

/// Observer notification phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePhase {
    /// Before anything is transformed
    Before,
    /// After the commit
    After,
}

impl fmt::Display for ChangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before change"),
            Self::After => f.write_str("after change"),
        }
    }
}

/// Why a commit failed
#[derive(Debug, Error)]
pub enum CommitFailure {
    /// Runtime commit or retransform failed
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// An identity cache could not be flushed
    #[error("Cache flush failed: {0}")]
    CacheFlush(#[source] anyhow::Error),
}

/// Coordinator errors
#[derive(Debug, Error)]
pub enum RedefinitionError {
    /// An observer failed; before the commit nothing was applied
    #[error("Observer failed {phase}: {source}")]
    Observer {
        /// When the observer ran
        phase: ChangePhase,
        /// Observer error
        #[source]
        source: anyhow::Error,
    },

    /// The batch failed; some subset of it may have been applied
    #[error("Redefinition of {count} type(s) failed: {cause}")]
    RedefinitionFailed {
        /// Number of types in the batch
        count: usize,
        /// Underlying failure
        #[source]
        cause: CommitFailure,
    },
}

/// Runs redefinition batches
pub struct Redefiner {
    state: Arc<AgentState>,
    runtime: Arc<dyn Runtime>,
    transformer: Arc<Transformer>,
}

impl Redefiner {
    /// Create a coordinator
    pub fn new(
        state: Arc<AgentState>,
        runtime: Arc<dyn Runtime>,
        transformer: Arc<Transformer>,
    ) -> Self {
        Self {
            state,
            runtime,
            transformer,
        }
    }

    /// Apply `batch`
    ///
    /// Callers must serialize batches whose type sets overlap; the
    /// coordinator takes no lock of its own.
    pub fn redefine(&self, batch: &RedefinitionBatch) -> Result<CommitReport, RedefinitionError> {
        self.state.sweep();
        let changes = batch.change_set();

        for change in &batch.changes {
            if let Some(scope) = &change.scope {
                self.state.scopes().track(scope);
            }
            self.mark_replaced(change);
        }

        for observer in self.state.observers() {
            observer
                .before_change(&changes)
                .map_err(|source| RedefinitionError::Observer {
                    phase: ChangePhase::Before,
                    source,
                })?;
        }

        let report = match self.commit(batch) {
            Ok(report) => report,
            Err(cause) => {
                self.dump(batch);
                tracing::error!(types = batch.changes.len(), error = %cause, "redefinition failed");
                return Err(RedefinitionError::RedefinitionFailed {
                    count: batch.changes.len(),
                    cause,
                });
            }
        };

        tracing::info!(
            changed = changes.changed.len(),
            added = changes.added.len(),
            retransformed = report.requires_retransform.len(),
            "redefinition committed"
        );

        for observer in self.state.observers() {
            observer
                .after_change(&changes)
                .map_err(|source| RedefinitionError::Observer {
                    phase: ChangePhase::After,
                    source,
                })?;
        }

        Ok(report)
    }

    fn mark_replaced(&self, change: &TypeChange) {
        let identity = change.identity();
        let stale = self.state.class_data().mark_replaced(&identity);

        let older = match (stale, &change.previous) {
            (Some(snapshot), _) => Some(snapshot),
            (None, Some(previous)) => ClassFile::decode(previous)
                .ok()
                .map(|class| Arc::new(BaseClassData::capture(identity.clone(), &class))),
            (None, None) => None,
        };
        let Some(older) = older else {
            return;
        };
        let Ok(newer) = ClassFile::decode(&change.replacement) else {
            return;
        };
        let newer = BaseClassData::capture(identity.clone(), &newer);
        for removed in older.removed_methods(&newer) {
            tracing::debug!(
                type_name = %identity,
                method = %format_args!("{}{}", removed.name, removed.descriptor),
                "method removed by replacement"
            );
        }
    }

    fn commit(&self, batch: &RedefinitionBatch) -> Result<CommitReport, CommitFailure> {
        let definitions: Vec<TypeDefinition> = batch
            .changes
            .iter()
            .map(|change| TypeDefinition {
                identity: change.identity(),
                binary: self.rewrite(change),
            })
            .collect();

        for added in &batch.added {
            if let Some(scope) = &added.scope {
                self.state.scopes().track(scope);
            }
            self.state
                .aux_types()
                .insert(added.identity(), added.binary.clone());
        }

        let report = self.runtime.redefine(&definitions)?;
        if !report.requires_retransform.is_empty() {
            self.runtime.retransform(&report.requires_retransform)?;
        }

        for cache in self.state.identity_caches() {
            cache.flush().map_err(CommitFailure::CacheFlush)?;
        }

        Ok(report)
    }

    /// Transformed replacement, or the replacement as given when its
    /// manipulations do not apply; the runtime's verifier judges the result
    fn rewrite(&self, change: &TypeChange) -> Vec<u8> {
        match self
            .transformer
            .transform_class(&change.name, change.scope.as_ref(), &change.replacement)
        {
            Ok(binary) => binary.into_owned(),
            Err(error) => {
                tracing::warn!(
                    type_name = %change.name,
                    %error,
                    "replacement committed untransformed"
                );
                change.replacement.clone()
            }
        }
    }

    /// Write every replacement, re-transformed in isolation, to the dump directory
    ///
    /// Returns the files written. I/O errors are logged and skipped.
    pub fn dump(&self, batch: &RedefinitionBatch) -> Vec<PathBuf> {
        let config = self.state.config();
        let directory = config.effective_dump_directory();
        if let Err(error) = std::fs::create_dir_all(&directory) {
            tracing::warn!(
                directory = %directory.display(),
                %error,
                "cannot create dump directory"
            );
            return Vec::new();
        }

        let mut written = Vec::new();
        for change in &batch.changes {
            let binary = self
                .transformer
                .transform_class(&change.name, change.scope.as_ref(), &change.replacement)
                .unwrap_or(std::borrow::Cow::Borrowed(&change.replacement));
            let path = dump_path(&directory, &change.name, &config.dump_extension);
            match std::fs::write(&path, &binary) {
                Ok(()) => {
                    tracing::debug!(
                        type_name = %change.name,
                        path = %path.display(),
                        "binary dumped"
                    );
                    written.push(path);
                }
                Err(error) => tracing::warn!(
                    type_name = %change.name,
                    path = %path.display(),
                    %error,
                    "dump failed"
                ),
            }
        }
        written
    }
}

/// `<directory>/<qualified-name>1.<extension>`
pub fn dump_path(directory: &Path, type_name: &str, extension: &str) -> PathBuf {
    directory.join(format!("{}1.{}", type_name, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_path() {
        let path = dump_path(Path::new("/tmp/dumps"), "com.example.Widget", "class");
        assert_eq!(path, PathBuf::from("/tmp/dumps/com.example.Widget1.class"));
    }

    #[test]
    fn test_change_set() {
        let app = LoadScope::new("app", None, "com.example.AppLoader");
        let batch = RedefinitionBatch::new()
            .change(TypeChange::new("com.example.Widget", Some(app.clone()), vec![1]))
            .add(AuxiliaryType::new("com.example.Widget$Proxy", Some(app.clone()), vec![2]));

        let changes = batch.change_set();
        assert_eq!(
            changes.changed,
            vec![TypeIdentifier::in_scope("com.example.Widget", Some(&app))]
        );
        assert_eq!(changes.added[0].scope, Some(app.id()));
        assert!(!batch.is_empty());
        assert!(RedefinitionBatch::new().is_empty());
    }

    #[test]
    fn test_error_messages() {
        let error = RedefinitionError::RedefinitionFailed {
            count: 2,
            cause: CommitFailure::Runtime(RuntimeError::Other("boom".to_string())),
        };
        assert_eq!(
            error.to_string(),
            "Redefinition of 2 type(s) failed: Runtime error: boom"
        );

        let error = RedefinitionError::Observer {
            phase: ChangePhase::Before,
            source: anyhow::anyhow!("vetoed"),
        };
        assert_eq!(error.to_string(), "Observer failed before change: vetoed");
    }
}
