//! Transformation dispatcher
//!
//! The load-time hook the runtime calls for every type definition and
//! redefinition. It looks up the manipulations visible to the loading scope,
//! applies them to a decoded copy of the class and re-encodes it. Types with
//! nothing to apply are handed back untouched.
//!
//! Rewriting happens in a fixed order:
//! 1. added fields and added methods (declarations and their uses)
//! 2. final relaxation
//! 3. call-site rewrites

mod added_field;
mod added_method;
mod call_site;
mod final_member;

use crate::boxing::BoxingError;
use crate::manipulation::{Manipulation, ManipulationKind};
use crate::retrofit::{RetrofitOutcome, Retrofitter};
use crate::runtime::TypeTransformer;
use crate::scope::{LoadScope, TypeIdentifier};
use crate::state::AgentState;
use hotswap_bytecode::{ClassFile, CodeEditor, ConstantPool, Instruction, MemberRef};
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

/// Dispatcher errors
#[derive(Debug, Error)]
pub enum TransformError {
    /// The binary or a manipulation applied to it is inconsistent
    #[error("Malformed manipulation target {type_name}: {reason}")]
    MalformedManipulationTarget {
        /// Type being transformed
        type_name: String,
        /// What is wrong
        reason: String,
    },
}

impl TransformError {
    pub(crate) fn malformed(type_name: &str, reason: impl Into<String>) -> Self {
        Self::MalformedManipulationTarget {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn boxing(type_name: &str, error: BoxingError) -> Self {
        Self::malformed(type_name, format!("coercion failed: {}", error))
    }

    /// Name of the type whose transformation failed
    pub fn type_name(&self) -> &str {
        match self {
            Self::MalformedManipulationTarget { type_name, .. } => type_name,
        }
    }
}

/// Applies registered manipulations to type binaries
pub struct Transformer {
    state: Arc<AgentState>,
    retrofitter: Option<Arc<Retrofitter>>,
}

impl Transformer {
    /// Create a dispatcher; without a retrofitter owning scopes are never patched
    pub fn new(state: Arc<AgentState>, retrofitter: Option<Arc<Retrofitter>>) -> Self {
        Self { state, retrofitter }
    }

    /// Rewrite `binary` for `type_name` loaded by `scope`
    pub fn transform_class<'a>(
        &self,
        type_name: &str,
        scope: Option<&Arc<LoadScope>>,
        binary: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, TransformError> {
        if let Some(scope) = scope {
            self.state.scopes().track(scope);
        }
        if let (Some(scope), Some(retrofitter)) = (scope, &self.retrofitter) {
            if self.state.config().retrofit_scopes
                && retrofitter.ensure(scope) == RetrofitOutcome::Failed
            {
                tracing::warn!(
                    type_name,
                    scope = %scope.id(),
                    "scope cannot resolve auxiliary types; structural changes limited"
                );
            }
        }

        let manipulations = self
            .state
            .registry()
            .lookup_type(scope.map(Arc::as_ref), type_name);
        if manipulations.is_empty() {
            return Ok(Cow::Borrowed(binary));
        }

        let original = ClassFile::decode(binary)
            .map_err(|e| TransformError::malformed(type_name, e.to_string()))?;
        let mut class = original.clone();

        let mut ordered: Vec<&Manipulation> = manipulations.iter().collect();
        ordered.sort_by_cached_key(|m| (phase(m.kind()), m.to_string()));

        let mut applied = 0usize;
        for manipulation in ordered {
            let changed = apply(&mut class, manipulation.kind())?;
            if changed {
                tracing::debug!(type_name, manipulation = %manipulation, "manipulation applied");
                applied += 1;
            } else {
                tracing::debug!(
                    type_name,
                    manipulation = %manipulation,
                    "manipulation had no target"
                );
            }
        }

        if applied == 0 {
            return Ok(Cow::Borrowed(binary));
        }

        let identity = TypeIdentifier::in_scope(type_name, scope);
        self.state.class_data().capture(&identity, &original);
        tracing::debug!(type_name = %identity, applied, "type rewritten");
        Ok(Cow::Owned(class.encode()))
    }
}

impl TypeTransformer for Transformer {
    fn transform<'a>(
        &self,
        type_name: &str,
        scope: Option<&Arc<LoadScope>>,
        binary: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, TransformError> {
        self.transform_class(type_name, scope, binary)
    }
}

fn phase(kind: &ManipulationKind) -> u8 {
    match kind {
        ManipulationKind::AddedField { .. } | ManipulationKind::AddedMethod { .. } => 0,
        ManipulationKind::RelaxFinal { .. } => 1,
        ManipulationKind::RewriteCallSite { .. } => 2,
    }
}

fn apply(class: &mut ClassFile, kind: &ManipulationKind) -> Result<bool, TransformError> {
    match kind {
        ManipulationKind::AddedField {
            owner,
            name,
            descriptor,
            access,
        } => added_field::apply(class, owner, name, descriptor, *access),
        ManipulationKind::AddedMethod {
            owner,
            name,
            descriptor,
            access,
            proxy,
        } => added_method::apply(class, owner, name, descriptor, *access, proxy),
        ManipulationKind::RelaxFinal { name, descriptor } => {
            final_member::apply(class, name, descriptor.as_deref())
        }
        ManipulationKind::RewriteCallSite { site, target } => call_site::apply(class, site, target),
    }
}

// ===== Body rewriting =====

/// Method body being rewritten
pub(crate) struct Body<'a> {
    /// Class constant pool
    pub constants: &'a mut ConstantPool,
    /// First local slot not used by the original body
    pub first_free_local: u16,
    /// Locals required once rewriting is done
    pub max_locals: u16,
}

impl Body<'_> {
    /// Member referenced by a field access or invoke
    pub fn member(&self, instruction: &Instruction) -> Option<MemberRef> {
        let opcode = instruction.opcode;
        if !opcode.is_invoke() && !opcode.is_field_access() {
            return None;
        }
        instruction
            .index()
            .and_then(|index| self.constants.get_member(index))
            .cloned()
    }
}

/// Run `f` over every instruction of every method body
///
/// Returns the number of replaced instructions. A failure leaves the method
/// being rewritten unchanged and aborts the whole class.
pub(crate) fn rewrite_bodies<F>(class: &mut ClassFile, mut f: F) -> Result<usize, TransformError>
where
    F: FnMut(&mut Body<'_>, &Instruction) -> Result<Option<Vec<Instruction>>, TransformError>,
{
    let ClassFile {
        name,
        constants,
        methods,
        ..
    } = class;
    let name = name.as_str();

    let mut total = 0;
    for method in methods.iter_mut().filter(|m| !m.code.is_empty()) {
        let mut editor = CodeEditor::decode(&method.code).map_err(|e| {
            TransformError::malformed(name, format!("{}{}: {}", method.name, method.descriptor, e))
        })?;
        let mut body = Body {
            constants: &mut *constants,
            first_free_local: method.max_locals,
            max_locals: method.max_locals,
        };

        let count = editor.try_rewrite(|_, instruction| f(&mut body, instruction))?;
        if count > 0 {
            method.code = editor.encode().map_err(|e| {
                let member = format!("{}{}", method.name, method.descriptor);
                TransformError::malformed(name, format!("{}: {}", member, e))
            })?;
            method.max_locals = body.max_locals;
            total += count;
        }
    }
    Ok(total)
}
