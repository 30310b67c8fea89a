//! Load-scope retrofitting
//!
//! A scope can only hand out auxiliary types if its own resolution entry
//! point, `loadClass(String, boolean)`, asks the auxiliary-type store first.
//! The retrofitter patches that entry point once per scope implementation and
//! commits the patched implementation through the runtime.
//!
//! When the implementation's binary cannot be located, or it inherits the
//! entry point instead of declaring it, the walk continues at its superclass.
//! Reaching the root loader type ends the walk with a failure, which only
//! disables structural changes for types owned by that scope.

use crate::aux_store::AUX_LOOKUP;
use crate::class_data::BaseClassData;
use crate::manipulation::ManipulationKind;
use crate::runtime::{Resolution, Runtime, RuntimeError, TypeDefinition};
use crate::scope::{owned_by, LoadScope, ScopeId, TypeIdentifier};
use crate::side_table::EntryPoint;
use crate::state::AgentState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hotswap_bytecode::{
    access, flags, ClassFile, ClassFileError, CodeEditor, CodeError, ConstantPool, Instruction,
    Opcode,
};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use thiserror::Error;

/// Root of the loader hierarchy; never retrofitted
pub const ROOT_LOADER_TYPE: &str = "java.lang.ClassLoader";

/// `Class loadClass(String name, boolean resolve)`
pub const LOAD_CLASS: EntryPoint = EntryPoint {
    owner: ROOT_LOADER_TYPE,
    name: "loadClass",
    descriptor: "(Ljava/lang/String;Z)Ljava/lang/Class;",
};

const FIND_LOADED_CLASS: EntryPoint = EntryPoint {
    owner: ROOT_LOADER_TYPE,
    name: "findLoadedClass",
    descriptor: "(Ljava/lang/String;)Ljava/lang/Class;",
};

const DEFINE_CLASS: EntryPoint = EntryPoint {
    owner: ROOT_LOADER_TYPE,
    name: "defineClass",
    descriptor: "(Ljava/lang/String;[B)Ljava/lang/Class;",
};

const RESOLVE_CLASS: EntryPoint = EntryPoint {
    owner: ROOT_LOADER_TYPE,
    name: "resolveClass",
    descriptor: "(Ljava/lang/Class;)V",
};

/// Retrofit errors
#[derive(Debug, Error)]
pub enum RetrofitError {
    /// The runtime has no binary for the implementation type
    #[error("Type {0} is not resolvable")]
    TypeNotResolvable(TypeIdentifier),

    /// The implementation inherits its resolution entry point
    #[error("Type {0} does not declare loadClass(String, boolean)")]
    MissingEntryPoint(TypeIdentifier),

    /// No local slot left for the prologue
    #[error("Type {0} has no free local for the retrofit prologue")]
    LocalsExhausted(TypeIdentifier),

    /// Runtime refused the patched implementation
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Implementation binary is malformed
    #[error("Invalid implementation binary: {0}")]
    ClassFile(#[from] ClassFileError),

    /// Entry point body could not be patched
    #[error("Failed to patch entry point: {0}")]
    Code(#[from] CodeError),
}

impl RetrofitError {
    /// Check whether the walk should continue at the superclass
    pub fn is_inherited(&self) -> bool {
        matches!(self, Self::TypeNotResolvable(_) | Self::MissingEntryPoint(_))
    }
}

// ===== Ledger =====

/// Recorded retrofit state of one implementation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrofitState {
    /// Claimed by an in-flight attempt
    Pending,
    /// Patched, directly or through a superclass
    Done,
    /// Cannot be patched
    Failed,
}

/// Result of [`Retrofitter::ensure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrofitOutcome {
    /// This call applied the patch
    Patched,
    /// An earlier call already did
    AlreadyDone,
    /// Another attempt holds the claim
    InProgress,
    /// The scope cannot be retrofitted
    Failed,
}

impl RetrofitOutcome {
    fn from_recorded(state: RetrofitState) -> Self {
        match state {
            RetrofitState::Pending => Self::InProgress,
            RetrofitState::Done => Self::AlreadyDone,
            RetrofitState::Failed => Self::Failed,
        }
    }
}

/// Done/failed bookkeeping keyed by implementation type
#[derive(Debug, Default)]
pub struct RetrofitLedger {
    states: DashMap<TypeIdentifier, RetrofitState>,
}

impl RetrofitLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`; returns the recorded state when someone got there first
    pub fn claim(&self, identity: &TypeIdentifier) -> Option<RetrofitState> {
        match self.states.entry(identity.clone()) {
            Entry::Occupied(entry) => Some(*entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(RetrofitState::Pending);
                None
            }
        }
    }

    fn finish(&self, identity: &TypeIdentifier, state: RetrofitState) {
        self.states.insert(identity.clone(), state);
    }

    fn release(&self, identity: &TypeIdentifier) {
        self.states
            .remove_if(identity, |_, state| *state == RetrofitState::Pending);
    }

    /// Recorded state
    pub fn state(&self, identity: &TypeIdentifier) -> Option<RetrofitState> {
        self.states.get(identity).map(|state| *state)
    }

    /// Check for a completed retrofit
    pub fn is_done(&self, identity: &TypeIdentifier) -> bool {
        self.state(identity) == Some(RetrofitState::Done)
    }

    /// Check for a recorded failure
    pub fn is_failed(&self, identity: &TypeIdentifier) -> bool {
        self.state(identity) == Some(RetrofitState::Failed)
    }

    /// Forget implementation types defined by scopes in `dead`
    pub fn forget_scopes(&self, dead: &FxHashSet<ScopeId>) -> usize {
        let before = self.states.len();
        self.states.retain(|identity, _| !owned_by(identity, dead));
        before.saturating_sub(self.states.len())
    }

    /// Implementation types recorded as failed
    pub fn failed(&self) -> Vec<TypeIdentifier> {
        self.states
            .iter()
            .filter(|entry| *entry.value() == RetrofitState::Failed)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

// ===== Retrofitter =====

/// Patches scope implementations so they resolve auxiliary types
pub struct Retrofitter {
    state: Arc<AgentState>,
    runtime: Arc<dyn Runtime>,
}

impl Retrofitter {
    /// Create a retrofitter committing through `runtime`
    pub fn new(state: Arc<AgentState>, runtime: Arc<dyn Runtime>) -> Self {
        Self { state, runtime }
    }

    /// Retrofit `scope` unless that already happened or is happening
    ///
    /// Failures are recorded and logged, never propagated.
    pub fn ensure(&self, scope: &LoadScope) -> RetrofitOutcome {
        let ledger = self.state.retrofits();
        let original = scope.implementation().clone();
        if let Some(recorded) = ledger.claim(&original) {
            return RetrofitOutcome::from_recorded(recorded);
        }

        // The implementation type is defined by the scope's parent
        let context = scope.parent().map(Arc::as_ref);
        let mut candidate = original.clone();
        let outcome = loop {
            if candidate.name == ROOT_LOADER_TYPE {
                tracing::warn!(
                    scope = %scope.id(),
                    implementation = %original,
                    "no retrofittable implementation below {}",
                    ROOT_LOADER_TYPE
                );
                break RetrofitOutcome::Failed;
            }
            if candidate != original {
                if let Some(recorded) = ledger.claim(&candidate) {
                    break RetrofitOutcome::from_recorded(recorded);
                }
            }

            match self.patch(&candidate, context) {
                Ok(()) => {
                    ledger.finish(&candidate, RetrofitState::Done);
                    break RetrofitOutcome::Patched;
                }
                Err(error) if error.is_inherited() => {
                    tracing::debug!(
                        scope = %scope.id(),
                        candidate = %candidate,
                        %error,
                        "retrying retrofit at superclass"
                    );
                    if candidate != original {
                        ledger.finish(&candidate, RetrofitState::Failed);
                    }
                    match self.runtime.superclass(&candidate) {
                        Some(parent) => candidate = parent,
                        None => {
                            tracing::warn!(
                                scope = %scope.id(),
                                candidate = %candidate,
                                "superclass unknown"
                            );
                            break RetrofitOutcome::Failed;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        scope = %scope.id(),
                        candidate = %candidate,
                        %error,
                        "retrofit failed"
                    );
                    if candidate != original {
                        ledger.finish(&candidate, RetrofitState::Failed);
                    }
                    break RetrofitOutcome::Failed;
                }
            }
        };

        match outcome {
            RetrofitOutcome::Patched | RetrofitOutcome::AlreadyDone => {
                ledger.finish(&original, RetrofitState::Done)
            }
            RetrofitOutcome::Failed => ledger.finish(&original, RetrofitState::Failed),
            RetrofitOutcome::InProgress => ledger.release(&original),
        }
        outcome
    }

    /// Patch one implementation type and commit it
    fn patch(
        &self,
        identity: &TypeIdentifier,
        context: Option<&LoadScope>,
    ) -> Result<(), RetrofitError> {
        let binary = match self.runtime.locate_binary(identity)? {
            Resolution::ResolvedAt(binary) => binary,
            Resolution::NotFound => return Err(RetrofitError::TypeNotResolvable(identity.clone())),
        };

        let mut class = ClassFile::decode(&binary)?;
        if class.has_flag(flags::RETROFITTED) {
            tracing::debug!(type_name = %identity, "implementation already carries the prologue");
            return Ok(());
        }

        let index = class
            .methods
            .iter()
            .position(|m| {
                m.name == LOAD_CLASS.name
                    && m.descriptor == LOAD_CLASS.descriptor
                    && !m.is_static()
                    && !m.code.is_empty()
            })
            .ok_or_else(|| RetrofitError::MissingEntryPoint(identity.clone()))?;

        let snapshot = self.state.class_data().capture(identity, &class);
        let relaxed = self.relax_manipulated_finals(&mut class, &snapshot, context);

        let spill = class.methods[index].max_locals;
        let max_locals = spill
            .checked_add(1)
            .ok_or_else(|| RetrofitError::LocalsExhausted(identity.clone()))?;
        let sequence = prologue(&mut class.constants, spill);

        let method = &mut class.methods[index];
        let mut editor = CodeEditor::decode(&method.code)?;
        editor.prepend(sequence);
        method.code = editor.encode()?;
        method.max_locals = max_locals;
        class.flags |= flags::RETROFITTED;

        self.runtime.redefine(&[TypeDefinition {
            identity: identity.clone(),
            binary: class.encode(),
        }])?;
        tracing::info!(type_name = %identity, relaxed, "scope implementation retrofitted");
        Ok(())
    }

    /// Clear FINAL on declared methods some visible manipulation targets
    fn relax_manipulated_finals(
        &self,
        class: &mut ClassFile,
        snapshot: &BaseClassData,
        context: Option<&LoadScope>,
    ) -> usize {
        let type_name = snapshot.identity.name.as_str();
        let manipulations = self.state.registry().lookup_type(context, type_name);
        if manipulations.is_empty() {
            return 0;
        }

        let mut relaxed = 0;
        for method in class.methods.iter_mut() {
            let declared_final = snapshot
                .method(&method.name, &method.descriptor)
                .is_some_and(|m| m.is_final());
            if !declared_final {
                continue;
            }
            let requested = manipulations.iter().any(|m| {
                targets_method(m.kind(), type_name, &method.name, &method.descriptor)
            });
            if requested {
                method.access &= !access::FINAL;
                relaxed += 1;
            }
        }
        relaxed
    }
}

fn targets_method(kind: &ManipulationKind, type_name: &str, name: &str, descriptor: &str) -> bool {
    match kind {
        ManipulationKind::RelaxFinal {
            name: member,
            descriptor: wanted,
        } => member == name && wanted.as_deref().map_or(true, |d| d == descriptor),
        ManipulationKind::AddedMethod {
            owner,
            name: member,
            descriptor: wanted,
            ..
        } => owner == type_name && member == name && wanted == descriptor,
        _ => false,
    }
}

/// Auxiliary-type check prepended to `loadClass(String, boolean)`
///
/// Locals: 0 is the loader, 1 the requested name, 2 the resolve flag and
/// `spill` holds the auxiliary binary.
///
/// ```text
/// byte[] aux = AuxiliaryTypes.lookup(name, this);
/// if (aux != null) {
///     Class c = this.findLoadedClass(name);
///     if (c == null) {
///         c = this.defineClass(name, aux);
///         if (resolve) this.resolveClass(c);
///     }
///     return c;
/// }
/// ```
pub(crate) fn prologue(constants: &mut ConstantPool, spill: u16) -> Vec<Instruction> {
    let mut member =
        |entry: EntryPoint| constants.intern_member(entry.owner, entry.name, entry.descriptor);
    let lookup = member(AUX_LOOKUP);
    let find_loaded = member(FIND_LOADED_CLASS);
    let define = member(DEFINE_CLASS);
    let resolve = member(RESOLVE_CLASS);

    // Jump targets are local; 23 is the first original instruction
    const RETURN: usize = 22;
    const ORIGINAL: usize = 23;

    vec![
        Instruction::load_local(1),
        Instruction::load_local(0),
        Instruction::indexed(Opcode::InvokeStatic, lookup),
        Instruction::store_local(spill),
        Instruction::load_local(spill),
        Instruction::jump(Opcode::JmpIfNull, ORIGINAL),
        // Already defined?
        Instruction::load_local(0),
        Instruction::load_local(1),
        Instruction::indexed(Opcode::InvokeVirtual, find_loaded),
        Instruction::simple(Opcode::Dup),
        Instruction::jump(Opcode::JmpIfNotNull, RETURN),
        Instruction::simple(Opcode::Pop),
        // Define from the auxiliary binary
        Instruction::load_local(0),
        Instruction::load_local(1),
        Instruction::load_local(spill),
        Instruction::indexed(Opcode::InvokeVirtual, define),
        Instruction::load_local(2),
        Instruction::jump(Opcode::JmpIfFalse, RETURN),
        Instruction::simple(Opcode::Dup),
        Instruction::load_local(0),
        Instruction::simple(Opcode::Swap),
        Instruction::indexed(Opcode::InvokeVirtual, resolve),
        Instruction::simple(Opcode::Return),
    ]
}
