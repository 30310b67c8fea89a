//! In-memory runtime and class fixtures shared by the integration tests

#![allow(dead_code)]

use hotswap_bytecode::{access, BytecodeWriter, ClassFile, MethodInfo};
use hotswap_core::retrofit::LOAD_CLASS;
use hotswap_core::{
    CommitReport, LoadScope, Resolution, Runtime, RuntimeError, TransformError, TypeDefinition,
    TypeIdentifier, TypeTransformer,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Runtime double holding loaded binaries in memory
///
/// `load` runs the registered hook the way a real runtime does on first
/// definition. `redefine` does not, the coordinator transforms beforehand.
#[derive(Default)]
pub struct MemoryRuntime {
    binaries: Mutex<FxHashMap<TypeIdentifier, Vec<u8>>>,
    superclasses: Mutex<FxHashMap<TypeIdentifier, TypeIdentifier>>,
    transformer: RwLock<Option<Arc<dyn TypeTransformer>>>,
    needs_retransform: Mutex<Vec<TypeIdentifier>>,
    retransformed: Mutex<Vec<TypeIdentifier>>,
    fail_commit: AtomicBool,
    commit_delay: Mutex<Option<Duration>>,
    redefine_calls: AtomicUsize,
}

impl MemoryRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make a type loaded without running the hook
    pub fn install(&self, identity: TypeIdentifier, binary: Vec<u8>) {
        self.binaries.lock().insert(identity, binary);
    }

    pub fn set_superclass(&self, child: TypeIdentifier, parent: TypeIdentifier) {
        self.superclasses.lock().insert(child, parent);
    }

    /// Define `name` in `scope`, running the registered hook
    pub fn load(
        &self,
        name: &str,
        scope: Option<&Arc<LoadScope>>,
        binary: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let transformer = self.transformer.read().clone();
        let defined = match transformer {
            Some(transformer) => transformer.transform(name, scope, binary)?.into_owned(),
            None => binary.to_vec(),
        };
        self.install(TypeIdentifier::in_scope(name, scope), defined.clone());
        Ok(defined)
    }

    pub fn binary(&self, identity: &TypeIdentifier) -> Option<Vec<u8>> {
        self.binaries.lock().get(identity).cloned()
    }

    pub fn class(&self, identity: &TypeIdentifier) -> Option<ClassFile> {
        self.binary(identity)
            .map(|binary| ClassFile::decode(&binary).unwrap())
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Slow every commit down to widen race windows
    pub fn delay_commits(&self, delay: Duration) {
        *self.commit_delay.lock() = Some(delay);
    }

    /// Report `identity` as needing a full reload when committed
    pub fn require_retransform(&self, identity: TypeIdentifier) {
        self.needs_retransform.lock().push(identity);
    }

    pub fn retransformed(&self) -> Vec<TypeIdentifier> {
        self.retransformed.lock().clone()
    }

    pub fn redefine_calls(&self) -> usize {
        self.redefine_calls.load(Ordering::SeqCst)
    }

    pub fn has_transformer(&self) -> bool {
        self.transformer.read().is_some()
    }
}

impl Runtime for MemoryRuntime {
    fn redefine(&self, definitions: &[TypeDefinition]) -> Result<CommitReport, RuntimeError> {
        self.redefine_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.commit_delay.lock() {
            std::thread::sleep(delay);
        }
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(RuntimeError::Other("commit refused".to_string()));
        }

        let mut binaries = self.binaries.lock();
        for definition in definitions {
            if !binaries.contains_key(&definition.identity) {
                return Err(RuntimeError::NotLoaded(definition.identity.clone()));
            }
            if let Err(error) = ClassFile::decode(&definition.binary) {
                return Err(RuntimeError::Rejected {
                    identity: definition.identity.clone(),
                    reason: error.to_string(),
                });
            }
        }
        for definition in definitions {
            binaries.insert(definition.identity.clone(), definition.binary.clone());
        }

        let needs = self.needs_retransform.lock();
        Ok(CommitReport {
            requires_retransform: definitions
                .iter()
                .map(|d| d.identity.clone())
                .filter(|identity| needs.contains(identity))
                .collect(),
        })
    }

    fn retransform(&self, types: &[TypeIdentifier]) -> Result<(), RuntimeError> {
        self.retransformed.lock().extend_from_slice(types);
        Ok(())
    }

    fn locate_binary(&self, identity: &TypeIdentifier) -> Result<Resolution, RuntimeError> {
        Ok(match self.binaries.lock().get(identity) {
            Some(binary) => Resolution::ResolvedAt(binary.clone()),
            None => Resolution::NotFound,
        })
    }

    fn superclass(&self, identity: &TypeIdentifier) -> Option<TypeIdentifier> {
        self.superclasses.lock().get(identity).cloned()
    }

    fn register_transformer(&self, transformer: Arc<dyn TypeTransformer>) {
        *self.transformer.write() = Some(transformer);
    }
}

// ===== Fixtures =====

fn body(emit: impl FnOnce(&mut BytecodeWriter)) -> Vec<u8> {
    let mut code = BytecodeWriter::new();
    emit(&mut code);
    code.into_bytes()
}

/// A scope implementation declaring `loadClass(String, boolean)`
pub fn loader_class(name: &str, super_name: &str) -> ClassFile {
    let mut class = ClassFile::new(name);
    class.super_name = Some(super_name.to_string());
    let parent = class
        .constants
        .intern_member(super_name, LOAD_CLASS.name, LOAD_CLASS.descriptor);
    let code = body(|code| {
        code.emit_load_local(0);
        code.emit_load_local(1);
        code.emit_load_local(2);
        code.emit_invoke_special(parent);
        code.emit_return();
    });
    class.methods.push(MethodInfo::new(
        access::PUBLIC,
        LOAD_CLASS.name,
        LOAD_CLASS.descriptor,
        3,
        code,
    ));
    class
}

/// A scope implementation that inherits its entry point
pub fn delegating_loader_class(name: &str, super_name: &str) -> ClassFile {
    let mut class = ClassFile::new(name);
    class.super_name = Some(super_name.to_string());
    class
}

/// `Widget` with a private final `resize(II)V` and a `grow()V` calling it
pub fn widget_class() -> ClassFile {
    let mut class = ClassFile::new("com.example.Widget");
    let resize = class
        .constants
        .intern_member("com.example.Widget", "resize", "(II)V");
    class.methods.push(MethodInfo::new(
        access::PRIVATE | access::FINAL,
        "resize",
        "(II)V",
        3,
        body(|code| code.emit_return_void()),
    ));
    class.methods.push(MethodInfo::new(
        access::PUBLIC,
        "grow",
        "()V",
        1,
        body(|code| {
            code.emit_load_local(0);
            code.emit_const_i32(4);
            code.emit_const_i32(3);
            code.emit_invoke_virtual(resize);
            code.emit_return_void();
        }),
    ));
    class
}

/// A minimal class with one final method
pub fn plain_class(name: &str) -> ClassFile {
    let mut class = ClassFile::new(name);
    class.methods.push(MethodInfo::new(
        access::PUBLIC | access::FINAL,
        "run",
        "()V",
        1,
        body(|code| code.emit_return_void()),
    ));
    class
}
