//! Structural snapshots of types taking part in manipulations

use crate::scope::{owned_by, ScopeId, TypeIdentifier};
use dashmap::{DashMap, DashSet};
use hotswap_bytecode::{access, ClassFile};
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Declared method shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodData {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Access flags as declared
    pub access: u16,
}

impl MethodData {
    /// Check for the FINAL flag
    pub fn is_final(&self) -> bool {
        self.access & access::FINAL != 0
    }
}

/// Declared field shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldData {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Access flags as declared
    pub access: u16,
}

/// Shape of a type captured before rewriting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseClassData {
    /// Type identity
    pub identity: TypeIdentifier,
    /// Superclass name
    pub super_name: Option<String>,
    /// Declared methods
    pub methods: Vec<MethodData>,
    /// Declared fields
    pub fields: Vec<FieldData>,
}

impl BaseClassData {
    /// Capture the shape of `class`
    pub fn capture(identity: TypeIdentifier, class: &ClassFile) -> Self {
        Self {
            identity,
            super_name: class.super_name.clone(),
            methods: class
                .methods
                .iter()
                .map(|m| MethodData {
                    name: m.name.clone(),
                    descriptor: m.descriptor.clone(),
                    access: m.access,
                })
                .collect(),
            fields: class
                .fields
                .iter()
                .map(|f| FieldData {
                    name: f.name.clone(),
                    descriptor: f.descriptor.clone(),
                    access: f.access,
                })
                .collect(),
        }
    }

    /// Find a declared method
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodData> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Find a declared field
    pub fn field(&self, name: &str) -> Option<&FieldData> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Methods declared here but not in `newer`
    pub fn removed_methods<'a>(
        &'a self,
        newer: &'a BaseClassData,
    ) -> impl Iterator<Item = &'a MethodData> + 'a {
        self.methods
            .iter()
            .filter(move |m| newer.method(&m.name, &m.descriptor).is_none())
    }
}

/// Snapshot store plus the set of types replaced by a redefinition
#[derive(Debug, Default)]
pub struct ClassDataStore {
    snapshots: DashMap<TypeIdentifier, Arc<BaseClassData>>,
    replaced: DashSet<TypeIdentifier>,
}

impl ClassDataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for `identity`, capturing it from `class` when absent
    pub fn capture(&self, identity: &TypeIdentifier, class: &ClassFile) -> Arc<BaseClassData> {
        self.snapshots
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(BaseClassData::capture(identity.clone(), class)))
            .clone()
    }

    /// Current snapshot
    pub fn get(&self, identity: &TypeIdentifier) -> Option<Arc<BaseClassData>> {
        self.snapshots.get(identity).map(|s| Arc::clone(s.value()))
    }

    /// Record that `identity` is being replaced
    ///
    /// The stale snapshot is dropped and returned so the next transformation
    /// of the type captures the new shape.
    pub fn mark_replaced(&self, identity: &TypeIdentifier) -> Option<Arc<BaseClassData>> {
        self.replaced.insert(identity.clone());
        self.snapshots.remove(identity).map(|(_, stale)| stale)
    }

    /// Check whether `identity` has been replaced at least once
    pub fn is_replaced(&self, identity: &TypeIdentifier) -> bool {
        self.replaced.contains(identity)
    }

    /// Drop snapshots and replacement records of scopes in `dead`
    pub fn forget_scopes(&self, dead: &FxHashSet<ScopeId>) -> usize {
        let before = self.snapshots.len();
        self.snapshots.retain(|identity, _| !owned_by(identity, dead));
        self.replaced.retain(|identity| !owned_by(identity, dead));
        before.saturating_sub(self.snapshots.len())
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check for an empty store
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotswap_bytecode::{FieldInfo, MethodInfo};

    fn widget(with_resize: bool) -> ClassFile {
        let mut class = ClassFile::new("com.example.Widget");
        class.fields.push(FieldInfo::new(access::PRIVATE, "size", "I"));
        class.methods.push(MethodInfo::new(
            access::PUBLIC | access::FINAL,
            "render",
            "()V",
            1,
            vec![],
        ));
        if with_resize {
            class.methods.push(MethodInfo::new(access::PUBLIC, "resize", "(I)V", 2, vec![]));
        }
        class
    }

    #[test]
    fn test_capture_once() {
        let store = ClassDataStore::new();
        let id = TypeIdentifier::root("com.example.Widget");

        let first = store.capture(&id, &widget(false));
        let second = store.capture(&id, &widget(true));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.method("render", "()V").unwrap().is_final());
        assert!(first.method("resize", "(I)V").is_none());
        assert_eq!(first.field("size").unwrap().descriptor, "I");
    }

    #[test]
    fn test_mark_replaced_invalidates() {
        let store = ClassDataStore::new();
        let id = TypeIdentifier::root("com.example.Widget");
        store.capture(&id, &widget(true));

        let stale = store.mark_replaced(&id).unwrap();
        assert!(store.is_replaced(&id));
        assert!(store.get(&id).is_none());

        let fresh = store.capture(&id, &widget(false));
        let removed: Vec<_> = stale.removed_methods(&fresh).map(|m| m.name.as_str()).collect();
        assert_eq!(removed, vec!["resize"]);
    }

    #[test]
    fn test_forget_scopes() {
        let store = ClassDataStore::new();
        let scope = ScopeId::new();
        let scoped = TypeIdentifier::new("com.example.Widget", Some(scope));
        let root = TypeIdentifier::root("com.example.Widget");
        store.capture(&scoped, &widget(false));
        store.capture(&root, &widget(false));
        store.mark_replaced(&scoped);
        store.capture(&scoped, &widget(true));

        let dead: FxHashSet<ScopeId> = [scope].into_iter().collect();
        assert_eq!(store.forget_scopes(&dead), 1);
        assert!(store.get(&scoped).is_none());
        assert!(!store.is_replaced(&scoped));
        assert!(store.get(&root).is_some());
    }
}
