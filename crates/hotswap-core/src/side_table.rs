//! Per-instance storage for fields added by a redefinition
//!
//! The host runtime cannot add a field to an already-loaded type, so
//! rewritten code reads and writes added fields through the
//! `hotswap.runtime.FieldTable` entry points instead, and those land here.

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A static method the rewritten code calls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    /// Declaring type
    pub owner: &'static str,
    /// Method name
    pub name: &'static str,
    /// Method descriptor
    pub descriptor: &'static str,
}

/// Runtime type hosting the field side-table entry points
pub const FIELD_TABLE_TYPE: &str = "hotswap.runtime.FieldTable";

/// `Object get(Object instance, String name)`
pub const FIELD_GET: EntryPoint = EntryPoint {
    owner: FIELD_TABLE_TYPE,
    name: "get",
    descriptor: "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;",
};

/// `void put(Object instance, Object value, String name)`
pub const FIELD_PUT: EntryPoint = EntryPoint {
    owner: FIELD_TABLE_TYPE,
    name: "put",
    descriptor: "(Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/String;)V",
};

/// `Object getStatic(String type, String name)`
pub const FIELD_GET_STATIC: EntryPoint = EntryPoint {
    owner: FIELD_TABLE_TYPE,
    name: "getStatic",
    descriptor: "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/Object;",
};

/// `void putStatic(Object value, String type, String name)`
pub const FIELD_PUT_STATIC: EntryPoint = EntryPoint {
    owner: FIELD_TABLE_TYPE,
    name: "putStatic",
    descriptor: "(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)V",
};

/// Identity of a live object, as handed over by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

/// Opaque field value
pub type FieldValue = Arc<dyn Any + Send + Sync>;

/// Storage behind the field side-table entry points
pub trait AttributeStore: Send + Sync {
    /// Read an added instance field; `None` is the field's null/zero value
    fn get(&self, instance: InstanceId, name: &str) -> Option<FieldValue>;

    /// Write an added instance field; `None` clears it
    fn set(&self, instance: InstanceId, name: &str, value: Option<FieldValue>);

    /// Read an added static field of `type_name`
    fn get_static(&self, type_name: &str, name: &str) -> Option<FieldValue>;

    /// Write an added static field of `type_name`; `None` clears it
    fn set_static(&self, type_name: &str, name: &str, value: Option<FieldValue>);

    /// Drop everything stored for a collected instance
    fn forget(&self, instance: InstanceId);
}

/// In-process [`AttributeStore`]
#[derive(Default)]
pub struct FieldTable {
    instances: DashMap<InstanceId, FxHashMap<String, FieldValue>>,
    statics: DashMap<String, FxHashMap<String, FieldValue>>,
}

impl FieldTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instances with at least one stored field
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

impl fmt::Debug for FieldTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTable")
            .field("instances", &self.instances.len())
            .field("statics", &self.statics.len())
            .finish()
    }
}

fn write_slot<K>(
    map: &DashMap<K, FxHashMap<String, FieldValue>>,
    key: K,
    name: &str,
    value: Option<FieldValue>,
) where
    K: Eq + std::hash::Hash,
{
    match value {
        Some(value) => {
            map.entry(key).or_default().insert(name.to_string(), value);
        }
        None => {
            // Remove the whole row once its last field is cleared
            map.remove_if_mut(&key, |_, fields| {
                fields.remove(name);
                fields.is_empty()
            });
        }
    }
}

impl AttributeStore for FieldTable {
    fn get(&self, instance: InstanceId, name: &str) -> Option<FieldValue> {
        self.instances
            .get(&instance)
            .and_then(|fields| fields.get(name).cloned())
    }

    fn set(&self, instance: InstanceId, name: &str, value: Option<FieldValue>) {
        write_slot(&self.instances, instance, name, value);
    }

    fn get_static(&self, type_name: &str, name: &str) -> Option<FieldValue> {
        self.statics
            .get(type_name)
            .and_then(|fields| fields.get(name).cloned())
    }

    fn set_static(&self, type_name: &str, name: &str, value: Option<FieldValue>) {
        write_slot(&self.statics, type_name.to_string(), name, value);
    }

    fn forget(&self, instance: InstanceId) {
        self.instances.remove(&instance);
    }
}
