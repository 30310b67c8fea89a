//! Manipulation plans (TOML)
//!
//! A plan lists manipulations to install, one `[[manipulation]]` table each:
//!
//! ```toml
//! [[manipulation]]
//! type = "com.example.Widget"
//! kind = "added-method"
//! owner = "com.example.Widget"
//! name = "resize"
//! descriptor = "(II)V"
//! access = ["public"]
//! proxy = "com.example.Widget$Proxy"
//! ```

use crate::manipulation::{Manipulation, ManipulationKind};
use crate::scope::LoadScope;
use hotswap_bytecode::{access, FieldType, MemberRef, MethodDescriptor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while loading a plan
#[derive(Debug, Error)]
pub enum PlanError {
    /// Failed to read plan file
    #[error("Failed to read plan file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse plan: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid plan: {0}")]
    ValidationError(String),
}

/// Manipulation kind as written in a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanKind {
    /// Added field access
    AddedField,
    /// Added method access
    AddedMethod,
    /// Final relaxation
    RelaxFinal,
    /// Call-site rewrite
    RewriteCallSite,
}

/// One `[[manipulation]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanEntry {
    /// Type the manipulation applies to
    #[serde(rename = "type")]
    pub type_name: String,

    /// Manipulation kind
    pub kind: PlanKind,

    /// Declaring type of the member (defaults to `type`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Member name
    pub name: String,

    /// Member descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,

    /// Access flags granted (`public`, `private`, `protected`, `static`, `final`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access: Vec<String>,

    /// Trampoline type for added methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Indirection owner for call-site rewrites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_owner: Option<String>,

    /// Indirection name (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    /// Indirection descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_descriptor: Option<String>,

    /// Visible to every load scope
    #[serde(default)]
    pub global: bool,
}

/// A parsed manipulation plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManipulationPlan {
    /// Entries in file order
    #[serde(default, rename = "manipulation")]
    pub manipulations: Vec<PlanEntry>,
}

impl ManipulationPlan {
    /// Parse a plan from a file
    pub fn from_file(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a plan from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, PlanError> {
        let plan: ManipulationPlan = toml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Validate every entry
    pub fn validate(&self) -> Result<(), PlanError> {
        for (index, entry) in self.manipulations.iter().enumerate() {
            entry.to_kind().map_err(|reason| {
                PlanError::ValidationError(format!("manipulation #{}: {}", index + 1, reason))
            })?;
        }
        Ok(())
    }

    /// Build `(type name, manipulation)` pairs owned by `scope`
    ///
    /// Entries marked `global` are scope-less regardless of `scope`.
    pub fn to_manipulations(
        &self,
        scope: Option<&Arc<LoadScope>>,
    ) -> Result<Vec<(String, Manipulation)>, PlanError> {
        self.manipulations
            .iter()
            .map(|entry| {
                let kind = entry.to_kind().map_err(PlanError::ValidationError)?;
                let manipulation = if entry.global {
                    Manipulation::global(kind)
                } else {
                    Manipulation::new(kind, scope)
                };
                Ok((entry.type_name.clone(), manipulation))
            })
            .collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.manipulations.len()
    }

    /// Check for an empty plan
    pub fn is_empty(&self) -> bool {
        self.manipulations.is_empty()
    }
}

impl PlanEntry {
    fn owner(&self) -> String {
        self.owner.clone().unwrap_or_else(|| self.type_name.clone())
    }

    fn access_flags(&self) -> Result<u16, String> {
        self.access.iter().try_fold(0u16, |flags, word| {
            let flag = match word.as_str() {
                "public" => access::PUBLIC,
                "private" => access::PRIVATE,
                "protected" => access::PROTECTED,
                "static" => access::STATIC,
                "final" => access::FINAL,
                other => return Err(format!("unknown access flag '{}'", other)),
            };
            Ok(flags | flag)
        })
    }

    fn require<'a>(&self, value: &'a Option<String>, key: &str) -> Result<&'a str, String> {
        value
            .as_deref()
            .ok_or_else(|| {
                format!("{} on {} requires '{}'", self.kind_label(), self.type_name, key)
            })
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            PlanKind::AddedField => "added-field",
            PlanKind::AddedMethod => "added-method",
            PlanKind::RelaxFinal => "relax-final",
            PlanKind::RewriteCallSite => "rewrite-call-site",
        }
    }

    /// Convert to a manipulation kind
    pub fn to_kind(&self) -> Result<ManipulationKind, String> {
        if self.type_name.is_empty() || self.name.is_empty() {
            return Err("type and name cannot be empty".to_string());
        }

        match self.kind {
            PlanKind::AddedField => {
                let descriptor = self.require(&self.descriptor, "descriptor")?;
                FieldType::parse(descriptor).map_err(|e| e.to_string())?;
                Ok(Manipulation::added_field(
                    self.owner(),
                    &self.name,
                    descriptor,
                    self.access_flags()?,
                ))
            }
            PlanKind::AddedMethod => {
                let descriptor = self.require(&self.descriptor, "descriptor")?;
                MethodDescriptor::parse(descriptor).map_err(|e| e.to_string())?;
                let proxy = self.require(&self.proxy, "proxy")?;
                Ok(Manipulation::added_method(
                    self.owner(),
                    &self.name,
                    descriptor,
                    self.access_flags()?,
                    proxy,
                ))
            }
            PlanKind::RelaxFinal => Ok(Manipulation::relax_final(
                &self.name,
                self.descriptor.clone(),
            )),
            PlanKind::RewriteCallSite => {
                let descriptor = self.require(&self.descriptor, "descriptor")?;
                let target_owner = self.require(&self.target_owner, "target_owner")?;
                let target_descriptor = self.require(&self.target_descriptor, "target_descriptor")?;
                MethodDescriptor::parse(descriptor).map_err(|e| e.to_string())?;
                MethodDescriptor::parse(target_descriptor).map_err(|e| e.to_string())?;
                let target_name = self.target_name.as_deref().unwrap_or(&self.name);
                Ok(Manipulation::rewrite_call_site(
                    MemberRef::new(self.owner(), &self.name, descriptor),
                    MemberRef::new(target_owner, target_name, target_descriptor),
                ))
            }
        }
    }
}
