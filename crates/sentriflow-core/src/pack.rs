//! Rule-pack model: wire documents, compiled packs, loader output.
//!
//! A pack travels as a JSON document (plain file, or the plaintext inside
//! an encrypted envelope). Compiling a document validates rule identity
//! and builds every check, so a [`RulePack`] in memory is always
//! well-formed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::check::DeclarativeCheck;
use crate::diagnostics::{CoreError, CoreResult};
use crate::rule::{Rule, RuleMetadata, VendorSpec, is_valid_rule_id};

/// Default wall-clock bound for in-pack validation.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// One rule as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEntry {
    pub id: String,
    /// Short human title; optional, used by catalog tooling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<VendorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub metadata: RuleMetadata,
    pub check: DeclarativeCheck,
}

/// Disable directives a pack may carry.
///
/// Disables apply to the default rule layer only; they never remove
/// rules contributed by other packs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackDisables {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub vendors: Vec<String>,
}

impl PackDisables {
    pub fn is_empty(&self) -> bool {
        !self.all && self.rules.is_empty() && self.vendors.is_empty()
    }
}

/// Declarative validation block inside an encrypted pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackValidation {
    /// When present, the pack only loads on this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    /// When present, the license activation count may not exceed this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_activations: Option<u32>,
}

/// A full pack document on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePackDocument {
    pub name: String,
    pub version: String,
    pub publisher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disables: Option<PackDisables>,
    /// ISO-8601 expiry for encrypted packs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<PackValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_info: Option<serde_json::Value>,
}

impl RulePackDocument {
    /// Compile into an in-memory pack.
    ///
    /// Enforces the pack invariants: non-empty name, well-formed unique
    /// rule ids, compilable checks. `default_priority` is used when the
    /// document does not declare its own.
    pub fn compile(&self, default_priority: u32) -> Result<RulePack, String> {
        if self.name.is_empty() {
            return Err("pack name is empty".to_string());
        }
        if self.version.is_empty() {
            return Err("pack version is empty".to_string());
        }
        let rules = compile_entries(&self.rules)?;
        Ok(RulePack {
            name: self.name.clone(),
            version: self.version.clone(),
            publisher: self.publisher.clone(),
            priority: self.priority.unwrap_or(default_priority),
            rules,
            disables: self.disables.clone(),
        })
    }

    /// Pack metadata without the rule bodies.
    pub fn metadata(&self) -> PackMetadata {
        PackMetadata {
            name: self.name.clone(),
            version: self.version.clone(),
            publisher: self.publisher.clone(),
            description: self.description.clone(),
        }
    }
}

/// Compile wire entries into rules, enforcing id validity and uniqueness.
pub(crate) fn compile_entries(entries: &[RuleEntry]) -> Result<Vec<Rule>, String> {
    let mut seen = std::collections::HashSet::new();
    let mut rules = Vec::with_capacity(entries.len());
    for entry in entries {
        if !is_valid_rule_id(&entry.id) {
            return Err(format!("invalid rule id `{}`", entry.id));
        }
        if !seen.insert(entry.id.clone()) {
            return Err(format!("duplicate rule id `{}`", entry.id));
        }
        let check = entry
            .check
            .compile()
            .map_err(|e| format!("rule `{}`: {e}", entry.id))?;
        rules.push(Rule {
            id: entry.id.clone(),
            selector: entry.selector.clone(),
            vendor: entry.vendor.clone(),
            metadata: entry.metadata.clone(),
            check: crate::check::CheckBody::Declarative(check),
        });
    }
    Ok(rules)
}

/// An in-memory pack ready for resolution.
#[derive(Debug, Clone)]
pub struct RulePack {
    pub name: String,
    pub version: String,
    pub publisher: String,
    /// Non-negative merge priority.
    pub priority: u32,
    pub rules: Vec<Rule>,
    pub disables: Option<PackDisables>,
}

impl RulePack {
    /// A synthetic pack wrapping loose rules (config literals, JSON rule
    /// files, defaults).
    pub fn synthetic(name: impl Into<String>, priority: u32, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            version: "0".into(),
            publisher: "local".into(),
            priority,
            rules,
            disables: None,
        }
    }
}

/// Pack metadata retained after loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackMetadata {
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub description: Option<String>,
}

/// The in-memory result of loading an encrypted pack.
#[derive(Debug)]
pub struct LoadedPack {
    pub metadata: PackMetadata,
    pub rules: Vec<Rule>,
    /// ISO-8601 expiry carried by the pack, when present.
    pub valid_until: Option<String>,
    pub license_info: Option<serde_json::Value>,
    pub disables: Option<PackDisables>,
    /// Declared pack priority, when the document overrides the format
    /// default.
    pub declared_priority: Option<u32>,
}

impl LoadedPack {
    pub(crate) fn from_document(document: &RulePackDocument, rules: Vec<Rule>) -> Self {
        Self {
            metadata: document.metadata(),
            rules,
            valid_until: document.valid_until.clone(),
            license_info: document.license_info.clone(),
            disables: document.disables.clone(),
            declared_priority: document.priority,
        }
    }

    /// Convert into a resolvable pack at the given priority.
    pub fn into_pack(self, priority: u32) -> RulePack {
        RulePack {
            name: self.metadata.name,
            version: self.metadata.version,
            publisher: self.metadata.publisher,
            priority: self.declared_priority.unwrap_or(priority),
            rules: self.rules,
            disables: self.disables,
        }
    }
}

/// Context for in-pack validation of encrypted packs.
pub struct ValidationContext {
    pub machine_id: String,
    /// Returns the current activation count for the license, when the
    /// caller can supply one.
    pub activation_count: Option<Box<dyn Fn() -> u32 + Send + Sync>>,
    /// Wall-clock bound for the validation phase.
    pub timeout: Duration,
}

impl ValidationContext {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            activation_count: None,
            timeout: DEFAULT_VALIDATION_TIMEOUT,
        }
    }

    pub fn with_activation_count<F>(mut self, count: F) -> Self
    where
        F: Fn() -> u32 + Send + Sync + 'static,
    {
        self.activation_count = Some(Box::new(count));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Load an unencrypted pack file (a plain JSON pack document).
pub fn load_unencrypted(bytes: &[u8], default_priority: u32) -> CoreResult<RulePack> {
    let document: RulePackDocument =
        serde_json::from_slice(bytes).map_err(|e| CoreError::InvalidFormat {
            detail: format!("pack document: {e}"),
        })?;
    document
        .compile(default_priority)
        .map_err(|detail| CoreError::InvalidFormat { detail })
}
