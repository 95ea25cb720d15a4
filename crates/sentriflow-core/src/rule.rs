//! Rule data model: identity, metadata, vendors, and results.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::check::CheckBody;

/// The vendor name that means "applies to every vendor".
pub const COMMON_VENDOR: &str = "common";

/// Validate a rule id against the canonical shape
/// (`NET-001`, `SEC-010-EXT`, `ACL_BASE`).
pub fn is_valid_rule_id(id: &str) -> bool {
    static RULE_ID: OnceLock<Regex> = OnceLock::new();
    let re = RULE_ID.get_or_init(|| {
        Regex::new(r"^[A-Z][A-Z0-9_]*(-[A-Z0-9_]+)*$").expect("rule id pattern is a valid regex")
    });
    re.is_match(id)
}

/// Diagnostic severity carried by rule metadata and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Optional security classification for a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetadata {
    #[serde(default)]
    pub cwe: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_vector: Option<String>,
}

/// Metadata attached to every rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetadata {
    pub level: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RuleMetadata {
    /// Minimal metadata with just a severity level.
    pub fn with_level(level: Severity) -> Self {
        Self {
            level,
            obu: None,
            owner: None,
            remediation: None,
            security: None,
            tags: Vec::new(),
        }
    }
}

/// Vendor scope of a rule: a single vendor name or a set.
///
/// The name `common` in either form means the rule applies to every vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VendorSpec {
    One(String),
    Many(Vec<String>),
}

impl VendorSpec {
    /// Whether this rule should run when filtering for `vendor`.
    pub fn applies_to(&self, vendor: &str) -> bool {
        self.names()
            .any(|v| v == vendor || v == COMMON_VENDOR)
    }

    /// Whether the spec names the given vendor explicitly (no `common` pass).
    pub fn names_vendor(&self, vendor: &str) -> bool {
        self.names().any(|v| v == vendor)
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        match self {
            VendorSpec::One(name) => std::slice::from_ref(name).iter(),
            VendorSpec::Many(names) => names.iter(),
        }
        .map(String::as_str)
    }
}

/// A validation rule: identity, scope, metadata, and a check behavior.
///
/// Invariant: `id` is unique within any one pack (enforced at pack
/// compile time, see [`crate::pack`]).
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    /// Matches node ids in the configuration tree; `None` runs everywhere.
    pub selector: Option<String>,
    /// Vendor scope; `None` behaves like `common`.
    pub vendor: Option<VendorSpec>,
    pub metadata: RuleMetadata,
    pub check: CheckBody,
}

impl Rule {
    /// Whether this rule applies to the given node.
    pub fn applies_to_node(&self, node: &crate::node::ConfigNode) -> bool {
        match &self.selector {
            Some(selector) => node.matches_selector(selector),
            None => true,
        }
    }

    /// Whether this rule survives a vendor filter.
    pub fn applies_to_vendor(&self, vendor: &str) -> bool {
        match &self.vendor {
            Some(spec) => spec.applies_to(vendor),
            None => true,
        }
    }
}

/// The outcome of executing one rule against one node.
///
/// Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub passed: bool,
    pub rule_id: String,
    pub node_id: String,
    pub level: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<usize>,
}

impl RuleResult {
    /// Build a result from a pass/fail outcome, pulling the failure message
    /// from the rule's remediation text when present.
    pub fn from_outcome(rule: &Rule, node: &crate::node::ConfigNode, passed: bool) -> Self {
        let message = if passed {
            "Check passed".to_string()
        } else {
            rule.metadata
                .remediation
                .clone()
                .unwrap_or_else(|| "Configuration check failed".to_string())
        };
        Self {
            passed,
            rule_id: rule.id.clone(),
            node_id: node.id.clone(),
            level: rule.metadata.level,
            message,
            loc: node.line,
        }
    }

    /// Synthetic failing result for a rule whose check errored.
    ///
    /// The raw error is never surfaced here; callers log it separately.
    pub fn execution_failure(rule: &Rule, node: &crate::node::ConfigNode) -> Self {
        Self {
            passed: false,
            rule_id: rule.id.clone(),
            node_id: node.id.clone(),
            level: rule.metadata.level,
            message: "Rule execution failed".to_string(),
            loc: node.line,
        }
    }
}
