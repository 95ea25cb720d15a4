//! JSON rule files: loose rules outside any pack.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{CoreError, CoreResult};
use crate::pack::{RuleEntry, compile_entries};
use crate::rule::Rule;

/// Top level of a JSON rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRuleFile {
    #[serde(default, rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub rules: Vec<RuleEntry>,
}

/// Parse a JSON rule file into compiled rules.
///
/// Rule ids must be well-formed and unique within the file; every check
/// must compile (including regex trial compilation).
pub fn parse(content: &str) -> CoreResult<Vec<Rule>> {
    let file: JsonRuleFile =
        serde_json::from_str(content).map_err(|e| CoreError::InvalidFormat {
            detail: format!("json rules: {e}"),
        })?;
    compile_entries(&file.rules).map_err(|detail| CoreError::InvalidFormat { detail })
}
