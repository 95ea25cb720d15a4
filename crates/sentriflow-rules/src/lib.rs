//! Default validation rules for SentriFlow - network configuration linter.
//!
//! This crate carries the built-in rule layer: a JSON rule document
//! embedded at compile time plus a generated summary table. The heavy
//! lifting (check compilation, execution) lives in `sentriflow-core`;
//! keeping the data here lets tooling list and document the defaults
//! without pulling in the engine.
//!
//! # Usage
//!
//! ```
//! use sentriflow_rules::RULES_DATA;
//!
//! // RULES_DATA is a static array of (rule_id, rule_name) tuples
//! for (id, name) in RULES_DATA {
//!     println!("{}: {}", id, name);
//! }
//! ```
//!
//! # Rule Categories
//!
//! - **NET-xxx**: interface and addressing hygiene
//! - **SEC-xxx**: management-plane security
//! - **SNMP-xxx**: SNMP hardening
//! - **NTP-xxx / LOG-xxx**: time and logging baselines
//! - **CIS-xxx / JUN-xxx**: vendor-specific baselines

// Include the auto-generated rules data from build.rs
include!(concat!(env!("OUT_DIR"), "/rules_data.rs"));

/// The embedded default rule document (JSON rule-pack format).
pub const DEFAULT_RULES_JSON: &str = include_str!("../defaults.json");

/// Returns the total number of default rules.
pub fn rule_count() -> usize {
    RULES_DATA.len()
}

/// Looks up a rule by ID, returning the name if found.
pub fn get_rule_name(id: &str) -> Option<&'static str> {
    RULES_DATA
        .iter()
        .find(|(rule_id, _)| *rule_id == id)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_data_not_empty() {
        assert!(!RULES_DATA.is_empty(), "RULES_DATA should not be empty");
    }

    #[test]
    fn test_rule_count() {
        assert_eq!(rule_count(), RULES_DATA.len());
    }

    #[test]
    fn test_get_rule_name_exists() {
        // NET-001 should always exist
        let name = get_rule_name("NET-001");
        assert!(name.is_some(), "NET-001 should exist");
    }

    #[test]
    fn test_get_rule_name_not_exists() {
        let name = get_rule_name("NONEXISTENT-999");
        assert!(name.is_none(), "Nonexistent rule should return None");
    }

    #[test]
    fn test_no_duplicate_ids() {
        let mut ids: Vec<&str> = RULES_DATA.iter().map(|(id, _)| *id).collect();
        let original_len = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), original_len, "Should have no duplicate rule IDs");
    }

    #[test]
    fn test_embedded_json_parses() {
        let value: serde_json::Value = serde_json::from_str(DEFAULT_RULES_JSON).unwrap();
        assert!(value["rules"].is_array());
    }
}
