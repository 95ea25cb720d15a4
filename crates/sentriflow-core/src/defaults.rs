//! The built-in default rule layer.
//!
//! Default rules ship as a JSON rule document embedded in the
//! `sentriflow-rules` crate and are compiled once per process. The
//! compiled set is read-only; the resolver clones individual rules into
//! each scan's rule set.

use std::sync::OnceLock;

use crate::pack::RulePackDocument;
use crate::rule::Rule;

/// Priority of the default rule layer.
pub const DEFAULTS_PRIORITY: u32 = 0;

/// The compiled default rules.
///
/// The embedded document is validated by `sentriflow-rules`' build
/// script, so compilation failures here indicate a packaging defect; in
/// that case the defaults layer is empty and a diagnostic is logged.
pub fn default_rules() -> &'static [Rule] {
    static DEFAULTS: OnceLock<Vec<Rule>> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        let document: RulePackDocument =
            match serde_json::from_str(sentriflow_rules::DEFAULT_RULES_JSON) {
                Ok(document) => document,
                Err(e) => {
                    tracing::error!(error = %e, "embedded default rules failed to parse");
                    return Vec::new();
                }
            };
        match crate::pack::compile_entries(&document.rules) {
            Ok(rules) => rules,
            Err(detail) => {
                tracing::error!(%detail, "embedded default rules failed to compile");
                Vec::new()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_compile_and_are_nonempty() {
        let rules = default_rules();
        assert!(!rules.is_empty());
    }

    #[test]
    fn defaults_match_the_summary_table() {
        let rules = default_rules();
        assert_eq!(rules.len(), sentriflow_rules::rule_count());
        for rule in rules {
            assert!(
                sentriflow_rules::get_rule_name(&rule.id).is_some(),
                "rule {} missing from RULES_DATA",
                rule.id
            );
        }
    }

    #[test]
    fn defaults_ids_are_unique() {
        let rules = default_rules();
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        let original = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), original);
    }
}
