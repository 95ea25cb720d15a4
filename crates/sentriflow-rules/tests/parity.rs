//! Parity between the generated summary table and the embedded JSON.

use sentriflow_rules::{DEFAULT_RULES_JSON, RULES_DATA, get_rule_name, rule_count};

fn embedded_rules() -> Vec<(String, String)> {
    let document: serde_json::Value = serde_json::from_str(DEFAULT_RULES_JSON).unwrap();
    document["rules"]
        .as_array()
        .unwrap()
        .iter()
        .map(|rule| {
            (
                rule["id"].as_str().unwrap().to_string(),
                rule["name"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[test]
fn summary_table_matches_embedded_json() {
    let embedded = embedded_rules();
    assert_eq!(embedded.len(), rule_count());
    for (id, name) in &embedded {
        assert_eq!(
            get_rule_name(id),
            Some(name.as_str()),
            "summary table out of sync for {id}"
        );
    }
}

#[test]
fn table_order_follows_json_order() {
    let embedded = embedded_rules();
    for ((table_id, _), (json_id, _)) in RULES_DATA.iter().zip(embedded.iter()) {
        assert_eq!(table_id, json_id);
    }
}

#[test]
fn every_rule_has_metadata_level() {
    let document: serde_json::Value = serde_json::from_str(DEFAULT_RULES_JSON).unwrap();
    for rule in document["rules"].as_array().unwrap() {
        let level = rule["metadata"]["level"].as_str().unwrap();
        assert!(
            matches!(level, "error" | "warning" | "info"),
            "rule {} has unexpected level {level}",
            rule["id"]
        );
    }
}
