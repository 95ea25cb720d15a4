//! Build script for sentriflow-rules.
//!
//! Generates the static rule summary table from defaults.json at compile
//! time, so the id/name listing is queryable without parsing JSON at
//! runtime.

use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let rules_path = Path::new(&manifest_dir).join("defaults.json");
    println!("cargo:rerun-if-changed={}", rules_path.display());

    let rules_json = fs::read_to_string(&rules_path).unwrap_or_else(|e| {
        panic!(
            "Failed to read defaults.json at {}: {}",
            rules_path.display(),
            e
        )
    });

    // Parse to validate structure before generating code.
    let document: serde_json::Value = serde_json::from_str(&rules_json).unwrap_or_else(|e| {
        panic!(
            "Failed to parse defaults.json at {}: {}",
            rules_path.display(),
            e
        )
    });

    let rules = document["rules"]
        .as_array()
        .expect("defaults.json must have a 'rules' array");

    let mut generated = String::new();
    generated.push_str("/// Default rule summary table: `(rule_id, rule_name)` pairs.\n");
    generated.push_str("pub static RULES_DATA: &[(&str, &str)] = &[\n");
    for rule in rules {
        let id = rule["id"]
            .as_str()
            .expect("every rule in defaults.json needs a string 'id'");
        let name = rule["name"]
            .as_str()
            .expect("every rule in defaults.json needs a string 'name'");
        generated.push_str(&format!("    ({id:?}, {name:?}),\n"));
    }
    generated.push_str("];\n");

    let out_dir = env::var("OUT_DIR").unwrap();
    let out_path = Path::new(&out_dir).join("rules_data.rs");
    fs::write(&out_path, generated).unwrap_or_else(|e| {
        panic!("Failed to write {}: {}", out_path.display(), e);
    });
}
