//! Cross-crate scenarios: pack building, resolution and execution
//! working together end to end.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use sentriflow_core::check::CheckContext;
use sentriflow_core::diagnostics::ErrorCode;
use sentriflow_core::executor::{ExecutorOptions, RuleExecutor};
use sentriflow_core::grx2::{self, Grx2BuildOptions};
use sentriflow_core::helpers::HelperRegistry;
use sentriflow_core::node::ConfigNode;
use sentriflow_core::orchestrator::{ResolveOptions, resolve_rules};
use sentriflow_core::pack::RulePackDocument;
use sentriflow_core::rule::Severity;

const LICENSE: &str = "ENTR-TEST-1234-WXYZ";

fn pack_with_net001(level: &str) -> String {
    format!(
        r#"{{
            "name": "override-{level}",
            "version": "1.0.0",
            "publisher": "tests",
            "rules": [
                {{
                    "id": "NET-001",
                    "selector": "interface-*",
                    "vendor": "common",
                    "metadata": {{"level": "{level}"}},
                    "check": {{"type": "match", "pattern": "mtu \\d+"}}
                }}
            ]
        }}"#
    )
}

fn options_in(dir: &TempDir) -> ResolveOptions {
    ResolveOptions {
        cwd: Some(dir.path().to_path_buf()),
        ..ResolveOptions::default()
    }
}

/// Scenario: defaults carry NET-001 at warning, a config-declared layer
/// overrides it to error at priority 50, and a GRX2 pack at priority 300
/// overrides again to info. The highest priority wins.
#[test]
fn merge_priority_chain_ends_at_the_grx2_pack() {
    let dir = TempDir::new().unwrap();

    // Defaults layer: NET-001 is a warning.
    let defaults_level = resolve_rules(&options_in(&dir))
        .unwrap()
        .rule_set
        .get("NET-001")
        .unwrap()
        .rule
        .metadata
        .level;
    assert_eq!(defaults_level, Severity::Warning);

    // Config inline rules override at priority 50.
    fs::write(
        dir.path().join("sentriflow.config.json"),
        r#"{
            "rules": [
                {
                    "id": "NET-001",
                    "selector": "interface-*",
                    "metadata": {"level": "error"},
                    "check": {"type": "match", "pattern": "mtu \\d+"}
                }
            ]
        }"#,
    )
    .unwrap();

    // GRX2 pack overrides once more at priority 300.
    let document: RulePackDocument = serde_json::from_str(&pack_with_net001("info")).unwrap();
    let grx2_path = dir.path().join("site.grx2");
    fs::write(
        &grx2_path,
        grx2::build(&document, LICENSE, &Grx2BuildOptions::portable()).unwrap(),
    )
    .unwrap();

    let options = ResolveOptions {
        packs: vec![grx2_path],
        license_key: Some(LICENSE.into()),
        ..options_in(&dir)
    };
    let outcome = resolve_rules(&options).unwrap();
    let resolved = outcome.rule_set.get("NET-001").unwrap();
    assert_eq!(resolved.rule.metadata.level, Severity::Info);
    assert_eq!(resolved.source_priority, 300);
}

/// Scenario: a pack's `disables` removes a default rule regardless of
/// `includeDefaults`.
#[test]
fn pack_disables_remove_the_default() {
    let dir = TempDir::new().unwrap();
    let pack_path = dir.path().join("disabling.pack.json");
    fs::write(
        &pack_path,
        r#"{
            "name": "disabling",
            "version": "1.0.0",
            "publisher": "tests",
            "rules": [],
            "disables": {"rules": ["SEC-010"]}
        }"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("sentriflow.config.json"),
        r#"{"rulePacks": [{"path": "disabling.pack.json"}], "includeDefaults": true}"#,
    )
    .unwrap();

    let outcome = resolve_rules(&options_in(&dir)).unwrap();
    assert!(!outcome.rule_set.contains("SEC-010"));
    // Other defaults are untouched.
    assert!(outcome.rule_set.contains("SEC-001"));
}

/// Scenario: vendor filtering keeps `common` and unscoped rules, drops
/// other vendors.
#[test]
fn vendor_filter_keeps_common_and_matching_rules() {
    let dir = TempDir::new().unwrap();
    let rules_path = dir.path().join("mixed.json");
    fs::write(
        &rules_path,
        r#"{
            "rules": [
                {
                    "id": "ONLY-JUNOS",
                    "vendor": ["juniper-junos"],
                    "metadata": {"level": "error"},
                    "check": {"type": "contains", "text": "x"}
                },
                {
                    "id": "COMMON-AND-IOS",
                    "vendor": ["common", "cisco-ios"],
                    "metadata": {"level": "error"},
                    "check": {"type": "contains", "text": "x"}
                },
                {
                    "id": "NO-VENDOR",
                    "metadata": {"level": "error"},
                    "check": {"type": "contains", "text": "x"}
                }
            ]
        }"#,
    )
    .unwrap();

    let options = ResolveOptions {
        json_rules: vec![rules_path],
        vendor: Some("cisco-ios".into()),
        ..options_in(&dir)
    };
    let outcome = resolve_rules(&options).unwrap();
    assert!(!outcome.rule_set.contains("ONLY-JUNOS"));
    assert!(outcome.rule_set.contains("COMMON-AND-IOS"));
    assert!(outcome.rule_set.contains("NO-VENDOR"));
}

/// Scenario: a rule that overruns its budget on every node is disabled
/// after the configured number of timeouts.
#[test]
fn chronically_slow_rule_is_disabled_mid_scan() {
    use sentriflow_core::check::CheckBody;
    use sentriflow_core::rule::{Rule, RuleMetadata};

    let slow = Rule {
        id: "SLOW-SCAN".into(),
        selector: None,
        vendor: None,
        metadata: RuleMetadata::with_level(Severity::Warning),
        check: CheckBody::native(|_, _| {
            std::thread::sleep(Duration::from_millis(8));
            Ok(true)
        }),
    };
    let mut executor = RuleExecutor::with_options(ExecutorOptions {
        timeout: Duration::from_millis(1),
        max_timeouts: 3,
    });
    let ctx = CheckContext::new(HelperRegistry::global());
    let node = ConfigNode::leaf("n", "");

    let mut produced = 0;
    for _ in 0..6 {
        if executor.execute(&slow, &node, &ctx).is_some() {
            produced += 1;
        }
    }
    assert_eq!(produced, 3, "only the first three invocations run");
    assert!(executor.disabled_rules().contains("SLOW-SCAN"));
}

/// Scenario: three packs with a corrupt one in the middle. Strict mode
/// aborts at the middle pack; lenient mode loads both good ones.
#[test]
fn strict_and_lenient_differ_on_the_corrupt_middle_pack() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.pack.json");
    fs::write(
        &first,
        r#"{"name": "first", "version": "1", "publisher": "t",
           "rules": [{"id": "FIRST-001", "metadata": {"level": "info"},
                      "check": {"type": "contains", "text": "a"}}]}"#,
    )
    .unwrap();
    let middle = dir.path().join("middle.pack.json");
    fs::write(&middle, b"{ definitely broken").unwrap();
    let third = dir.path().join("third.pack.json");
    fs::write(
        &third,
        r#"{"name": "third", "version": "1", "publisher": "t",
           "rules": [{"id": "THIRD-001", "metadata": {"level": "info"},
                      "check": {"type": "contains", "text": "b"}}]}"#,
    )
    .unwrap();

    let strict = ResolveOptions {
        packs: vec![first.clone(), middle.clone(), third.clone()],
        strict: true,
        ..options_in(&dir)
    };
    assert!(resolve_rules(&strict).is_err());

    let lenient = ResolveOptions {
        packs: vec![first, middle, third],
        strict: false,
        ..options_in(&dir)
    };
    let outcome = resolve_rules(&lenient).unwrap();
    assert!(outcome.rule_set.contains("FIRST-001"));
    assert!(outcome.rule_set.contains("THIRD-001"));
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].source, "middle.pack.json");
}

/// Scenario: portable vs machine-bound GRX2 packs on a foreign machine.
#[test]
fn portable_loads_everywhere_bound_pack_does_not() {
    let dir = TempDir::new().unwrap();
    let document: RulePackDocument = serde_json::from_str(
        r#"{"name": "pair", "version": "1", "publisher": "t",
            "rules": [{"id": "PAIR-001", "metadata": {"level": "info"},
                       "check": {"type": "contains", "text": "x"}}]}"#,
    )
    .unwrap();

    let portable = dir.path().join("portable.grx2");
    fs::write(
        &portable,
        grx2::build(&document, LICENSE, &Grx2BuildOptions::portable()).unwrap(),
    )
    .unwrap();
    let bound = dir.path().join("bound.grx2");
    fs::write(
        &bound,
        grx2::build(&document, LICENSE, &Grx2BuildOptions::bound_to("M1")).unwrap(),
    )
    .unwrap();

    // On machine M2, the portable pack loads and the bound pack fails
    // with the opaque decryption error.
    let options = ResolveOptions {
        packs: vec![portable, bound],
        license_key: Some(LICENSE.into()),
        machine_id: Some("M2".into()),
        ..options_in(&dir)
    };
    let outcome = resolve_rules(&options).unwrap();
    assert!(outcome.rule_set.contains("PAIR-001"));
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].source, "bound.grx2");
    assert_eq!(outcome.errors[0].error.code(), ErrorCode::DecryptionFailed);
}

/// The default rule layer ships non-empty and indexed.
#[test]
fn default_layer_is_present_and_catalogued() {
    assert!(sentriflow_rules::rule_count() > 0);
    let dir = TempDir::new().unwrap();
    let outcome = resolve_rules(&options_in(&dir)).unwrap();
    assert_eq!(outcome.rule_set.len(), sentriflow_rules::rule_count());
    for (id, _) in sentriflow_rules::RULES_DATA {
        assert!(outcome.rule_set.contains(id), "missing default {id}");
    }
}
