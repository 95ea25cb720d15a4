//! Resolve orchestration: config, sources, loaders, and failure policy.
//!
//! The orchestrator turns caller options into the final rule set: it
//! discovers and loads the config file, enumerates every pack source in
//! the fixed priority schedule, routes each file through the path gate
//! and format detection to the right loader, and applies the
//! strict/lenient failure policy before handing the packs to the
//! resolver.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{self, SentriFlowConfig};
use crate::diagnostics::{CoreError, CoreResult};
use crate::format::{self, PackFormat};
use crate::grpx;
use crate::grx2;
use crate::json_rules;
use crate::license::{self, License};
use crate::pack::{self, DEFAULT_VALIDATION_TIMEOUT, RulePack, ValidationContext};
use crate::path_gate::{self, PathKind, PathPolicy};
use crate::resolver::{self, ResolvedRuleSet, ResolverOptions};

/// Priority of inline config rules and the CLI `--rules` file.
const LEGACY_RULES_PRIORITY: u32 = 50;
/// Priority of config-declared JSON rule files.
const CONFIG_JSON_RULES_PRIORITY: u32 = 75;
/// Base priority of CLI-supplied JSON rule files.
const CLI_JSON_RULES_BASE: u32 = 100;

/// Caller options for one resolve.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Directory config discovery starts from; defaults to the process
    /// working directory.
    pub cwd: Option<PathBuf>,
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
    /// Pack files from the command line, in order.
    pub packs: Vec<PathBuf>,
    /// Legacy rules file from the command line.
    pub rules_file: Option<PathBuf>,
    /// JSON rule files from the command line, in order.
    pub json_rules: Vec<PathBuf>,
    /// Rule ids to disable at the defaults layer.
    pub disable: Vec<String>,
    /// Vendor filter for the resolved set.
    pub vendor: Option<String>,
    /// License key; falls back to `SENTRIFLOW_LICENSE_KEY`.
    pub license_key: Option<String>,
    /// Machine id override; defaults to the detected machine id.
    pub machine_id: Option<String>,
    /// Abort on the first pack failure instead of logging and skipping.
    pub strict: bool,
    /// Bound for in-pack validation during encrypted loads.
    pub validation_timeout: Duration,
    /// When non-empty, every pack and rule file must canonicalize under
    /// one of these directories.
    pub allowed_bases: Vec<PathBuf>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            config_path: None,
            packs: Vec::new(),
            rules_file: None,
            json_rules: Vec::new(),
            disable: Vec::new(),
            vendor: None,
            license_key: None,
            machine_id: None,
            strict: false,
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            allowed_bases: Vec::new(),
        }
    }
}

/// A pack source that failed to load in lenient mode.
#[derive(Debug)]
pub struct PackLoadError {
    /// Final filename component only; never a full path.
    pub source: String,
    pub error: CoreError,
}

/// Everything a resolve produces.
#[derive(Debug)]
pub struct ResolveOutcome {
    pub rule_set: ResolvedRuleSet,
    /// Sources skipped in lenient mode.
    pub errors: Vec<PackLoadError>,
    /// The config file that was loaded, when one was found.
    pub config_path: Option<PathBuf>,
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unnamed>")
        .to_string()
}

struct SourceCollector {
    strict: bool,
    packs: Vec<RulePack>,
    errors: Vec<PackLoadError>,
}

impl SourceCollector {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            packs: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Apply the failure policy to one source's outcome.
    fn add(&mut self, source: &Path, result: CoreResult<RulePack>) -> CoreResult<()> {
        match result {
            Ok(pack) => {
                self.packs.push(pack);
                Ok(())
            }
            Err(error) if self.strict => Err(error),
            Err(error) => {
                tracing::warn!(
                    source = %source_name(source),
                    code = %error.code(),
                    "pack source skipped"
                );
                self.errors.push(PackLoadError {
                    source: source_name(source),
                    error,
                });
                Ok(())
            }
        }
    }
}

fn pack_policy(allowed_bases: &[PathBuf]) -> PathPolicy {
    PathPolicy::for_kind(PathKind::Pack).with_allowed_bases(allowed_bases.to_vec())
}

fn json_rules_policy(allowed_bases: &[PathBuf]) -> PathPolicy {
    PathPolicy::for_kind(PathKind::JsonRules).with_allowed_bases(allowed_bases.to_vec())
}

/// Load one JSON rule file into a synthetic pack.
fn load_json_rules_source(
    path: &Path,
    priority: u32,
    policy: &PathPolicy,
) -> CoreResult<RulePack> {
    let canonical = path_gate::validate(path, policy)?;
    let content = std::fs::read_to_string(&canonical)?;
    let rules = json_rules::parse(&content)?;
    Ok(RulePack::synthetic(source_name(&canonical), priority, rules))
}

/// Load one pack file, dispatching on the detected format.
fn load_pack_source(
    path: &Path,
    policy: &PathPolicy,
    cli_index: Option<u32>,
    declared_priority: Option<u32>,
    license: Option<&License>,
    machine_id: &str,
    validation_timeout: Duration,
) -> CoreResult<RulePack> {
    let canonical = path_gate::validate(path, policy)?;
    let detected = format::detect(&canonical)?;
    let base = detected.base_priority();
    // CLI packs get format base + position; config packs use their
    // declared priority, falling back to the format base.
    let priority = match (cli_index, declared_priority) {
        (Some(index), _) => base + index,
        (None, Some(declared)) => declared,
        (None, None) => base,
    };
    let bytes = std::fs::read(&canonical)?;
    match detected {
        PackFormat::Unencrypted => pack::load_unencrypted(&bytes, priority),
        PackFormat::Grpx => {
            let license = license.ok_or(CoreError::LicenseMissing)?;
            let ctx = ValidationContext::new(machine_id).with_timeout(validation_timeout);
            let loaded = grpx::load(&bytes, license.raw(), &ctx)?;
            Ok(loaded.into_pack(priority))
        }
        PackFormat::Grx2 => {
            let license = license.ok_or(CoreError::LicenseMissing)?;
            let loaded = grx2::load(&bytes, license.raw(), machine_id)?;
            Ok(loaded.into_pack(priority))
        }
    }
}

/// Resolve the license, applying the failure policy for a bad key.
fn resolve_license(
    options: &ResolveOptions,
    errors: &mut Vec<PackLoadError>,
) -> CoreResult<Option<License>> {
    let Some(raw) = license::resolve_license_key(options.license_key.clone()) else {
        return Ok(None);
    };
    let outcome = license::parse_license_key(&raw).and_then(|parsed| {
        if let License::OfflineJwt { payload, .. } = &parsed {
            if payload.is_expired() {
                return Err(CoreError::LicenseExpired);
            }
        }
        Ok(parsed)
    });
    match outcome {
        Ok(parsed) => Ok(Some(parsed)),
        Err(error) if options.strict => Err(error),
        Err(error) => {
            tracing::warn!(code = %error.code(), "license key unusable, encrypted packs will be skipped");
            errors.push(PackLoadError {
                source: "<license>".into(),
                error,
            });
            Ok(None)
        }
    }
}

/// Locate and load the configuration.
fn load_configuration(
    options: &ResolveOptions,
) -> CoreResult<(Option<PathBuf>, SentriFlowConfig)> {
    if let Some(path) = &options.config_path {
        let policy = PathPolicy::for_kind(PathKind::Config);
        let canonical = path_gate::validate(path, &policy)?;
        let config = config::load_config_file(&canonical)?;
        return Ok((Some(canonical), config));
    }
    let start = match &options.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    match config::discover_config(&start)? {
        Some((path, config)) => Ok((Some(path), config)),
        None => Ok((None, SentriFlowConfig::default())),
    }
}

/// Resolve the final rule set from every configured source.
///
/// Lenient by default: a pack that fails to load is recorded in the
/// outcome and skipped. With `strict` set, the first failure aborts.
pub fn resolve_rules(options: &ResolveOptions) -> CoreResult<ResolveOutcome> {
    let (config_path, config) = load_configuration(options)?;
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let mut collector = SourceCollector::new(options.strict);
    let license = resolve_license(options, &mut collector.errors)?;
    let machine_id = options
        .machine_id
        .clone()
        .unwrap_or_else(license::machine_id);

    let pack_gate = pack_policy(&options.allowed_bases);
    let json_gate = json_rules_policy(&options.allowed_bases);

    // Inline config rules (legacy), priority 50.
    if !config.rules.is_empty() {
        let result = pack::compile_entries(&config.rules)
            .map(|rules| RulePack::synthetic("<config rules>", LEGACY_RULES_PRIORITY, rules))
            .map_err(|detail| CoreError::ConfigInvalid { detail });
        collector.add(Path::new("<config rules>"), result)?;
    }

    // CLI --rules file, priority 50.
    if let Some(rules_file) = &options.rules_file {
        let result = load_json_rules_source(rules_file, LEGACY_RULES_PRIORITY, &json_gate);
        collector.add(rules_file, result)?;
    }

    // Config-declared JSON rule files, priority 75.
    for relative in &config.json_rules {
        let path = match &config_dir {
            Some(dir) if relative.is_relative() => dir.join(relative),
            _ => relative.clone(),
        };
        let result = load_json_rules_source(&path, CONFIG_JSON_RULES_PRIORITY, &json_gate);
        collector.add(&path, result)?;
    }

    // CLI JSON rule files, priority 100 + index.
    for (index, path) in options.json_rules.iter().enumerate() {
        let result =
            load_json_rules_source(path, CLI_JSON_RULES_BASE + index as u32, &json_gate);
        collector.add(path, result)?;
    }

    // CLI packs, priority = format base + index.
    for (index, path) in options.packs.iter().enumerate() {
        let result = load_pack_source(
            path,
            &pack_gate,
            Some(index as u32),
            None,
            license.as_ref(),
            &machine_id,
            options.validation_timeout,
        );
        collector.add(path, result)?;
    }

    // Config-declared rule packs carry their own priority.
    for entry in &config.rule_packs {
        let path = match &config_dir {
            Some(dir) if entry.path.is_relative() => dir.join(&entry.path),
            _ => entry.path.clone(),
        };
        let result = load_pack_source(
            &path,
            &pack_gate,
            None,
            entry.priority,
            license.as_ref(),
            &machine_id,
            options.validation_timeout,
        );
        collector.add(&path, result)?;
    }

    let mut extra_disables = config.disable.clone();
    extra_disables.extend(options.disable.iter().cloned());

    let resolver_options = ResolverOptions {
        vendor_filter: options.vendor.clone(),
        include_defaults: config.include_defaults,
        extra_disables,
    };
    let rule_set = resolver::resolve(collector.packs, &resolver_options);

    Ok(ResolveOutcome {
        rule_set,
        errors: collector.errors,
        config_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorCode;
    use crate::grx2::Grx2BuildOptions;
    use crate::pack::RulePackDocument;
    use crate::rule::Severity;
    use std::fs;
    use tempfile::TempDir;

    const LICENSE: &str = "PROF-0001-TEST-KEYX";

    fn unencrypted_pack_json(name: &str, id: &str, level: &str) -> String {
        format!(
            r#"{{
                "name": "{name}",
                "version": "1.0.0",
                "publisher": "test",
                "rules": [
                    {{
                        "id": "{id}",
                        "metadata": {{"level": "{level}"}},
                        "check": {{"type": "contains", "text": "x"}}
                    }}
                ]
            }}"#
        )
    }

    fn document(name: &str, id: &str) -> RulePackDocument {
        serde_json::from_str(&unencrypted_pack_json(name, id, "info")).unwrap()
    }

    fn options_in(dir: &TempDir) -> ResolveOptions {
        ResolveOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..ResolveOptions::default()
        }
    }

    #[test]
    fn resolves_defaults_with_no_sources() {
        let dir = TempDir::new().unwrap();
        let outcome = resolve_rules(&options_in(&dir)).unwrap();
        assert!(!outcome.rule_set.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn cli_pack_and_config_pack_merge() {
        let dir = TempDir::new().unwrap();
        let cli_pack = dir.path().join("cli.pack.json");
        fs::write(&cli_pack, unencrypted_pack_json("cli", "CLI-001", "info")).unwrap();

        let config_pack = dir.path().join("declared.pack.json");
        fs::write(
            &config_pack,
            unencrypted_pack_json("declared", "CFG-001", "warning"),
        )
        .unwrap();
        fs::write(
            dir.path().join("sentriflow.config.json"),
            r#"{"rulePacks": [{"path": "declared.pack.json", "priority": 500}]}"#,
        )
        .unwrap();

        let options = ResolveOptions {
            packs: vec![cli_pack],
            ..options_in(&dir)
        };
        let outcome = resolve_rules(&options).unwrap();
        assert!(outcome.rule_set.contains("CLI-001"));
        assert!(outcome.rule_set.contains("CFG-001"));
        assert_eq!(outcome.rule_set.get("CLI-001").unwrap().source_priority, 100);
        assert_eq!(outcome.rule_set.get("CFG-001").unwrap().source_priority, 500);
        assert!(outcome.config_path.is_some());
    }

    #[test]
    fn encrypted_pack_without_license_is_skipped_leniently() {
        let dir = TempDir::new().unwrap();
        let pack_path = dir.path().join("tiered.grx2");
        let bytes =
            grx2::build(&document("tiered", "ENC-001"), LICENSE, &Grx2BuildOptions::portable())
                .unwrap();
        fs::write(&pack_path, bytes).unwrap();

        let options = ResolveOptions {
            packs: vec![pack_path],
            ..options_in(&dir)
        };
        let outcome = resolve_rules(&options).unwrap();
        assert!(!outcome.rule_set.contains("ENC-001"));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].error.code(), ErrorCode::LicenseMissing);
    }

    #[test]
    fn encrypted_pack_loads_with_license() {
        let dir = TempDir::new().unwrap();
        let pack_path = dir.path().join("tiered.grx2");
        let bytes =
            grx2::build(&document("tiered", "ENC-001"), LICENSE, &Grx2BuildOptions::portable())
                .unwrap();
        fs::write(&pack_path, bytes).unwrap();

        let options = ResolveOptions {
            packs: vec![pack_path],
            license_key: Some(LICENSE.into()),
            ..options_in(&dir)
        };
        let outcome = resolve_rules(&options).unwrap();
        assert!(outcome.rule_set.contains("ENC-001"));
        assert_eq!(outcome.rule_set.get("ENC-001").unwrap().source_priority, 300);
    }

    #[test]
    fn strict_mode_stops_at_the_corrupt_middle_pack() {
        let dir = TempDir::new().unwrap();
        let good1 = dir.path().join("one.pack.json");
        fs::write(&good1, unencrypted_pack_json("one", "ONE-001", "info")).unwrap();
        let corrupt = dir.path().join("two.pack.json");
        fs::write(&corrupt, b"GRPX junk that is not a valid pack").unwrap();
        let good2 = dir.path().join("three.pack.json");
        fs::write(&good2, unencrypted_pack_json("three", "THREE-001", "info")).unwrap();

        let options = ResolveOptions {
            packs: vec![good1.clone(), corrupt.clone(), good2.clone()],
            license_key: Some(LICENSE.into()),
            strict: true,
            ..options_in(&dir)
        };
        let err = resolve_rules(&options).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFormat);

        // Lenient mode loads both good packs and records the middle one.
        let options = ResolveOptions {
            strict: false,
            packs: vec![good1, corrupt, good2],
            license_key: Some(LICENSE.into()),
            ..options_in(&dir)
        };
        let outcome = resolve_rules(&options).unwrap();
        assert!(outcome.rule_set.contains("ONE-001"));
        assert!(outcome.rule_set.contains("THREE-001"));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].source, "two.pack.json");
    }

    #[test]
    fn disables_from_config_drop_defaults() {
        let dir = TempDir::new().unwrap();
        let victim = crate::defaults::default_rules()[0].id.clone();
        fs::write(
            dir.path().join("sentriflow.config.json"),
            format!(r#"{{"disable": ["{victim}"]}}"#),
        )
        .unwrap();
        let outcome = resolve_rules(&options_in(&dir)).unwrap();
        assert!(!outcome.rule_set.contains(&victim));
    }

    #[test]
    fn cli_json_rules_outrank_legacy_rules_file() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join("legacy.json");
        fs::write(
            &legacy,
            r#"{"rules": [{"id": "DUP-001", "metadata": {"level": "error"},
                "check": {"type": "contains", "text": "a"}}]}"#,
        )
        .unwrap();
        let newer = dir.path().join("newer.json");
        fs::write(
            &newer,
            r#"{"rules": [{"id": "DUP-001", "metadata": {"level": "info"},
                "check": {"type": "contains", "text": "b"}}]}"#,
        )
        .unwrap();

        let options = ResolveOptions {
            rules_file: Some(legacy),
            json_rules: vec![newer],
            ..options_in(&dir)
        };
        let outcome = resolve_rules(&options).unwrap();
        let resolved = outcome.rule_set.get("DUP-001").unwrap();
        assert_eq!(resolved.source_priority, 100);
        assert_eq!(resolved.rule.metadata.level, Severity::Info);
    }

    #[test]
    fn malformed_license_is_fatal_only_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        let options = ResolveOptions {
            license_key: Some("definitely-not-a-license".into()),
            strict: true,
            ..options_in(&dir)
        };
        assert_eq!(
            resolve_rules(&options).unwrap_err().code(),
            ErrorCode::LicenseInvalid
        );

        let options = ResolveOptions {
            license_key: Some("definitely-not-a-license".into()),
            strict: false,
            ..options_in(&dir)
        };
        let outcome = resolve_rules(&options).unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].error.code(), ErrorCode::LicenseInvalid);
    }

    #[test]
    fn pack_outside_allowed_base_is_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let pack_path = outside.path().join("pack.json");
        fs::write(&pack_path, unencrypted_pack_json("o", "OUT-001", "info")).unwrap();

        let options = ResolveOptions {
            packs: vec![pack_path],
            allowed_bases: vec![dir.path().to_path_buf()],
            strict: true,
            ..options_in(&dir)
        };
        assert_eq!(
            resolve_rules(&options).unwrap_err().code(),
            ErrorCode::PathInvalid
        );
    }
}
