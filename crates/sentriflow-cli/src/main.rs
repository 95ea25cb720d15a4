//! SentriFlow command-line interface.
//!
//! Scans a parsed configuration tree (JSON) against the resolved rule
//! set and reports violations. Exit codes: 0 clean, 1 invalid input
//! (path or config), 2 rule violations found, 3 cryptographic or
//! license failure in strict mode.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use sentriflow_core::check::CheckContext;
use sentriflow_core::diagnostics::CoreError;
use sentriflow_core::helpers::HelperRegistry;
use sentriflow_core::node::ConfigNode;
use sentriflow_core::orchestrator::{ResolveOptions, resolve_rules};
use sentriflow_core::rule::{RuleResult, Severity};
use sentriflow_core::executor::RuleExecutor;

/// Largest accepted parsed-tree file.
const MAX_TREE_BYTES: u64 = 16 * 1024 * 1024;

const EXIT_OK: u8 = 0;
const EXIT_INVALID_INPUT: u8 = 1;
const EXIT_VIOLATIONS: u8 = 2;
const EXIT_CRYPTO_FAILURE: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "sentriflow",
    version,
    about = "Validate network-device configurations against rule packs"
)]
struct Cli {
    /// Parsed configuration tree to scan (JSON, produced by a parser)
    tree: PathBuf,

    /// Rule pack file; repeatable, merged in order
    #[arg(long = "pack", value_name = "FILE")]
    packs: Vec<PathBuf>,

    /// Legacy rules file (JSON rule format)
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// JSON rule file; repeatable
    #[arg(long = "json-rules", value_name = "FILE")]
    json_rules: Vec<PathBuf>,

    /// Disable a default rule by id; repeatable
    #[arg(long = "disable", value_name = "RULE_ID")]
    disable: Vec<String>,

    /// Keep only rules for this vendor (plus `common` rules)
    #[arg(long, value_name = "VENDOR")]
    vendor: Option<String>,

    /// Explicit config file (skips discovery)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Abort on the first pack failure instead of skipping it
    #[arg(long)]
    strict: bool,

    /// License key for encrypted packs; falls back to
    /// SENTRIFLOW_LICENSE_KEY
    #[arg(long = "license-key", value_name = "KEY")]
    license_key: Option<String>,

    /// Machine id override, for support scenarios
    #[arg(long = "machine-id", value_name = "ID", hide = true)]
    machine_id: Option<String>,

    /// Only print failures and the summary
    #[arg(long, short)]
    quiet: bool,
}

fn init_tracing() {
    // DEBUG turns on internal diagnostics; never enable in production,
    // details may leak.
    let filter = if std::env::var_os("DEBUG").is_some() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_tree(path: &PathBuf) -> anyhow::Result<ConfigNode> {
    let metadata = std::fs::metadata(path)?;
    anyhow::ensure!(metadata.is_file(), "tree input is not a regular file");
    anyhow::ensure!(
        metadata.len() <= MAX_TREE_BYTES,
        "tree input exceeds the size limit"
    );
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn exit_code_for(error: &CoreError) -> u8 {
    match error {
        CoreError::PathInvalid { .. } | CoreError::ConfigInvalid { .. } | CoreError::Io { .. } => {
            EXIT_INVALID_INPUT
        }
        _ => EXIT_CRYPTO_FAILURE,
    }
}

fn severity_label(level: Severity) -> colored::ColoredString {
    match level {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
        Severity::Info => "info".blue(),
    }
}

fn print_failure(result: &RuleResult) {
    let loc = result
        .loc
        .map(|line| format!(":{line}"))
        .unwrap_or_default();
    // Built-in rules have a catalog name worth showing.
    let title = sentriflow_rules::get_rule_name(&result.rule_id)
        .map(|name| format!(" ({name})"))
        .unwrap_or_default();
    println!(
        "  {} {}{} [{}] {}{} - {}",
        "x".red(),
        result.rule_id.bold(),
        title,
        severity_label(result.level),
        result.node_id,
        loc,
        result.message
    );
}

fn run(cli: Cli) -> u8 {
    let tree = match load_tree(&cli.tree) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return EXIT_INVALID_INPUT;
        }
    };

    let options = ResolveOptions {
        cwd: cli.tree.parent().map(PathBuf::from),
        config_path: cli.config.clone(),
        packs: cli.packs.clone(),
        rules_file: cli.rules.clone(),
        json_rules: cli.json_rules.clone(),
        disable: cli.disable.clone(),
        vendor: cli.vendor.clone(),
        license_key: cli.license_key.clone(),
        machine_id: cli.machine_id.clone(),
        strict: cli.strict,
        ..ResolveOptions::default()
    };

    let outcome = match resolve_rules(&options) {
        Ok(outcome) => outcome,
        Err(error) => {
            eprintln!("{} {}", "error:".red().bold(), error.user_message());
            return exit_code_for(&error);
        }
    };

    for skipped in &outcome.errors {
        eprintln!(
            "{} skipped {}: {}",
            "warning:".yellow().bold(),
            skipped.source,
            skipped.error.user_message()
        );
    }

    // Deterministic report order: rules sorted by id, nodes in tree
    // order. Execution order itself carries no guarantee.
    let mut rules: Vec<_> = outcome.rule_set.rules().collect();
    rules.sort_by(|a, b| a.id.cmp(&b.id));

    let mut ctx = CheckContext::new(HelperRegistry::global());
    if let Some(vendor) = &cli.vendor {
        ctx = ctx.with_vendor(vendor.clone());
    }
    let mut executor = RuleExecutor::new().on_rule_disabled(|rule_id| {
        eprintln!(
            "{} rule {} disabled after repeated timeouts",
            "warning:".yellow().bold(),
            rule_id
        );
    });

    let mut checked = 0usize;
    let mut failures: Vec<RuleResult> = Vec::new();
    for node in tree.walk() {
        for &rule in &rules {
            if !rule.applies_to_node(node) {
                continue;
            }
            if let Some(result) = executor.execute(rule, node, &ctx) {
                checked += 1;
                if !result.passed {
                    failures.push(result);
                }
            }
        }
    }

    if !cli.quiet {
        println!("{} {}", "Scanning:".bold(), cli.tree.display());
    }
    for failure in &failures {
        print_failure(failure);
    }

    let errors = failures
        .iter()
        .filter(|f| f.level == Severity::Error)
        .count();
    let warnings = failures.len() - errors;
    if failures.is_empty() {
        if !cli.quiet {
            println!(
                "{} {} checks across {} rules",
                "No issues found.".green().bold(),
                checked,
                rules.len()
            );
        }
        EXIT_OK
    } else {
        println!(
            "{} {} error(s), {} warning/info finding(s)",
            "Found".bold(),
            errors,
            warnings
        );
        EXIT_VIOLATIONS
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    ExitCode::from(run(cli))
}
