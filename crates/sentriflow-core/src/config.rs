//! Configuration file: shape, discovery, and option merging.
//!
//! Discovery walks up from a starting directory for a bounded number of
//! levels, probing the known config filenames at each level. Every
//! candidate passes the path gate before it is read.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diagnostics::{CoreError, CoreResult};
use crate::pack::RuleEntry;
use crate::path_gate::{self, PathKind, PathPolicy};

/// Filenames probed at each directory level, in precedence order.
pub const CONFIG_FILENAMES: &[&str] = &[
    "sentriflow.config.toml",
    "sentriflow.config.json",
    ".sentriflowrc.toml",
    ".sentriflowrc.json",
];

/// How many directory levels discovery climbs before giving up.
pub const MAX_CONFIG_SEARCH_LEVELS: usize = 10;

/// Upper bound accepted for `directory.maxDepth`.
const MAX_DIRECTORY_DEPTH: u32 = 1000;

/// Directory-scan options, mergeable between CLI and config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DirectoryOptions {
    /// Regex strings excluding matching paths; validated by trial
    /// compilation at load time.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    /// Plain name/glob excludes.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A rule pack declared in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigPackEntry {
    pub path: PathBuf,
    /// Merge priority for this pack; falls back to the format default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// The configuration file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SentriFlowConfig {
    /// Literal rules declared inline (legacy).
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    /// Rule ids to disable at the defaults layer (legacy).
    #[serde(default)]
    pub disable: Vec<String>,
    #[serde(default = "default_true")]
    pub include_defaults: bool,
    #[serde(default)]
    pub rule_packs: Vec<ConfigPackEntry>,
    /// JSON rule files to load.
    #[serde(default)]
    pub json_rules: Vec<PathBuf>,
    #[serde(default)]
    pub directory: DirectoryOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_special_ips: Option<bool>,
}

fn default_true() -> bool {
    true
}

impl SentriFlowConfig {
    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(depth) = self.directory.max_depth {
            if depth > MAX_DIRECTORY_DEPTH {
                return Err(CoreError::ConfigInvalid {
                    detail: format!("directory.maxDepth {depth} exceeds {MAX_DIRECTORY_DEPTH}"),
                });
            }
        }
        for pattern in &self.directory.exclude_patterns {
            if regex::Regex::new(pattern).is_err() {
                return Err(CoreError::ConfigInvalid {
                    detail: format!("invalid exclude pattern `{pattern}`"),
                });
            }
        }
        Ok(())
    }
}

/// Load and validate a config file the path gate already accepted.
pub fn load_config_file(path: &Path) -> CoreResult<SentriFlowConfig> {
    let content = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let config: SentriFlowConfig = if is_toml {
        toml::from_str(&content).map_err(|e| CoreError::ConfigInvalid {
            detail: format!("toml: {e}"),
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| CoreError::ConfigInvalid {
            detail: format!("json: {e}"),
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Discover a config file by walking up from `start`.
///
/// At each level the known filenames are probed in order; the first hit
/// is gated and loaded. A candidate the path gate rejects is skipped and
/// the walk continues upward. Returns `None` when nothing is found
/// within the level limit.
pub fn discover_config(start: &Path) -> CoreResult<Option<(PathBuf, SentriFlowConfig)>> {
    let policy = PathPolicy::for_kind(PathKind::Config);
    let mut level = Some(start.to_path_buf());
    for _ in 0..MAX_CONFIG_SEARCH_LEVELS {
        let Some(dir) = level else { break };
        let hit = CONFIG_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.exists());
        if let Some(candidate) = hit {
            match path_gate::validate(&candidate, &policy) {
                Ok(canonical) => {
                    let config = load_config_file(&canonical)?;
                    return Ok(Some((canonical, config)));
                }
                Err(_) => {
                    tracing::debug!("config candidate rejected by path gate, continuing walk");
                }
            }
        }
        level = dir.parent().map(Path::to_path_buf);
    }
    Ok(None)
}

/// Merge directory options from CLI and config.
///
/// Array fields are a union; scalar fields use CLI-wins-if-defined
/// precedence. Config regex patterns that no longer compile are silently
/// dropped here (they were validated at load time).
pub fn merge_directory_options(
    cli: &DirectoryOptions,
    config: &DirectoryOptions,
) -> DirectoryOptions {
    let mut exclude_patterns = cli.exclude_patterns.clone();
    for pattern in &config.exclude_patterns {
        if regex::Regex::new(pattern).is_err() {
            continue;
        }
        if !exclude_patterns.contains(pattern) {
            exclude_patterns.push(pattern.clone());
        }
    }

    let mut exclude = cli.exclude.clone();
    for entry in &config.exclude {
        if !exclude.contains(entry) {
            exclude.push(entry.clone());
        }
    }

    DirectoryOptions {
        exclude_patterns,
        extensions: cli.extensions.clone().or_else(|| config.extensions.clone()),
        recursive: cli.recursive.or(config.recursive),
        max_depth: cli.max_depth.or(config.max_depth),
        exclude,
    }
}
