//! Path gate: every file path the core touches goes through here.
//!
//! The gate canonicalizes, forbids UNC input, confines targets to allowed
//! base directories, and enforces per-kind extension and size limits.
//! Rejections carry a stable [`PathInvalidReason`] and never echo the
//! offending path.

use std::fs;
use std::path::{Path, PathBuf};

use crate::diagnostics::{CoreError, CoreResult, PathInvalidReason};

/// What a path is being used for; selects extension and size defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// A discovered configuration file.
    Config,
    /// A JSON rule file.
    JsonRules,
    /// A rule pack (classified later by magic bytes, any extension).
    Pack,
}

/// Validation policy applied by [`validate`].
#[derive(Debug, Clone)]
pub struct PathPolicy {
    pub kind: PathKind,
    /// Canonical ancestors the target must stay under; empty means
    /// unconfined.
    pub allowed_bases: Vec<PathBuf>,
    pub max_size: u64,
    /// Lowercase extensions with leading dot; empty means any.
    pub allowed_extensions: Vec<String>,
    pub must_exist: bool,
}

const MIB: u64 = 1024 * 1024;

impl PathPolicy {
    /// Kind-specific defaults.
    pub fn for_kind(kind: PathKind) -> Self {
        match kind {
            PathKind::Config => Self {
                kind,
                allowed_bases: Vec::new(),
                max_size: MIB,
                allowed_extensions: vec![".toml".into(), ".json".into()],
                must_exist: true,
            },
            PathKind::JsonRules => Self {
                kind,
                allowed_bases: Vec::new(),
                max_size: MIB,
                allowed_extensions: vec![".json".into()],
                must_exist: true,
            },
            PathKind::Pack => Self {
                kind,
                allowed_bases: Vec::new(),
                max_size: 16 * MIB,
                allowed_extensions: Vec::new(),
                must_exist: true,
            },
        }
    }

    pub fn with_allowed_bases(mut self, bases: Vec<PathBuf>) -> Self {
        self.allowed_bases = bases;
        self
    }

    pub fn with_must_exist(mut self, must_exist: bool) -> Self {
        self.must_exist = must_exist;
        self
    }
}

fn reject(reason: PathInvalidReason) -> CoreError {
    CoreError::PathInvalid { reason }
}

/// Validate a path against a policy, returning the canonical target.
///
/// Steps run in a fixed order: UNC rejection, absolutization, extension
/// allow-list, existence, symlink-resolving canonicalization, regular-file
/// check, size limit, base-directory confinement.
pub fn validate(path: &Path, policy: &PathPolicy) -> CoreResult<PathBuf> {
    let raw = path.to_string_lossy();
    if raw.starts_with("\\\\") || raw.starts_with("//") {
        return Err(reject(PathInvalidReason::UncPath));
    }

    let absolute =
        std::path::absolute(path).map_err(|_| reject(PathInvalidReason::Canonicalize))?;

    if !policy.allowed_extensions.is_empty() {
        let extension = absolute
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        if !policy
            .allowed_extensions
            .iter()
            .any(|allowed| allowed == &extension)
        {
            return Err(reject(PathInvalidReason::BadExtension));
        }
    }

    if !absolute.exists() {
        if policy.must_exist {
            return Err(reject(PathInvalidReason::NotFound));
        }
        return Ok(absolute);
    }

    // Resolves every symlink, so the boundary check below sees the real
    // target.
    let canonical =
        fs::canonicalize(&absolute).map_err(|_| reject(PathInvalidReason::Canonicalize))?;

    let metadata = fs::metadata(&canonical).map_err(|_| reject(PathInvalidReason::NotFound))?;
    if !metadata.is_file() {
        return Err(reject(PathInvalidReason::NotRegularFile));
    }
    if metadata.len() > policy.max_size {
        return Err(reject(PathInvalidReason::TooLarge));
    }

    if !policy.allowed_bases.is_empty() {
        let mut inside = false;
        for base in &policy.allowed_bases {
            let Ok(base) = fs::canonicalize(base) else {
                continue;
            };
            // Component-wise prefix check: `/home/user` never matches
            // `/home/userX`.
            if canonical == base || canonical.starts_with(&base) {
                inside = true;
                break;
            }
        }
        if !inside {
            return Err(reject(PathInvalidReason::OutsideAllowedBase));
        }
    }

    Ok(canonical)
}
