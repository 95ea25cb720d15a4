//! Error taxonomy and message sanitization.
//!
//! Every failure in the core folds into one of the stable [`ErrorCode`]
//! values. User-facing strings live in a separate mapping table
//! ([`ErrorCode::user_message`]) so call sites never embed display text,
//! and `Display` output never carries absolute paths, license material,
//! or internal failure detail.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Stable machine-readable error codes.
///
/// The set is closed: any new failure mode must fold into one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Magic/version/bounds failures during binary or rule-file parse.
    InvalidFormat,
    /// Any AEAD failure or wrong-key condition, at any stage.
    DecryptionFailed,
    /// Pack-hash mismatch or post-decryption JSON parse failure.
    PackCorrupted,
    /// Signaled by the in-pack validator.
    Expired,
    /// Signaled by the in-pack validator.
    MachineMismatch,
    /// Signaled by the in-pack validator.
    ActivationLimit,
    /// No license key was supplied for an encrypted pack.
    LicenseMissing,
    /// The supplied license key is malformed.
    LicenseInvalid,
    /// The supplied license key has expired.
    LicenseExpired,
    /// Pack validation timed out or produced malformed output.
    ValidationFailed,
    /// Path-gate rejection (kind, size, boundary, UNC).
    PathInvalid,
    /// A rule check failed internally during execution.
    RuleExecutionError,
}

impl ErrorCode {
    /// The canonical code string, stable across releases.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::DecryptionFailed => "DECRYPTION_FAILED",
            ErrorCode::PackCorrupted => "PACK_CORRUPTED",
            ErrorCode::Expired => "EXPIRED",
            ErrorCode::MachineMismatch => "MACHINE_MISMATCH",
            ErrorCode::ActivationLimit => "ACTIVATION_LIMIT",
            ErrorCode::LicenseMissing => "LICENSE_MISSING",
            ErrorCode::LicenseInvalid => "LICENSE_INVALID",
            ErrorCode::LicenseExpired => "LICENSE_EXPIRED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::PathInvalid => "PATH_INVALID",
            ErrorCode::RuleExecutionError => "RULE_EXECUTION_ERROR",
        }
    }

    /// User-facing message for this code.
    ///
    /// Kept in one table so the strings can be localized without touching
    /// error sites.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCode::InvalidFormat => "The file is not a recognized rule pack format",
            ErrorCode::DecryptionFailed => "Invalid license key or corrupted pack",
            ErrorCode::PackCorrupted => "The rule pack is corrupted",
            ErrorCode::Expired => "The rule pack has expired",
            ErrorCode::MachineMismatch => "The rule pack is bound to a different machine",
            ErrorCode::ActivationLimit => "The license activation limit has been reached",
            ErrorCode::LicenseMissing => "A license key is required to load this pack",
            ErrorCode::LicenseInvalid => "The license key is not valid",
            ErrorCode::LicenseExpired => "The license key has expired",
            ErrorCode::ValidationFailed => "The rule pack failed validation",
            ErrorCode::PathInvalid => "The path was rejected by input validation",
            ErrorCode::RuleExecutionError => "A rule failed during execution",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a path was rejected by the path gate.
///
/// Variants deliberately carry no path so `Display` output is stable and
/// non-disclosing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathInvalidReason {
    /// Input began with `\\` or `//`.
    UncPath,
    /// Extension is not in the allow-list for the path kind.
    BadExtension,
    /// The path does not exist.
    NotFound,
    /// The canonical target is not a regular file.
    NotRegularFile,
    /// The file exceeds the size limit for the path kind.
    TooLarge,
    /// The canonical target escapes every allowed base directory.
    OutsideAllowedBase,
    /// The path could not be canonicalized.
    Canonicalize,
}

impl PathInvalidReason {
    fn as_str(self) -> &'static str {
        match self {
            PathInvalidReason::UncPath => "UNC paths are not allowed",
            PathInvalidReason::BadExtension => "file extension is not allowed",
            PathInvalidReason::NotFound => "file does not exist",
            PathInvalidReason::NotRegularFile => "not a regular file",
            PathInvalidReason::TooLarge => "file exceeds the size limit",
            PathInvalidReason::OutsideAllowedBase => "path is outside the allowed directories",
            PathInvalidReason::Canonicalize => "path could not be resolved",
        }
    }
}

/// Core errors.
///
/// `detail` fields are short internal descriptions (never paths, never
/// secrets); they are logged at debug level and excluded from `Display`
/// where the taxonomy demands opacity.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid pack format: {detail}")]
    InvalidFormat { detail: String },

    /// One opaque message for every AEAD/wrong-key condition. The failing
    /// stage is logged at debug level by the caller, never displayed.
    #[error("Invalid license key or corrupted pack")]
    DecryptionFailed,

    #[error("pack corrupted: {detail}")]
    PackCorrupted { detail: String },

    #[error("pack has expired")]
    Expired,

    #[error("pack is bound to a different machine")]
    MachineMismatch,

    #[error("license activation limit reached")]
    ActivationLimit,

    #[error("no license key available")]
    LicenseMissing,

    #[error("license key is not valid: {detail}")]
    LicenseInvalid { detail: String },

    #[error("license key has expired")]
    LicenseExpired,

    #[error("pack validation failed: {detail}")]
    ValidationFailed { detail: String },

    #[error("path rejected: {}", reason.as_str())]
    PathInvalid { reason: PathInvalidReason },

    /// Configuration file could not be loaded or failed shape validation.
    #[error("configuration invalid: {detail}")]
    ConfigInvalid { detail: String },

    /// I/O failure while reading an already-gated input.
    #[error("could not read input file")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Fold this error into its stable [`ErrorCode`].
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            CoreError::DecryptionFailed => ErrorCode::DecryptionFailed,
            CoreError::PackCorrupted { .. } => ErrorCode::PackCorrupted,
            CoreError::Expired => ErrorCode::Expired,
            CoreError::MachineMismatch => ErrorCode::MachineMismatch,
            CoreError::ActivationLimit => ErrorCode::ActivationLimit,
            CoreError::LicenseMissing => ErrorCode::LicenseMissing,
            CoreError::LicenseInvalid { .. } => ErrorCode::LicenseInvalid,
            CoreError::LicenseExpired => ErrorCode::LicenseExpired,
            CoreError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            CoreError::PathInvalid { .. } => ErrorCode::PathInvalid,
            // Config shape problems surface as validation failures; a
            // failed read on a gated path is an input-path problem.
            CoreError::ConfigInvalid { .. } => ErrorCode::ValidationFailed,
            CoreError::Io { .. } => ErrorCode::PathInvalid,
        }
    }

    /// The user-facing message for this error, from the code table.
    pub fn user_message(&self) -> &'static str {
        self.code().user_message()
    }
}

impl From<std::io::Error> for CoreError {
    fn from(source: std::io::Error) -> Self {
        CoreError::Io { source }
    }
}

/// Strip filesystem paths and stack frames from a message.
///
/// Path-looking tokens are reduced to their final filename component and
/// `at ...` stack-frame lines are dropped entirely.
pub fn sanitize_message(message: &str) -> String {
    let mut out = Vec::new();
    for line in message.lines() {
        if line.trim_start().starts_with("at ") {
            continue;
        }
        let sanitized: Vec<String> = line
            .split_whitespace()
            .map(|token| {
                if token.contains('/') || token.contains('\\') {
                    let trimmed = token.trim_matches(|c| c == '\'' || c == '"' || c == ':');
                    trimmed
                        .rsplit(['/', '\\'])
                        .next()
                        .unwrap_or(trimmed)
                        .to_string()
                } else {
                    token.to_string()
                }
            })
            .collect();
        out.push(sanitized.join(" "));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_failed_display_is_opaque() {
        let err = CoreError::DecryptionFailed;
        assert_eq!(err.to_string(), "Invalid license key or corrupted pack");
    }

    #[test]
    fn every_variant_maps_to_a_code() {
        let cases: Vec<(CoreError, ErrorCode)> = vec![
            (
                CoreError::InvalidFormat {
                    detail: "bad magic".into(),
                },
                ErrorCode::InvalidFormat,
            ),
            (CoreError::DecryptionFailed, ErrorCode::DecryptionFailed),
            (
                CoreError::PackCorrupted {
                    detail: "hash mismatch".into(),
                },
                ErrorCode::PackCorrupted,
            ),
            (CoreError::Expired, ErrorCode::Expired),
            (CoreError::MachineMismatch, ErrorCode::MachineMismatch),
            (CoreError::ActivationLimit, ErrorCode::ActivationLimit),
            (CoreError::LicenseMissing, ErrorCode::LicenseMissing),
            (
                CoreError::LicenseInvalid {
                    detail: "segments".into(),
                },
                ErrorCode::LicenseInvalid,
            ),
            (CoreError::LicenseExpired, ErrorCode::LicenseExpired),
            (
                CoreError::ValidationFailed {
                    detail: "timeout".into(),
                },
                ErrorCode::ValidationFailed,
            ),
            (
                CoreError::PathInvalid {
                    reason: PathInvalidReason::UncPath,
                },
                ErrorCode::PathInvalid,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code, "wrong code for {:?}", err);
        }
    }

    #[test]
    fn code_strings_are_stable() {
        assert_eq!(ErrorCode::DecryptionFailed.as_str(), "DECRYPTION_FAILED");
        assert_eq!(ErrorCode::PackCorrupted.as_str(), "PACK_CORRUPTED");
        assert_eq!(ErrorCode::MachineMismatch.as_str(), "MACHINE_MISMATCH");
        assert_eq!(ErrorCode::PathInvalid.as_str(), "PATH_INVALID");
    }

    #[test]
    fn path_invalid_display_has_no_path() {
        let err = CoreError::PathInvalid {
            reason: PathInvalidReason::OutsideAllowedBase,
        };
        let msg = err.to_string();
        assert!(!msg.contains('/'), "message must not disclose paths: {msg}");
    }

    #[test]
    fn sanitize_strips_absolute_paths() {
        let out = sanitize_message("failed to open /home/alice/secret/pack.grpx for reading");
        assert!(!out.contains("/home"), "got: {out}");
        assert!(out.contains("pack.grpx"));
    }

    #[test]
    fn sanitize_drops_stack_frames() {
        let out = sanitize_message("boom\n    at loader (/src/loader.js:10:2)\ndone");
        assert_eq!(out, "boom\ndone");
    }

    #[test]
    fn user_message_for_decryption_never_varies() {
        assert_eq!(
            ErrorCode::DecryptionFailed.user_message(),
            "Invalid license key or corrupted pack"
        );
    }
}
