//! License keys and machine identity.
//!
//! Two key shapes coexist: an offline JWT whose payload is parsed for
//! display and pack-source selection only (the pack's AEAD provides the
//! actual cryptographic integrity, so the signature is deliberately not
//! verified here), and a cloud key (`XXXX-XXXX-XXXX-XXXX`, base-36)
//! whose activation happens outside this core.

use std::fs;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::diagnostics::{CoreError, CoreResult};

/// Environment variable consulted when no license key is passed
/// explicitly.
pub const LICENSE_ENV_VAR: &str = "SENTRIFLOW_LICENSE_KEY";

/// License tiers, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseTier {
    Community,
    Professional,
    Enterprise,
}

/// Payload of an offline JWT license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtPayload {
    /// Subject (licensee identifier).
    pub sub: String,
    pub tier: LicenseTier,
    /// Feed ids this license grants access to.
    #[serde(default)]
    pub feeds: Vec<String>,
    /// Expiry as a Unix timestamp.
    pub exp: i64,
    /// Issued-at as a Unix timestamp.
    pub iat: i64,
    /// License-server endpoint; must be an https URL.
    pub api: String,
    /// Machine id the license is pinned to, when issued machine-bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
}

impl JwtPayload {
    /// Whether the license has expired.
    pub fn is_expired(&self) -> bool {
        self.exp < OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// A parsed license key.
#[derive(Debug, Clone)]
pub enum License {
    OfflineJwt { raw: String, payload: JwtPayload },
    CloudKey { key: String },
}

impl License {
    /// The raw key string, used verbatim as KDF input by the loaders.
    pub fn raw(&self) -> &str {
        match self {
            License::OfflineJwt { raw, .. } => raw,
            License::CloudKey { key } => key,
        }
    }
}

/// Whether a string has the cloud-key shape: four dash-separated groups
/// of four base-36 characters.
pub fn is_cloud_key(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 4
        && groups.iter().all(|group| {
            group.len() == 4
                && group
                    .chars()
                    .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        })
}

/// Decode the payload segment of an offline JWT.
///
/// The signature is not checked; see the module docs for why.
pub fn decode_jwt_payload(raw: &str) -> CoreResult<JwtPayload> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 {
        return Err(CoreError::LicenseInvalid {
            detail: "expected three JWT segments".into(),
        });
    }
    let payload_bytes =
        URL_SAFE_NO_PAD
            .decode(segments[1])
            .map_err(|_| CoreError::LicenseInvalid {
                detail: "payload segment is not base64url".into(),
            })?;
    let payload: JwtPayload =
        serde_json::from_slice(&payload_bytes).map_err(|_| CoreError::LicenseInvalid {
            detail: "payload is not a license document".into(),
        })?;
    if !payload.api.starts_with("https://") {
        return Err(CoreError::LicenseInvalid {
            detail: "api endpoint must be https".into(),
        });
    }
    Ok(payload)
}

/// Parse a license key of either shape.
pub fn parse_license_key(raw: &str) -> CoreResult<License> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CoreError::LicenseMissing);
    }
    if is_cloud_key(raw) {
        return Ok(License::CloudKey {
            key: raw.to_string(),
        });
    }
    let payload = decode_jwt_payload(raw)?;
    Ok(License::OfflineJwt {
        raw: raw.to_string(),
        payload,
    })
}

/// Resolve a license key: an explicit value wins, otherwise the
/// environment variable.
pub fn resolve_license_key(explicit: Option<String>) -> Option<String> {
    explicit
        .filter(|key| !key.trim().is_empty())
        .or_else(|| std::env::var(LICENSE_ENV_VAR).ok().filter(|k| !k.is_empty()))
}

/// Paths probed for an OS-stable machine identifier.
#[cfg(unix)]
const OS_MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

fn os_machine_id() -> Option<String> {
    #[cfg(unix)]
    {
        for path in OS_MACHINE_ID_PATHS {
            if let Ok(contents) = fs::read_to_string(path) {
                let trimmed = contents.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

/// State directory under the user's home.
pub fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sentriflow"))
}

fn generate_machine_id() -> String {
    // 16 random bytes rendered as 32 hex characters.
    let bytes: [u8; 16] = crate::crypto::random_bytes();
    let mut id = String::with_capacity(32);
    for byte in bytes {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// Read or create the persisted fallback machine id in `dir`.
fn persisted_machine_id_in(dir: &std::path::Path) -> Option<String> {
    let path = dir.join("machine-id");
    if let Ok(existing) = fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if trimmed.len() == 32 {
            return Some(trimmed.to_string());
        }
    }
    let id = generate_machine_id();
    fs::create_dir_all(dir).ok()?;
    fs::write(&path, &id).ok()?;
    Some(id)
}

/// The machine id used for license and pack binding.
///
/// Prefers an OS-stable identifier; otherwise a persistent random
/// 32-character identifier is stored once under `~/.sentriflow` and
/// reused. Falls back to an ephemeral id when nothing can be persisted.
pub fn machine_id() -> String {
    if let Some(id) = os_machine_id() {
        return id;
    }
    if let Some(dir) = state_dir() {
        if let Some(id) = persisted_machine_id_in(&dir) {
            return id;
        }
    }
    tracing::debug!("no stable machine id available, using ephemeral id");
    generate_machine_id()
}
