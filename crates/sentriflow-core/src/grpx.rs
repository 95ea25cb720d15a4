//! GRPX (v1) encrypted pack format: loader and builder.
//!
//! Fixed 76-byte header followed by an AES-256-GCM payload. The key is
//! derived directly from the license key and the header salt, so a GRPX
//! pack is readable by exactly the license that produced it.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "GRPX"
//!      4     1  version (1)
//!      5     1  algorithm (1 = AES-256-GCM)
//!      6     1  KDF (1 = PBKDF2)
//!      7     5  reserved
//!     12    12  IV
//!     24    16  GCM auth tag
//!     40    32  KDF salt
//!     72     4  payload length (big-endian u32)
//!     76     N  AEAD ciphertext
//! ```

use std::time::Instant;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::crypto::{self, IV_LEN, TAG_LEN};
use crate::diagnostics::{CoreError, CoreResult};
use crate::pack::{LoadedPack, RulePackDocument, ValidationContext, compile_entries};

/// Only GRPX version understood by this loader.
pub const GRPX_VERSION: u8 = 1;
/// Algorithm byte for AES-256-GCM.
pub const ALG_AES_256_GCM: u8 = 1;
/// KDF byte for PBKDF2-HMAC-SHA256.
pub const KDF_PBKDF2: u8 = 1;
/// Fixed header length.
pub const GRPX_HEADER_LEN: usize = 76;
/// Priority stamped on GRPX packs unless the caller overrides it.
pub const GRPX_DEFAULT_PRIORITY: u32 = 200;

const SALT_LEN: usize = 32;

struct GrpxHeader {
    iv: [u8; IV_LEN],
    tag: [u8; TAG_LEN],
    salt: [u8; SALT_LEN],
    payload_len: usize,
}

fn invalid(detail: impl Into<String>) -> CoreError {
    CoreError::InvalidFormat {
        detail: detail.into(),
    }
}

fn parse_header(bytes: &[u8]) -> CoreResult<GrpxHeader> {
    if bytes.len() < GRPX_HEADER_LEN {
        return Err(invalid("file shorter than GRPX header"));
    }
    if &bytes[0..4] != crate::format::GRPX_MAGIC {
        return Err(invalid("bad magic"));
    }
    if bytes[4] != GRPX_VERSION {
        return Err(invalid(format!("unsupported version {}", bytes[4])));
    }
    if bytes[5] != ALG_AES_256_GCM {
        return Err(invalid(format!("unsupported algorithm {}", bytes[5])));
    }
    if bytes[6] != KDF_PBKDF2 {
        return Err(invalid(format!("unsupported KDF {}", bytes[6])));
    }
    // bytes 7..12 are reserved and ignored
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&bytes[12..24]);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&bytes[24..40]);
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[40..72]);
    let payload_len = u32::from_be_bytes([bytes[72], bytes[73], bytes[74], bytes[75]]) as usize;
    if GRPX_HEADER_LEN + payload_len > bytes.len() {
        return Err(invalid("payload length overruns file"));
    }
    Ok(GrpxHeader {
        iv,
        tag,
        salt,
        payload_len,
    })
}

/// Apply the pack's declarative validation block.
///
/// Throw-like conditions map to their dedicated error kinds; anything
/// malformed, and an exceeded time budget, maps to `VALIDATION_FAILED`.
pub(crate) fn validate_document(
    document: &RulePackDocument,
    ctx: &ValidationContext,
) -> CoreResult<()> {
    let started = Instant::now();

    if let Some(valid_until) = &document.valid_until {
        let expiry = OffsetDateTime::parse(valid_until, &Rfc3339).map_err(|_| {
            CoreError::ValidationFailed {
                detail: "unparseable validUntil".into(),
            }
        })?;
        if expiry < OffsetDateTime::now_utc() {
            return Err(CoreError::Expired);
        }
    }

    if let Some(validation) = &document.validation {
        if let Some(bound) = &validation.machine_id {
            if bound != &ctx.machine_id {
                return Err(CoreError::MachineMismatch);
            }
        }
        if let Some(max) = validation.max_activations {
            if let Some(count) = &ctx.activation_count {
                if count() > max {
                    return Err(CoreError::ActivationLimit);
                }
            }
        }
    }

    if started.elapsed() > ctx.timeout {
        return Err(CoreError::ValidationFailed {
            detail: "validation timed out".into(),
        });
    }
    Ok(())
}

/// Load a GRPX pack from its raw bytes.
pub fn load(bytes: &[u8], license_key: &str, ctx: &ValidationContext) -> CoreResult<LoadedPack> {
    let header = parse_header(bytes)?;
    let payload = &bytes[GRPX_HEADER_LEN..GRPX_HEADER_LEN + header.payload_len];

    let key = crypto::derive_key(license_key.as_bytes(), &header.salt);
    let plaintext = crypto::aes_gcm_decrypt(payload, &key, &header.iv, &header.tag)
        .map_err(|err| {
            tracing::debug!("GRPX payload decryption failed");
            err
        })?;
    drop(key);

    let document: RulePackDocument =
        serde_json::from_slice(&plaintext).map_err(|_| CoreError::ValidationFailed {
            detail: "pack plaintext is not a valid pack document".into(),
        })?;

    validate_document(&document, ctx)?;

    let rules = compile_entries(&document.rules).map_err(|detail| CoreError::ValidationFailed {
        detail,
    })?;

    Ok(LoadedPack::from_document(&document, rules))
}

/// Build a GRPX pack from a document under the given license key.
pub fn build(document: &RulePackDocument, license_key: &str) -> CoreResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(document).map_err(|e| CoreError::InvalidFormat {
        detail: format!("pack document serialization: {e}"),
    })?;

    let salt: [u8; SALT_LEN] = crypto::random_bytes();
    let key = crypto::derive_key(license_key.as_bytes(), &salt);
    let (iv, ciphertext, tag) = crypto::aes_gcm_encrypt(&plaintext, &key)?;
    drop(key);

    let mut out = Vec::with_capacity(GRPX_HEADER_LEN + ciphertext.len());
    out.extend_from_slice(crate::format::GRPX_MAGIC);
    out.push(GRPX_VERSION);
    out.push(ALG_AES_256_GCM);
    out.push(KDF_PBKDF2);
    out.extend_from_slice(&[0u8; 5]);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorCode;
    use crate::pack::PackValidation;

    const LICENSE: &str = "PROF-1234-ABCD-5678";

    fn sample_document() -> RulePackDocument {
        serde_json::from_str(
            r#"{
                "name": "acme-encrypted",
                "version": "2.0.0",
                "publisher": "acme",
                "rules": [
                    {
                        "id": "ENC-001",
                        "metadata": {"level": "error"},
                        "check": {"type": "not_contains", "text": "telnet"}
                    },
                    {
                        "id": "ENC-002",
                        "selector": "interface-*",
                        "metadata": {"level": "warning"},
                        "check": {"type": "contains", "text": "mtu"}
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    fn ctx() -> ValidationContext {
        ValidationContext::new("machine-a")
    }

    #[test]
    fn build_then_load_roundtrip() {
        let document = sample_document();
        let bytes = build(&document, LICENSE).unwrap();
        let loaded = load(&bytes, LICENSE, &ctx()).unwrap();
        let ids: Vec<&str> = loaded.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ENC-001", "ENC-002"]);
        assert_eq!(loaded.metadata.name, "acme-encrypted");
    }

    #[test]
    fn wrong_license_fails_opaquely() {
        let bytes = build(&sample_document(), LICENSE).unwrap();
        let err = load(&bytes, "WRONG-KEY", &ctx()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DecryptionFailed);
        assert_eq!(err.to_string(), "Invalid license key or corrupted pack");
    }

    #[test]
    fn short_file_is_invalid_format() {
        let err = load(b"GRPX\x01\x01\x01", LICENSE, &ctx()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFormat);
    }

    #[test]
    fn unknown_version_is_invalid_format() {
        let mut bytes = build(&sample_document(), LICENSE).unwrap();
        bytes[4] = 2;
        let err = load(&bytes, LICENSE, &ctx()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFormat);
    }

    #[test]
    fn unknown_algorithm_is_invalid_format() {
        let mut bytes = build(&sample_document(), LICENSE).unwrap();
        bytes[5] = 9;
        assert_eq!(
            load(&bytes, LICENSE, &ctx()).unwrap_err().code(),
            ErrorCode::InvalidFormat
        );
    }

    #[test]
    fn overrun_payload_length_is_invalid_format() {
        let mut bytes = build(&sample_document(), LICENSE).unwrap();
        let huge = (bytes.len() as u32).to_be_bytes();
        bytes[72..76].copy_from_slice(&huge);
        assert_eq!(
            load(&bytes, LICENSE, &ctx()).unwrap_err().code(),
            ErrorCode::InvalidFormat
        );
    }

    #[test]
    fn tampered_payload_fails_decryption() {
        let mut bytes = build(&sample_document(), LICENSE).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert_eq!(
            load(&bytes, LICENSE, &ctx()).unwrap_err().code(),
            ErrorCode::DecryptionFailed
        );
    }

    #[test]
    fn expired_pack_is_reported() {
        let mut document = sample_document();
        document.valid_until = Some("2020-01-01T00:00:00Z".into());
        let bytes = build(&document, LICENSE).unwrap();
        assert_eq!(
            load(&bytes, LICENSE, &ctx()).unwrap_err().code(),
            ErrorCode::Expired
        );
    }

    #[test]
    fn future_expiry_loads() {
        let mut document = sample_document();
        document.valid_until = Some("2099-01-01T00:00:00Z".into());
        let bytes = build(&document, LICENSE).unwrap();
        let loaded = load(&bytes, LICENSE, &ctx()).unwrap();
        assert_eq!(loaded.valid_until.as_deref(), Some("2099-01-01T00:00:00Z"));
    }

    #[test]
    fn machine_binding_is_enforced() {
        let mut document = sample_document();
        document.validation = Some(PackValidation {
            machine_id: Some("machine-b".into()),
            max_activations: None,
        });
        let bytes = build(&document, LICENSE).unwrap();
        assert_eq!(
            load(&bytes, LICENSE, &ctx()).unwrap_err().code(),
            ErrorCode::MachineMismatch
        );

        let bound = ValidationContext::new("machine-b");
        assert!(load(&bytes, LICENSE, &bound).is_ok());
    }

    #[test]
    fn activation_limit_is_enforced() {
        let mut document = sample_document();
        document.validation = Some(PackValidation {
            machine_id: None,
            max_activations: Some(3),
        });
        let bytes = build(&document, LICENSE).unwrap();

        let over = ValidationContext::new("machine-a").with_activation_count(|| 4);
        assert_eq!(
            load(&bytes, LICENSE, &over).unwrap_err().code(),
            ErrorCode::ActivationLimit
        );

        let within = ValidationContext::new("machine-a").with_activation_count(|| 3);
        assert!(load(&bytes, LICENSE, &within).is_ok());
    }

    #[test]
    fn malformed_expiry_is_validation_failure() {
        let mut document = sample_document();
        document.valid_until = Some("not a date".into());
        let bytes = build(&document, LICENSE).unwrap();
        assert_eq!(
            load(&bytes, LICENSE, &ctx()).unwrap_err().code(),
            ErrorCode::ValidationFailed
        );
    }
}
