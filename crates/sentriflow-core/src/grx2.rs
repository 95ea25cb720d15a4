//! GRX2 extended (v3) encrypted pack format: loader and builder.
//!
//! A GRX2 extended pack is self-contained: the header embeds a wrapped
//! tier-master-key (TMK), so unwrapping needs only the license key and,
//! for machine-bound packs, the machine id. No server round-trip.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "GRX2"
//!      4     1  version (3 = extended)
//!      5     1  algorithm (1)
//!      6     1  KDF (1)
//!      7     1  key type (1 = TMK, 2 = CTMK)
//!      8     2  tier id (big-endian u16)
//!     10     2  TMK version (big-endian u16)
//!     12    12  payload IV
//!     24    16  payload auth tag
//!     40    32  payload salt (zero-filled in TMK mode)
//!     72     4  payload length (big-endian u32)
//!     76    16  pack hash (truncated SHA-256 of plaintext)
//!     92     2  reserved
//!     94     1  flags: bit 0 = extended (must be 1), bit 1 = portable
//!     95     1  reserved
//!     96     4  wrapped-TMK block length (big-endian u32)
//!    100     W  wrapped-TMK block (JSON)
//!  100+W     P  AEAD payload
//! ```
//!
//! The wrapped-TMK block is JSON `{k, i, t, v, s}`: base64 encrypted key,
//! IV and auth tag, the integer TMK version, and the base64 LDK salt.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, IV_LEN, KEY_LEN, PACK_HASH_LEN, TAG_LEN};
use crate::diagnostics::{CoreError, CoreResult};
use crate::pack::{LoadedPack, RulePackDocument, compile_entries};

/// Only GRX2 version readable by this loader (the extended format).
pub const GRX2_VERSION_EXTENDED: u8 = 3;
/// Key-type byte: vendor-owned tier master key.
pub const KEY_TYPE_TMK: u8 = 1;
/// Key-type byte: customer-owned tier master key.
pub const KEY_TYPE_CTMK: u8 = 2;
/// Flag bit 0: extended (embedded wrapped TMK).
pub const FLAG_EXTENDED: u8 = 0b0000_0001;
/// Flag bit 1: portable (no machine binding).
pub const FLAG_PORTABLE: u8 = 0b0000_0010;
/// Fixed header length before the wrapped-TMK block.
pub const GRX2_FIXED_HEADER_LEN: usize = 100;
/// Priority stamped on GRX2 packs unless the caller overrides it.
pub const GRX2_DEFAULT_PRIORITY: u32 = 300;

const SALT_LEN: usize = 32;

/// Wire form of the embedded wrapped-TMK block.
#[derive(Debug, Serialize, Deserialize)]
struct WrappedTmk {
    /// Base64 AES-GCM ciphertext of the TMK.
    k: String,
    /// Base64 12-byte IV used to wrap the TMK.
    i: String,
    /// Base64 16-byte auth tag of the wrap.
    t: String,
    /// TMK version.
    v: u16,
    /// Base64 LDK salt.
    s: String,
}

struct Grx2Header {
    key_type: u8,
    tier_id: u16,
    tmk_version: u16,
    iv: [u8; IV_LEN],
    tag: [u8; TAG_LEN],
    payload_len: usize,
    pack_hash: [u8; PACK_HASH_LEN],
    portable: bool,
    wrapped: WrappedTmk,
    payload_offset: usize,
}

fn invalid(detail: impl Into<String>) -> CoreError {
    CoreError::InvalidFormat {
        detail: detail.into(),
    }
}

fn corrupted(detail: impl Into<String>) -> CoreError {
    CoreError::PackCorrupted {
        detail: detail.into(),
    }
}

fn be_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn parse_header(bytes: &[u8]) -> CoreResult<Grx2Header> {
    if bytes.len() < GRX2_FIXED_HEADER_LEN {
        return Err(invalid("file shorter than GRX2 header"));
    }
    if &bytes[0..4] != crate::format::GRX2_MAGIC {
        return Err(invalid("bad magic"));
    }
    if bytes[4] != GRX2_VERSION_EXTENDED {
        return Err(invalid(format!("unsupported version {}", bytes[4])));
    }
    if bytes[5] != crate::grpx::ALG_AES_256_GCM {
        return Err(invalid(format!("unsupported algorithm {}", bytes[5])));
    }
    if bytes[6] != crate::grpx::KDF_PBKDF2 {
        return Err(invalid(format!("unsupported KDF {}", bytes[6])));
    }
    let key_type = bytes[7];
    if key_type != KEY_TYPE_TMK && key_type != KEY_TYPE_CTMK {
        return Err(invalid(format!("unknown key type {key_type}")));
    }
    let flags = bytes[94];
    if flags & FLAG_EXTENDED == 0 {
        // Non-extended GRX2 packs need a server-provided TMK; this core
        // does not handle them.
        return Err(invalid("not an extended pack; requires external activation"));
    }
    let portable = flags & FLAG_PORTABLE != 0;

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&bytes[12..24]);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&bytes[24..40]);
    let payload_len = be_u32(bytes, 72) as usize;
    let mut pack_hash = [0u8; PACK_HASH_LEN];
    pack_hash.copy_from_slice(&bytes[76..92]);

    let wrapped_len = be_u32(bytes, 96) as usize;
    let payload_offset = GRX2_FIXED_HEADER_LEN
        .checked_add(wrapped_len)
        .ok_or_else(|| invalid("wrapped block length overflow"))?;
    if payload_offset > bytes.len() {
        return Err(invalid("wrapped block length overruns file"));
    }
    let wrapped: WrappedTmk =
        serde_json::from_slice(&bytes[GRX2_FIXED_HEADER_LEN..payload_offset])
            .map_err(|_| invalid("malformed wrapped-TMK block"))?;

    if payload_offset
        .checked_add(payload_len)
        .is_none_or(|end| end > bytes.len())
    {
        return Err(invalid("payload length overruns file"));
    }

    Ok(Grx2Header {
        key_type,
        tier_id: be_u16(bytes, 8),
        tmk_version: be_u16(bytes, 10),
        iv,
        tag,
        payload_len,
        pack_hash,
        portable,
        wrapped,
        payload_offset,
    })
}

fn decode_b64(field: &str, expected_len: Option<usize>) -> CoreResult<Vec<u8>> {
    let bytes = BASE64
        .decode(field)
        .map_err(|_| invalid("wrapped-TMK field is not base64"))?;
    if let Some(len) = expected_len {
        if bytes.len() != len {
            return Err(invalid("wrapped-TMK field has wrong length"));
        }
    }
    Ok(bytes)
}

/// Load a GRX2 extended pack from its raw bytes.
///
/// `machine_id` participates in LDK derivation unless the pack carries
/// the portable flag, in which case it is ignored entirely.
pub fn load(bytes: &[u8], license_key: &str, machine_id: &str) -> CoreResult<LoadedPack> {
    let header = parse_header(bytes)?;
    tracing::debug!(
        key_type = header.key_type,
        tier = header.tier_id,
        tmk_version = header.tmk_version,
        portable = header.portable,
        "loading GRX2 extended pack"
    );

    let wrapped_key = decode_b64(&header.wrapped.k, None)?;
    let wrap_iv = decode_b64(&header.wrapped.i, Some(IV_LEN))?;
    let wrap_tag = decode_b64(&header.wrapped.t, Some(TAG_LEN))?;
    let ldk_salt_base = decode_b64(&header.wrapped.s, None)?;

    // LDK salt: pack salt, plus the machine id for bound packs.
    let mut ldk_salt = Zeroizing::new(ldk_salt_base);
    if !header.portable {
        ldk_salt.extend_from_slice(machine_id.as_bytes());
    }

    let ldk = crypto::derive_key(license_key.as_bytes(), &ldk_salt);
    let mut iv_arr = [0u8; IV_LEN];
    iv_arr.copy_from_slice(&wrap_iv);
    let mut tag_arr = [0u8; TAG_LEN];
    tag_arr.copy_from_slice(&wrap_tag);
    let tmk_bytes = crypto::aes_gcm_decrypt(&wrapped_key, &ldk, &iv_arr, &tag_arr).map_err(
        |err| {
            tracing::debug!("GRX2 TMK unwrap failed");
            err
        },
    )?;
    drop(ldk);
    if tmk_bytes.len() != KEY_LEN {
        return Err(CoreError::DecryptionFailed);
    }
    let mut tmk = Zeroizing::new([0u8; KEY_LEN]);
    tmk.copy_from_slice(&tmk_bytes);
    drop(tmk_bytes);

    let payload = &bytes[header.payload_offset..header.payload_offset + header.payload_len];
    let plaintext =
        crypto::aes_gcm_decrypt(payload, &tmk, &header.iv, &header.tag).map_err(|err| {
            tracing::debug!("GRX2 payload decryption failed");
            err
        })?;
    drop(tmk);

    let computed = crypto::pack_hash(&plaintext);
    if !crypto::ct_eq(&computed, &header.pack_hash) {
        return Err(corrupted("pack hash mismatch"));
    }

    let document: RulePackDocument = serde_json::from_slice(&plaintext)
        .map_err(|_| corrupted("pack plaintext is not a valid pack document"))?;

    let rules =
        compile_entries(&document.rules).map_err(|detail| corrupted(detail))?;

    Ok(LoadedPack::from_document(&document, rules))
}

/// Options for building a GRX2 extended pack.
#[derive(Debug, Clone)]
pub struct Grx2BuildOptions {
    pub tier_id: u16,
    pub tmk_version: u16,
    pub key_type: u8,
    /// `Some` binds the pack to that machine; `None` builds a portable
    /// pack.
    pub machine_id: Option<String>,
}

impl Default for Grx2BuildOptions {
    fn default() -> Self {
        Self {
            tier_id: 1,
            tmk_version: 1,
            key_type: KEY_TYPE_TMK,
            machine_id: None,
        }
    }
}

impl Grx2BuildOptions {
    /// Portable pack (no machine binding).
    pub fn portable() -> Self {
        Self::default()
    }

    /// Pack bound to one machine id.
    pub fn bound_to(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: Some(machine_id.into()),
            ..Self::default()
        }
    }
}

/// Build a GRX2 extended pack from a document under the given license key.
pub fn build(
    document: &RulePackDocument,
    license_key: &str,
    options: &Grx2BuildOptions,
) -> CoreResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(document).map_err(|e| CoreError::InvalidFormat {
        detail: format!("pack document serialization: {e}"),
    })?;
    let hash = crypto::pack_hash(&plaintext);

    // Fresh TMK for this pack.
    let tmk = Zeroizing::new(crypto::random_bytes::<KEY_LEN>());
    let (payload_iv, ciphertext, payload_tag) = crypto::aes_gcm_encrypt(&plaintext, &tmk)?;

    // Wrap the TMK under the license-derived key.
    let salt: [u8; SALT_LEN] = crypto::random_bytes();
    let mut ldk_salt = Zeroizing::new(salt.to_vec());
    if let Some(machine_id) = &options.machine_id {
        ldk_salt.extend_from_slice(machine_id.as_bytes());
    }
    let ldk = crypto::derive_key(license_key.as_bytes(), &ldk_salt);
    let (wrap_iv, wrapped_key, wrap_tag) = crypto::aes_gcm_encrypt(tmk.as_slice(), &ldk)?;
    drop(ldk);
    drop(tmk);

    let wrapped = WrappedTmk {
        k: BASE64.encode(&wrapped_key),
        i: BASE64.encode(wrap_iv),
        t: BASE64.encode(wrap_tag),
        v: options.tmk_version,
        s: BASE64.encode(salt),
    };
    let wrapped_json = serde_json::to_vec(&wrapped).map_err(|e| CoreError::InvalidFormat {
        detail: format!("wrapped-TMK serialization: {e}"),
    })?;

    let mut flags = FLAG_EXTENDED;
    if options.machine_id.is_none() {
        flags |= FLAG_PORTABLE;
    }

    let mut out =
        Vec::with_capacity(GRX2_FIXED_HEADER_LEN + wrapped_json.len() + ciphertext.len());
    out.extend_from_slice(crate::format::GRX2_MAGIC);
    out.push(GRX2_VERSION_EXTENDED);
    out.push(crate::grpx::ALG_AES_256_GCM);
    out.push(crate::grpx::KDF_PBKDF2);
    out.push(options.key_type);
    out.extend_from_slice(&options.tier_id.to_be_bytes());
    out.extend_from_slice(&options.tmk_version.to_be_bytes());
    out.extend_from_slice(&payload_iv);
    out.extend_from_slice(&payload_tag);
    // Payload salt is unused in TMK mode.
    out.extend_from_slice(&[0u8; SALT_LEN]);
    out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    out.extend_from_slice(&hash);
    out.extend_from_slice(&[0u8; 2]);
    out.push(flags);
    out.push(0);
    out.extend_from_slice(&(wrapped_json.len() as u32).to_be_bytes());
    out.extend_from_slice(&wrapped_json);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}
