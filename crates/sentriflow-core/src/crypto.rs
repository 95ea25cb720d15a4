//! Cryptographic primitives for encrypted rule packs.
//!
//! All pack formats use AES-256-GCM with keys derived through
//! PBKDF2-HMAC-SHA256 at a fixed 100,000 iterations. Derived keys,
//! unwrapped TMKs and decrypted payloads are held in [`Zeroizing`]
//! buffers so they are wiped as soon as they go out of scope.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::diagnostics::{CoreError, CoreResult};

/// PBKDF2 iteration count, fixed for every pack format.
pub const PBKDF2_ITERATIONS: u32 = 100_000;
/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
pub const IV_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Truncated pack-hash length in bytes.
pub const PACK_HASH_LEN: usize = 16;

/// Derive an AES-256 key from a secret and salt.
pub fn derive_key(secret: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(secret, salt, PBKDF2_ITERATIONS, key.as_mut());
    key
}

/// Encrypt a plaintext under a fresh random IV.
///
/// Returns `(iv, ciphertext, tag)` with the tag detached, matching the
/// on-disk pack layouts.
pub fn aes_gcm_encrypt(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
) -> CoreResult<([u8; IV_LEN], Vec<u8>, [u8; TAG_LEN])> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut combined = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CoreError::DecryptionFailed)?;
    // aes-gcm appends the tag to the ciphertext; detach it.
    let tag_start = combined.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&combined[tag_start..]);
    combined.truncate(tag_start);
    Ok((iv, combined, tag))
}

/// Decrypt a detached-tag ciphertext.
///
/// Every failure mode (wrong key, tampered ciphertext, tampered tag)
/// collapses into the single opaque [`CoreError::DecryptionFailed`].
pub fn aes_gcm_decrypt(
    ciphertext: &[u8],
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    tag: &[u8; TAG_LEN],
) -> CoreResult<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    cipher
        .decrypt(Nonce::from_slice(iv), combined.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| CoreError::DecryptionFailed)
}

/// Truncated SHA-256 pack hash: the first 16 bytes of the digest.
pub fn pack_hash(bytes: &[u8]) -> [u8; PACK_HASH_LEN] {
    let digest = Sha256::digest(bytes);
    let mut hash = [0u8; PACK_HASH_LEN];
    hash.copy_from_slice(&digest[..PACK_HASH_LEN]);
    hash
}

/// Constant-time equality over byte slices.
///
/// Mandatory for pack-hash comparison; differing lengths compare unequal
/// without leaking where the difference is.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Fill a buffer with cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
