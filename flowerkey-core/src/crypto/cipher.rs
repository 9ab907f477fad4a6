//! AES-256-GCM envelope encryption for fields and sync objects.
//!
//! Envelope layout: `version(1) || nonce(12) || ciphertext || auth_tag(16)`
//! - 256-bit key held by the unlocked session
//! - Fresh random 96-bit nonce per call
//! - Unknown versions are rejected, never decoded leniently

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use zeroize::ZeroizeOnDrop;

/// Current envelope scheme: AES-256-GCM, key from PBKDF2 (600k rounds).
pub const ENVELOPE_VERSION: u8 = 0x01;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// The symmetric vault key.
///
/// Only the session, the key derivation and the codec touch the bytes.
/// The key is zeroized when the last holder drops it.
#[derive(ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; 32],
}

impl VaultKey {
    /// Create a vault key from raw bytes (use with caution)
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Generate a random key; used for tests and throwaway sessions.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Encrypt `plaintext` into a versioned envelope.
///
/// # Security Notes
/// - Never reuse nonces with the same key!
/// - The nonce is generated randomly for each encryption
pub fn encrypt(key: &VaultKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // aes-gcm appends the tag, so this is ciphertext || tag
    let sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    let mut envelope = Vec::with_capacity(HEADER_LEN + sealed.len());
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(nonce.as_slice());
    envelope.extend_from_slice(&sealed);

    Ok(envelope)
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Returns `UnsupportedVersion` for an unknown leading byte and
/// `AuthenticationFailed` for a wrong key or tampered bytes.
pub fn decrypt(key: &VaultKey, envelope: &[u8]) -> Result<Vec<u8>> {
    let Some((&version, body)) = envelope.split_first() else {
        return Err(CryptoError::DecryptionFailed("Empty envelope".to_string()));
    };

    match version {
        ENVELOPE_VERSION => decrypt_v1(key, body),
        other => Err(CryptoError::UnsupportedVersion(other)),
    }
}

fn decrypt_v1(key: &VaultKey, body: &[u8]) -> Result<Vec<u8>> {
    if body.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed(format!(
            "Envelope too short: {} bytes",
            body.len() + 1
        )));
    }

    let (nonce_bytes, ciphertext_with_tag) = body.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext_with_tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Session-scoped handle that seals and opens values under the vault key.
///
/// Cheap to clone; every clone shares the same key, which is zeroized
/// once the session and all codecs are dropped.
#[derive(Clone)]
pub struct FieldCodec {
    key: Arc<VaultKey>,
}

impl FieldCodec {
    pub fn new(key: Arc<VaultKey>) -> Self {
        Self { key }
    }

    /// Seal arbitrary bytes (a serialized batch or snapshot).
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        encrypt(&self.key, plaintext)
    }

    /// Open an envelope produced by [`FieldCodec::seal`].
    pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        decrypt(&self.key, envelope)
    }

    /// Seal a string field for storage, returned as base64 text.
    pub fn seal_field(&self, plaintext: &str) -> Result<String> {
        Ok(STANDARD.encode(self.seal(plaintext.as_bytes())?))
    }

    /// Open a base64 field produced by [`FieldCodec::seal_field`].
    pub fn open_field(&self, sealed: &str) -> Result<String> {
        let envelope = STANDARD
            .decode(sealed)
            .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid base64 field: {}", e)))?;
        let bytes = self.open(&envelope)?;
        String::from_utf8(bytes)
            .map_err(|_| CryptoError::DecryptionFailed("Invalid UTF-8".to_string()))
    }
}

impl std::fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCodec(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FieldCodec {
        FieldCodec::new(Arc::new(VaultKey::generate()))
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = VaultKey::generate();
        let plaintext = b"Hello, World! This is a test.";

        let envelope = encrypt(&key, plaintext).unwrap();
        assert_eq!(envelope[0], ENVELOPE_VERSION);
        assert_eq!(envelope.len(), 1 + 12 + plaintext.len() + 16);

        assert_eq!(decrypt(&key, &envelope).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let key = VaultKey::generate();
        let envelope = encrypt(&key, b"").unwrap();
        assert!(decrypt(&key, &envelope).unwrap().is_empty());
    }

    #[test]
    fn test_different_nonces() {
        let key = VaultKey::generate();

        let a = encrypt(&key, b"Same data").unwrap();
        let b = encrypt(&key, b"Same data").unwrap();

        assert_ne!(&a[1..13], &b[1..13]);
        assert_ne!(a, b);
        assert_eq!(decrypt(&key, &a).unwrap(), decrypt(&key, &b).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt(&VaultKey::generate(), b"Secret data").unwrap();
        assert!(matches!(
            decrypt(&VaultKey::generate(), &envelope),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_any_flipped_byte_is_detected() {
        let key = VaultKey::generate();
        let envelope = encrypt(&key, b"Original data").unwrap();

        // Byte 0 is the version; every byte after it is nonce, ciphertext or tag.
        for i in 1..envelope.len() {
            let mut tampered = envelope.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(decrypt(&key, &tampered), Err(CryptoError::AuthenticationFailed)),
                "flip at byte {} went undetected",
                i
            );
        }
    }

    #[test]
    fn test_unknown_version_rejected() {
        let key = VaultKey::generate();
        let mut envelope = encrypt(&key, b"data").unwrap();
        envelope[0] = 0x02;

        assert!(matches!(
            decrypt(&key, &envelope),
            Err(CryptoError::UnsupportedVersion(0x02))
        ));
    }

    #[test]
    fn test_truncated_envelope_rejected() {
        let key = VaultKey::generate();
        assert!(decrypt(&key, &[]).is_err());
        assert!(decrypt(&key, &[ENVELOPE_VERSION; 20]).is_err());

        let envelope = encrypt(&key, b"secret data").unwrap();
        assert!(decrypt(&key, &envelope[..envelope.len() - 5]).is_err());
    }

    #[test]
    fn test_field_roundtrip() {
        let codec = codec();
        let sealed = codec.seal_field("https://example.com/login").unwrap();

        assert!(!sealed.contains("example"));
        assert_eq!(codec.open_field(&sealed).unwrap(), "https://example.com/login");
    }

    #[test]
    fn test_field_rejects_plaintext_input() {
        let codec = codec();
        assert!(codec.open_field("plain title").is_err());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let key = VaultKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{:?}", key), "VaultKey(..)");
    }
}
