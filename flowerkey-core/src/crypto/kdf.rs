//! PBKDF2 key derivation for the memory secret.
//!
//! Uses PBKDF2-HMAC-SHA256 with:
//! - Iterations: 600,000
//! - Output length: 32 bytes (256 bits)
//! - Salt: UTF-8 string, prefixed per purpose so the same secret and salt
//!   never yield the same bytes for two different uses

use crate::crypto::cipher::VaultKey;
use crate::crypto::{CryptoError, Result};
use data_encoding::HEXLOWER;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Minimum accepted PBKDF2 iteration count.
pub const MIN_ITERATIONS: u32 = 600_000;

/// Length of every derived key in bytes.
pub const KEY_LENGTH: usize = 32;

const VERIFY_SALT_PREFIX: &str = "flowerkey_verify_";
const DATABASE_SALT_PREFIX: &str = "flowerkey_dbenc_";

/// What a derived key is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Hash stored locally to confirm a re-entered memory secret
    Verify,
    /// Symmetric key for field and sync batch encryption
    DatabaseEncryption,
    /// Master bits keying the deterministic password generator
    PasswordGeneration,
}

impl KeyPurpose {
    /// Salt prefix for this purpose.
    ///
    /// Password generation uses the bare user salt so generated passwords
    /// stay identical on every device sharing the account salt.
    pub fn salt_prefix(self) -> &'static str {
        match self {
            Self::Verify => VERIFY_SALT_PREFIX,
            Self::DatabaseEncryption => DATABASE_SALT_PREFIX,
            Self::PasswordGeneration => "",
        }
    }

    /// The salt actually fed to PBKDF2.
    pub fn namespaced_salt(self, salt: &str) -> String {
        format!("{}{}", self.salt_prefix(), salt)
    }
}

/// Parameters for PBKDF2 key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Number of PBKDF2 rounds
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
        }
    }
}

impl KdfParams {
    /// Verify that parameters are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(CryptoError::KdfFailed(format!(
                "Iteration count too low (minimum: {})",
                MIN_ITERATIONS
            )));
        }
        Ok(())
    }

    /// Derive 256 bits of key material for `purpose`.
    pub fn derive(&self, secret: &[u8], salt: &str, purpose: KeyPurpose) -> Result<DerivedKey> {
        self.validate()?;

        let salt = purpose.namespaced_salt(salt);
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt.as_bytes(), self.iterations, &mut key);

        Ok(DerivedKey { key })
    }
}

/// Raw derived key material, zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    /// Get a reference to the key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Lowercase hex rendering, used for the stored verification hash.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.key)
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derive key material with the default parameters.
pub fn derive_bits(secret: &[u8], salt: &str, purpose: KeyPurpose) -> Result<DerivedKey> {
    KdfParams::default().derive(secret, salt, purpose)
}

/// Create the hash that later confirms a re-entered memory secret.
///
/// The returned hex string is safe to persist; the secret itself never is.
pub fn create_verify_hash(secret: &[u8], verify_salt: &str) -> Result<String> {
    Ok(derive_bits(secret, verify_salt, KeyPurpose::Verify)?.to_hex())
}

/// Check a memory secret against a stored verification hash.
///
/// The comparison is constant-time over the derived bytes. A stored hash
/// that is not valid hex never matches.
pub fn verify_secret(secret: &[u8], verify_salt: &str, stored_hash: &str) -> Result<bool> {
    let derived = derive_bits(secret, verify_salt, KeyPurpose::Verify)?;

    let Ok(expected) = HEXLOWER.decode(stored_hash.to_ascii_lowercase().as_bytes()) else {
        return Ok(false);
    };

    Ok(derived.as_bytes().as_slice().ct_eq(expected.as_slice()).into())
}

/// Derive the symmetric vault key from the memory secret and user salt.
pub fn derive_vault_key(secret: &[u8], user_salt: &str) -> Result<VaultKey> {
    let derived = derive_bits(secret, user_salt, KeyPurpose::DatabaseEncryption)?;
    Ok(VaultKey::from_bytes(*derived.as_bytes()))
}

/// Generate a random 16-byte salt, hex encoded.
pub fn generate_salt() -> String {
    let salt: [u8; 16] = rand::random();
    HEXLOWER.encode(&salt)
}
