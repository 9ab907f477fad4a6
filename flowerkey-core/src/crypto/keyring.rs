//! Memory secret lifecycle.
//!
//! Setup and unlock turn the memory secret into an explicit [`Session`]:
//! Memory secret → PBKDF2 (verify salt) → stored verification hash
//! Memory secret → PBKDF2 (user salt, dbenc prefix) → vault key
//!
//! Locking is dropping the session; the secret and key are zeroized.

use crate::crypto::cipher::{FieldCodec, VaultKey};
use crate::crypto::kdf::{generate_salt, KdfParams, KeyPurpose};
use crate::crypto::password::{generate_from_master_key, CharsetMode};
use crate::crypto::zero::SecureBuffer;
use crate::crypto::{CryptoError, Result};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// User salt applied when the account does not choose one.
pub const DEFAULT_USER_SALT: &str = "FlowerKey";

/// Persisted verification record for the memory secret.
///
/// Safe to store locally: it contains only a derived hash and salts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterPasswordData {
    pub verify_hash: String,
    /// Shared account salt; keeps generated passwords identical across devices
    pub user_salt: String,
    /// Random per-install salt for the verify hash. Older records lack it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_salt: Option<String>,
    pub created_at: i64,
}

impl MasterPasswordData {
    fn effective_verify_salt(&self) -> &str {
        self.verify_salt.as_deref().unwrap_or(&self.user_salt)
    }
}

/// Creates and unlocks sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyRing {
    params: KdfParams,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: KdfParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// First-time setup: returns the record to persist and an unlocked session.
    pub fn setup(
        &self,
        secret: &[u8],
        user_salt: Option<&str>,
    ) -> Result<(MasterPasswordData, Session)> {
        if secret.is_empty() {
            return Err(CryptoError::InvalidParameter(
                "Memory secret must not be empty".to_string(),
            ));
        }

        let user_salt = user_salt
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_USER_SALT)
            .to_string();
        let verify_salt = generate_salt();

        let verify_hash = self
            .params
            .derive(secret, &verify_salt, KeyPurpose::Verify)?
            .to_hex();

        let data = MasterPasswordData {
            verify_hash,
            user_salt: user_salt.clone(),
            verify_salt: Some(verify_salt),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let session = self.open_session(secret, user_salt)?;
        Ok((data, session))
    }

    /// Unlock with a re-entered memory secret.
    pub fn unlock(&self, secret: &[u8], data: &MasterPasswordData) -> Result<Session> {
        let derived = self
            .params
            .derive(secret, data.effective_verify_salt(), KeyPurpose::Verify)?;

        let expected = HEXLOWER
            .decode(data.verify_hash.to_ascii_lowercase().as_bytes())
            .map_err(|_| CryptoError::InvalidSecret)?;

        if !bool::from(derived.as_bytes().as_slice().ct_eq(expected.as_slice())) {
            return Err(CryptoError::InvalidSecret);
        }

        self.open_session(secret, data.user_salt.clone())
    }

    /// Replace the memory secret, keeping the account user salt.
    ///
    /// The caller must re-seal stored data with the new session's codec.
    pub fn change_secret(
        &self,
        current: &Session,
        new_secret: &[u8],
    ) -> Result<(MasterPasswordData, Session)> {
        self.setup(new_secret, Some(current.user_salt()))
    }

    fn open_session(&self, secret: &[u8], user_salt: String) -> Result<Session> {
        let derived = self
            .params
            .derive(secret, &user_salt, KeyPurpose::DatabaseEncryption)?;

        Ok(Session {
            secret: SecureBuffer::from(secret),
            user_salt,
            key: Arc::new(VaultKey::from_bytes(*derived.as_bytes())),
            params: self.params,
        })
    }
}

/// An unlocked vault session.
///
/// Holds the vault key shared by the codec and the sync engine. The memory
/// secret is kept only so site passwords can be regenerated on demand.
pub struct Session {
    secret: SecureBuffer,
    user_salt: String,
    key: Arc<VaultKey>,
    params: KdfParams,
}

impl Session {
    /// Codec bound to this session's vault key.
    pub fn codec(&self) -> FieldCodec {
        FieldCodec::new(Arc::clone(&self.key))
    }

    pub fn user_salt(&self) -> &str {
        &self.user_salt
    }

    /// Regenerate the deterministic password for `codename`.
    pub fn generate_password(
        &self,
        codename: &str,
        mode: CharsetMode,
        length: usize,
    ) -> Result<String> {
        let master = self.params.derive(
            self.secret.as_bytes(),
            &self.user_salt,
            KeyPurpose::PasswordGeneration,
        )?;
        generate_from_master_key(&master, codename, mode, length)
    }

    /// Lock the session. Key bytes are zeroized once outstanding codecs drop.
    pub fn lock(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_salt", &self.user_salt)
            .finish_non_exhaustive()
    }
}
