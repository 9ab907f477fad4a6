//! FlowerKey Core Library
//!
//! Local-first encrypted vault synchronization:
//! - PBKDF2 key derivation and stateless deterministic passwords
//! - AES-256-GCM field and batch encryption with a versioned envelope
//! - SQLite-backed entry store with an append-only change log
//! - Lock/push/pull/compact sync rounds over a dumb blob store

pub mod crypto;
pub mod database;
pub mod sync;
pub mod vault;

pub use crypto::{
    create_verify_hash, derive_bits, derive_vault_key, generate_password, verify_secret,
    CharsetMode, CryptoError, FieldCodec, KdfParams, KeyPurpose, KeyRing, MasterPasswordData,
    Session, VaultKey,
};
pub use database::{
    ChangeKind, ChangeLogRecord, ChangeOperation, Entry, EntryPatch, EntryType, NewEntry,
};
pub use sync::{
    DeviceId, MemoryBackend, StorageBackend, SyncEngine, SyncReport, SyncSettings, SyncStatus,
};
pub use vault::{RemoteApply, Vault};

use thiserror::Error;

/// Result type for FlowerKey operations
pub type Result<T> = std::result::Result<T, FlowerKeyError>;

/// General error type for FlowerKey operations
#[derive(Error, Debug)]
pub enum FlowerKeyError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage backend error: {0}")]
    Backend(#[from] sync::BackendError),

    #[error("Remote sync lock is held by device {holder} until {expires_at}")]
    LockBusy { holder: String, expires_at: i64 },

    #[error("A sync round is already running on this device")]
    SyncInProgress,

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowerKeyError {
    /// Whether the caller may simply try the same operation again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockBusy { .. } | Self::SyncInProgress | Self::Backend(_)
        )
    }
}

/// Errors raised by the local SQLite store
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let busy = FlowerKeyError::LockBusy {
            holder: "a1b2".to_string(),
            expires_at: 0,
        };
        assert!(busy.is_retryable());
        assert!(FlowerKeyError::SyncInProgress.is_retryable());
        assert!(!FlowerKeyError::Crypto(CryptoError::AuthenticationFailed).is_retryable());
        assert!(!FlowerKeyError::InvalidInput("length".into()).is_retryable());
    }
}
