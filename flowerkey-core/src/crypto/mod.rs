//! Cryptographic primitives for the vault.
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA256 key derivation with purpose-namespaced salts
//! - Deterministic, stateless site password generation
//! - AES-256-GCM envelope encryption for fields and sync batches
//! - Session key management and zeroization utilities

pub mod cipher;
pub mod kdf;
pub mod keyring;
pub mod password;
pub mod zero;

pub use cipher::{decrypt, encrypt, FieldCodec, VaultKey, ENVELOPE_VERSION};
pub use kdf::{
    create_verify_hash, derive_bits, derive_vault_key, generate_salt, verify_secret, DerivedKey,
    KdfParams, KeyPurpose,
};
pub use keyring::{KeyRing, MasterPasswordData, Session, DEFAULT_USER_SALT};
pub use password::{generate_password, CharsetMode};
pub use zero::SecureBuffer;

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Unsupported envelope version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Memory secret does not match the stored verification hash")]
    InvalidSecret,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
