//! Storage backends: dumb remote blob stores the sync engine talks to.
//!
//! A backend offers no transactions and no conditional writes. Object names
//! are relative to the backend base; batches live under `oplog/`.

mod dir;
mod memory;
#[cfg(feature = "webdav")]
mod webdav;

pub use dir::DirBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "webdav")]
pub use webdav::{WebDavBackend, WebDavConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a storage backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} {name} failed with HTTP status {status}")]
    Http {
        status: u16,
        op: &'static str,
        name: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid object name: {0:?}")]
    InvalidName(String),

    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Contract every remote store implements.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create the base and oplog directories. Idempotent.
    async fn ensure_dir(&self) -> BackendResult<()>;

    /// Read an object; a missing object is `None`, not an error.
    async fn read(&self, name: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Write an object, replacing any previous content.
    async fn write(&self, name: &str, data: &[u8]) -> BackendResult<()>;

    /// File names inside the oplog directory, sorted.
    async fn list_oplog(&self) -> BackendResult<Vec<String>>;

    /// Remove an object. Removing a missing object succeeds.
    async fn remove(&self, name: &str) -> BackendResult<()>;
}

/// Reject names that could escape the backend base.
pub(crate) fn validate_name(name: &str) -> BackendResult<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(BackendError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(validate_name("sync.lock").is_ok());
        assert!(validate_name("oplog/dev_1.enc").is_ok());

        for bad in ["", "/etc/passwd", "../x", "oplog/../x", "a//b", "a\\b", "oplog/"] {
            assert!(validate_name(bad).is_err(), "{:?} accepted", bad);
        }
    }
}
