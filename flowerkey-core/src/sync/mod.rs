//! Encrypted sync for FlowerKey
//!
//! Devices share nothing but a dumb blob store:
//! - Local change records are pushed as one AES-256-GCM batch per round
//! - Remote batches are pulled and applied with last-write-wins resolution
//! - An advisory lock object serializes rounds across devices
//! - The oplog is periodically folded into an encrypted snapshot

pub mod backend;
pub mod change_tracker;
pub mod config;
pub mod conflict;
pub mod crypto;
pub mod device;
pub mod engine;
pub mod models;
pub mod tombstones;

pub use backend::{BackendError, BackendResult, DirBackend, MemoryBackend, StorageBackend};
#[cfg(feature = "webdav")]
pub use backend::{WebDavBackend, WebDavConfig};
pub use config::{SyncSettings, SyncState};
pub use conflict::{ConflictResolver, Resolution};
pub use device::DeviceId;
pub use engine::SyncEngine;
pub use models::{OpLogEntry, SyncReport, SyncStatus, Tombstone};
