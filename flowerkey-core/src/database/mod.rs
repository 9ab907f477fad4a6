//! Database layer for the vault.
//!
//! This module handles schema management and the plaintext entry models.
//! Sealing of sensitive fields happens in [`crate::vault`].

pub mod models;
pub mod schema;

pub use models::{
    ChangeKind, ChangeLogRecord, ChangeOperation, Entry, EntryPatch, EntryType, NewEntry,
};
pub use schema::Database;
