//! Sync encryption: seal/open batches and snapshots for transport.
//!
//! Each object is one envelope around its whole JSON body, so a reader
//! learns nothing about how many records a batch carries beyond its size.

use crate::crypto::FieldCodec;
use crate::database::Entry;
use crate::sync::models::{OpLogEntry, Tombstone};
use crate::Result;

/// Serialize and encrypt one batch of operations.
pub fn seal_batch(codec: &FieldCodec, ops: &[OpLogEntry]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(ops)?;
    Ok(codec.seal(&json)?)
}

/// Decrypt and parse a batch. Any failure rejects the whole batch.
pub fn open_batch(codec: &FieldCodec, envelope: &[u8]) -> Result<Vec<OpLogEntry>> {
    let json = codec.open(envelope)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Serialize and encrypt the full record set.
pub fn seal_snapshot(codec: &FieldCodec, entries: &[Entry]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(entries)?;
    Ok(codec.seal(&json)?)
}

pub fn open_snapshot(codec: &FieldCodec, envelope: &[u8]) -> Result<Vec<Entry>> {
    let json = codec.open(envelope)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Serialize and encrypt the delete markers folded into a snapshot.
pub fn seal_tombstones(codec: &FieldCodec, tombstones: &[Tombstone]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(tombstones)?;
    Ok(codec.seal(&json)?)
}

pub fn open_tombstones(codec: &FieldCodec, envelope: &[u8]) -> Result<Vec<Tombstone>> {
    let json = codec.open(envelope)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoError, VaultKey};
    use crate::database::{ChangeKind, ChangeOperation, NewEntry};
    use crate::FlowerKeyError;
    use std::sync::Arc;
    use uuid::Uuid;

    fn codec() -> FieldCodec {
        FieldCodec::new(Arc::new(VaultKey::generate()))
    }

    fn sample_ops() -> Vec<OpLogEntry> {
        let entry =
            NewEntry::bookmark("https://example.com", "Example").into_entry(Uuid::new_v4(), 7);
        vec![
            OpLogEntry {
                entry_id: entry.id,
                entry_type: ChangeKind::Entry,
                operation: ChangeOperation::Create,
                timestamp: 7,
                device_id: "devA".into(),
                payload: Some(entry.clone()),
            },
            OpLogEntry {
                entry_id: entry.id,
                entry_type: ChangeKind::Entry,
                operation: ChangeOperation::Delete,
                timestamp: 8,
                device_id: "devA".into(),
                payload: None,
            },
        ]
    }

    #[test]
    fn batch_roundtrip_hides_contents() {
        let codec = codec();
        let ops = sample_ops();

        let sealed = seal_batch(&codec, &ops).unwrap();
        assert!(!String::from_utf8_lossy(&sealed).contains("example.com"));
        assert_eq!(open_batch(&codec, &sealed).unwrap(), ops);
    }

    #[test]
    fn batch_under_other_key_is_rejected() {
        let sealed = seal_batch(&codec(), &sample_ops()).unwrap();
        assert!(matches!(
            open_batch(&codec(), &sealed),
            Err(FlowerKeyError::Crypto(CryptoError::AuthenticationFailed))
        ));
    }

    #[test]
    fn well_sealed_garbage_is_a_serialization_error() {
        let codec = codec();
        let sealed = codec.seal(b"not json").unwrap();
        assert!(matches!(
            open_batch(&codec, &sealed),
            Err(FlowerKeyError::Serialization(_))
        ));
    }

    #[test]
    fn snapshot_roundtrip() {
        let codec = codec();
        let entries = vec![
            NewEntry::file_ref("a.pdf", "https://a.example").into_entry(Uuid::new_v4(), 1),
            NewEntry::bookmark("https://b.example", "B").into_entry(Uuid::new_v4(), 2),
        ];
        let sealed = seal_snapshot(&codec, &entries).unwrap();
        assert_eq!(open_snapshot(&codec, &sealed).unwrap(), entries);
        let empty = seal_snapshot(&codec, &[]).unwrap();
        assert_eq!(open_snapshot(&codec, &empty).unwrap(), vec![]);
    }

    #[test]
    fn tombstones_are_sealed() {
        let codec = codec();
        let id = Uuid::new_v4();
        let tombstones = vec![Tombstone {
            entry_id: id,
            deleted_at: 42,
        }];

        let sealed = seal_tombstones(&codec, &tombstones).unwrap();
        assert!(!String::from_utf8_lossy(&sealed).contains(&id.to_string()));
        assert_eq!(open_tombstones(&codec, &sealed).unwrap(), tombstones);
    }
}
