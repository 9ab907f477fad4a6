//! Sync data models: remote object names, wire records and round reports.

use crate::database::{ChangeKind, ChangeOperation, Entry};
use crate::sync::DeviceId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advisory lock object, plaintext JSON.
pub const LOCK_OBJECT: &str = "sync.lock";

/// Encrypted full snapshot written by compaction.
pub const SNAPSHOT_OBJECT: &str = "vault.enc";

/// Encrypted delete markers that travel with the snapshot.
pub const SNAPSHOT_TOMBSTONES_OBJECT: &str = "vault.deleted.enc";

/// Plaintext description of the current snapshot.
pub const SNAPSHOT_MARKER_OBJECT: &str = "vault.meta";

/// Directory holding encrypted batches.
pub const OPLOG_DIR: &str = "oplog";

const BATCH_SUFFIX: &str = ".enc";

/// Wire form of one change record.
///
/// `payload` is the full plaintext entry for create/update and absent for
/// delete. The whole batch is encrypted as a single envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpLogEntry {
    pub entry_id: Uuid,
    pub entry_type: ChangeKind,
    pub operation: ChangeOperation,
    pub timestamp: i64,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Entry>,
}

/// A deleted entry and when it went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub entry_id: Uuid,
    pub deleted_at: i64,
}

/// Contents of the lock object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLock {
    pub device_id: String,
    /// Expiry in unix millis
    pub expires: i64,
}

impl RemoteLock {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires <= now
    }

    pub fn is_held_by(&self, device: &DeviceId) -> bool {
        self.device_id == device.as_str()
    }
}

/// Contents of the snapshot marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMarker {
    pub device_id: String,
    pub created_at: i64,
    /// Newest batch timestamp folded into the snapshot
    pub high_water: i64,
    pub entries: usize,
}

/// Parsed batch object name: `{deviceId}_{unixMillis}.enc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchName {
    pub device_id: String,
    pub timestamp: i64,
}

impl BatchName {
    pub fn new(device_id: &DeviceId, timestamp: i64) -> Self {
        Self {
            device_id: device_id.as_str().to_string(),
            timestamp,
        }
    }

    /// Parse a file name as listed in the oplog directory.
    ///
    /// Splits on the last `_`; anything that does not match is not a batch.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(BATCH_SUFFIX)?;
        let (device_id, timestamp) = stem.rsplit_once('_')?;
        if device_id.is_empty() || timestamp.is_empty() {
            return None;
        }
        if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            device_id: device_id.to_string(),
            timestamp: timestamp.parse().ok()?,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}{}", self.device_id, self.timestamp, BATCH_SUFFIX)
    }

    /// Object name relative to the backend base.
    pub fn object_name(&self) -> String {
        oplog_object(&self.file_name())
    }

    pub fn is_from(&self, device: &DeviceId) -> bool {
        self.device_id == device.as_str()
    }
}

/// Full object name for a file listed in the oplog directory.
pub fn oplog_object(file_name: &str) -> String {
    format!("{}/{}", OPLOG_DIR, file_name)
}

/// Outcome of one sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Change records pushed in this round's batch
    pub pushed: usize,
    /// Remote operations received from new batches
    pub pulled: usize,
    /// Remote batches processed
    pub batches_applied: usize,
    /// Remote records skipped because their encryption policy differs
    pub policy_mismatches: usize,
    /// Whether the oplog was folded into a new snapshot
    pub compacted: bool,
    /// Whether a newer snapshot was merged before reading batches
    pub snapshot_merged: bool,
}

/// Local sync status for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub device_id: DeviceId,
    /// High-water mark of processed remote batch timestamps
    pub last_sync_time: i64,
    /// Wall-clock time the last round finished
    pub last_round_at: Option<i64>,
    pub pending_changes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_name_roundtrip() {
        let device = DeviceId::parse("a1b2c3").unwrap();
        let name = BatchName::new(&device, 1_700_000_000_123);

        assert_eq!(name.file_name(), "a1b2c3_1700000000123.enc");
        assert_eq!(name.object_name(), "oplog/a1b2c3_1700000000123.enc");
        assert_eq!(BatchName::parse(&name.file_name()), Some(name.clone()));
        assert!(name.is_from(&device));
    }

    #[test]
    fn batch_name_rejects_foreign_files() {
        assert_eq!(BatchName::parse("notes.txt"), None);
        assert_eq!(BatchName::parse("dev_abc.enc"), None);
        assert_eq!(BatchName::parse("_123.enc"), None);
        assert_eq!(BatchName::parse("dev_.enc"), None);
        assert_eq!(BatchName::parse("dev_-5.enc"), None);
        assert_eq!(BatchName::parse("dev_123.enc.tmp"), None);
    }

    #[test]
    fn lock_wire_format() {
        let lock: RemoteLock = serde_json::from_str(r#"{"deviceId":"abc","expires":99}"#).unwrap();
        assert!(lock.is_expired(99));
        assert!(!lock.is_expired(98));
        assert!(lock.is_held_by(&DeviceId::parse("abc").unwrap()));
        assert_eq!(
            serde_json::to_string(&lock).unwrap(),
            r#"{"deviceId":"abc","expires":99}"#
        );
    }

    #[test]
    fn oplog_entry_wire_format() {
        let op = OpLogEntry {
            entry_id: Uuid::nil(),
            entry_type: ChangeKind::Entry,
            operation: ChangeOperation::Delete,
            timestamp: 5,
            device_id: "abc".into(),
            payload: None,
        };
        let json = serde_json::to_value(&op).unwrap();

        assert_eq!(json["entryType"], "entry");
        assert_eq!(json["operation"], "delete");
        assert_eq!(json["deviceId"], "abc");
        assert!(json.get("payload").is_none());
    }
}
