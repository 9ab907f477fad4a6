//! Sync settings and the per-device sync state stored in the local config table.

use crate::vault::Vault;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config key holding [`SyncState`].
pub const SYNC_STATE_KEY: &str = "syncState";

/// Default lifetime of the remote lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Default oplog size that triggers compaction.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 20;

/// Tunables for the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(with = "duration_secs")]
    pub lock_ttl: Duration,
    pub compact_threshold: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl SyncSettings {
    pub fn lock_ttl_millis(&self) -> i64 {
        i64::try_from(self.lock_ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Per-device sync progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// High-water mark of processed remote batch timestamps
    #[serde(default)]
    pub last_sync_time: i64,
    /// Timestamp of this device's newest pushed batch
    #[serde(default)]
    pub last_push_time: i64,
    /// Wall-clock time the last round finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_round_at: Option<i64>,
}

impl SyncState {
    /// Load the sync state. Returns default if none was saved.
    pub fn load(vault: &Vault) -> Result<Self> {
        Ok(vault.get_config(SYNC_STATE_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, vault: &Vault) -> Result<()> {
        vault.set_config(SYNC_STATE_KEY, self)
    }

    /// Raise the cursor; it never moves backwards.
    pub fn advance_cursor(&mut self, timestamp: i64) {
        self.last_sync_time = self.last_sync_time.max(timestamp);
    }
}
