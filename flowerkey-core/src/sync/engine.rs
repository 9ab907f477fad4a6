//! Sync engine: orchestrates the lock/push/pull/compact round.

use crate::crypto::FieldCodec;
use crate::database::{ChangeKind, ChangeOperation, Entry};
use crate::sync::backend::StorageBackend;
use crate::sync::config::{SyncSettings, SyncState};
use crate::sync::conflict::{ConflictResolver, Resolution};
use crate::sync::crypto::{
    open_batch, open_snapshot, open_tombstones, seal_batch, seal_snapshot, seal_tombstones,
};
use crate::sync::device::DeviceId;
use crate::sync::models::{
    BatchName, OpLogEntry, RemoteLock, SnapshotMarker, SyncReport, SyncStatus, Tombstone,
    LOCK_OBJECT, SNAPSHOT_MARKER_OBJECT, SNAPSHOT_OBJECT, SNAPSHOT_TOMBSTONES_OBJECT,
};
use uuid::Uuid;
use crate::vault::Vault;
use crate::{now_millis, FlowerKeyError, Result};
use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs sync rounds for one vault against one backend.
pub struct SyncEngine<B: StorageBackend + 'static> {
    backend: Arc<B>,
    vault: Arc<Vault>,
    settings: SyncSettings,
    running: AtomicBool,
}

impl<B: StorageBackend + 'static> SyncEngine<B> {
    pub fn new(backend: Arc<B>, vault: Arc<Vault>) -> Self {
        Self::with_settings(backend, vault, SyncSettings::default())
    }

    pub fn with_settings(backend: Arc<B>, vault: Arc<Vault>, settings: SyncSettings) -> Self {
        Self {
            backend,
            vault,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Perform one full round: lock, push, pull, maybe compact, unlock.
    ///
    /// The remote lock is released on every exit path. A busy lock fails
    /// with [`FlowerKeyError::LockBusy`] before anything is written.
    pub async fn sync(&self) -> Result<SyncReport> {
        let _round = RoundGuard::enter(&self.running)?;
        let codec = self.vault.codec()?;

        self.backend.ensure_dir().await?;
        self.acquire_lock().await?;
        let mut lease = LockLease::new(Arc::clone(&self.backend), self.vault.device_id().clone());

        let outcome = self.locked_round(&codec).await;

        lease.disarm();
        let released = self.release_lock().await;

        let report = match (outcome, released) {
            (Ok(report), Ok(_)) => report,
            (Ok(report), Err(e)) => {
                warn!("Sync round finished but releasing the lock failed: {}", e);
                report
            }
            (Err(e), Ok(_)) => return Err(e),
            (Err(e), Err(release_err)) => {
                warn!("Releasing the lock after a failed round also failed: {}", release_err);
                return Err(e);
            }
        };

        let mut state = SyncState::load(&self.vault)?;
        state.last_round_at = Some(now_millis());
        state.save(&self.vault)?;

        info!(
            "Sync round complete: pushed {}, pulled {} from {} batches, {} policy mismatches{}",
            report.pushed,
            report.pulled,
            report.batches_applied,
            report.policy_mismatches,
            if report.compacted { ", compacted" } else { "" }
        );
        Ok(report)
    }

    async fn locked_round(&self, codec: &FieldCodec) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut state = SyncState::load(&self.vault)?;

        report.pushed = self.push(codec, &mut state).await?;
        self.pull(codec, &mut state, &mut report).await?;
        report.compacted = self.maybe_compact(codec, &mut state).await?;

        Ok(report)
    }

    // ==================== Lock ====================

    /// Take the remote lock for this device.
    ///
    /// An absent, expired or self-owned lock is (re)written with a fresh
    /// expiry. The lock is advisory: two devices writing it in the same
    /// instant can both believe they hold it.
    pub async fn acquire_lock(&self) -> Result<()> {
        let device_id = self.vault.device_id();
        let now = now_millis();

        if let Some(lock) = self.read_lock().await? {
            if !lock.is_held_by(device_id) && !lock.is_expired(now) {
                debug!("Remote lock held by {} until {}", lock.device_id, lock.expires);
                return Err(FlowerKeyError::LockBusy {
                    holder: lock.device_id,
                    expires_at: lock.expires,
                });
            }
        }

        let lock = RemoteLock {
            device_id: device_id.as_str().to_string(),
            expires: now.saturating_add(self.settings.lock_ttl_millis()),
        };
        self.backend
            .write(LOCK_OBJECT, &serde_json::to_vec(&lock)?)
            .await?;
        debug!("Acquired remote lock until {}", lock.expires);
        Ok(())
    }

    /// Remove the remote lock if this device still owns it.
    pub async fn release_lock(&self) -> Result<bool> {
        release(self.backend.as_ref(), self.vault.device_id()).await
    }

    async fn read_lock(&self) -> Result<Option<RemoteLock>> {
        read_lock(self.backend.as_ref()).await
    }

    // ==================== Push ====================

    /// Upload every unsynced change record as one batch.
    async fn push(&self, codec: &FieldCodec, state: &mut SyncState) -> Result<usize> {
        let records = self.vault.unsynced_changes()?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut ops = Vec::with_capacity(records.len());
        for record in &records {
            let payload = match record.operation {
                ChangeOperation::Delete => None,
                ChangeOperation::Create | ChangeOperation::Update => {
                    self.vault.get_entry(record.entry_id)?
                }
            };
            ops.push(OpLogEntry {
                entry_id: record.entry_id,
                entry_type: record.entry_type,
                operation: record.operation,
                timestamp: record.timestamp,
                device_id: record.origin_device_id.clone(),
                payload,
            });
        }

        // The batch must sort after everything other devices may already
        // have folded into their cursor, whatever our clock says.
        let listed = self.list_batches().await?;
        let marker = self.read_marker().await?;
        let floor = listed
            .iter()
            .map(|b| b.timestamp)
            .chain(marker.map(|m| m.high_water))
            .chain(Some(state.last_push_time))
            .max()
            .unwrap_or(0);
        let timestamp = now_millis().max(floor.saturating_add(1));

        let name = BatchName::new(self.vault.device_id(), timestamp);
        let sealed = seal_batch(codec, &ops)?;
        self.backend.write(&name.object_name(), &sealed).await?;

        let ids: Vec<i64> = records.iter().map(|r| r.local_sequence_id).collect();
        self.vault.mark_changes_synced(&ids)?;
        state.last_push_time = timestamp;
        state.save(&self.vault)?;

        debug!("Pushed {} changes as {}", ops.len(), name.file_name());
        Ok(ops.len())
    }

    // ==================== Pull ====================

    /// Apply every remote batch newer than the cursor.
    ///
    /// All qualifying batches are fetched and decrypted before any is
    /// applied; one bad batch aborts the pull with nothing applied.
    async fn pull(
        &self,
        codec: &FieldCodec,
        state: &mut SyncState,
        report: &mut SyncReport,
    ) -> Result<()> {
        if let Some(marker) = self.read_marker().await? {
            if marker.high_water > state.last_sync_time
                && self.merge_snapshot(codec, report).await?
            {
                state.advance_cursor(marker.high_water);
                report.snapshot_merged = true;
                state.save(&self.vault)?;
            }
        }

        let device_id = self.vault.device_id();
        let cursor = state.last_sync_time;
        let mut pending: Vec<BatchName> = self
            .list_batches()
            .await?
            .into_iter()
            .filter(|b| b.timestamp > cursor && !b.is_from(device_id))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort_by(|a, b| (a.timestamp, &a.device_id).cmp(&(b.timestamp, &b.device_id)));

        let fetches = pending.iter().map(|name| async move {
            let ops = match self.backend.read(&name.object_name()).await? {
                Some(sealed) => Some(open_batch(codec, &sealed)?),
                None => None,
            };
            Ok::<_, FlowerKeyError>((name, ops))
        });
        let fetched = try_join_all(fetches).await?;

        let mut high_water = cursor;
        for (name, ops) in fetched {
            high_water = high_water.max(name.timestamp);
            let Some(ops) = ops else {
                warn!("Batch {} vanished before it could be read", name.file_name());
                continue;
            };
            for op in &ops {
                self.apply_op(op, report)?;
            }
            report.pulled += ops.len();
            report.batches_applied += 1;
        }

        state.advance_cursor(high_water);
        state.save(&self.vault)?;
        Ok(())
    }

    fn apply_op(&self, op: &OpLogEntry, report: &mut SyncReport) -> Result<()> {
        if op.entry_type == ChangeKind::Config {
            debug!("Ignoring config operation for {}", op.entry_id);
            return Ok(());
        }

        match op.operation {
            ChangeOperation::Delete => self.apply_delete(op.entry_id, op.timestamp),
            ChangeOperation::Create | ChangeOperation::Update => {
                let Some(entry) = op.payload.as_ref() else {
                    debug!(
                        "Skipping {} of {} without payload",
                        op.operation.as_str(),
                        op.entry_id
                    );
                    return Ok(());
                };
                if entry.id != op.entry_id {
                    warn!(
                        "Skipping operation whose payload id {} differs from {}",
                        entry.id, op.entry_id
                    );
                    return Ok(());
                }
                self.apply_upsert(entry, report)
            }
        }
    }

    /// LWW delete: a local edit strictly newer than the delete survives.
    fn apply_delete(&self, id: Uuid, deleted_at: i64) -> Result<()> {
        let remote = self.vault.remote();
        match ConflictResolver::resolve_delete(remote.local_updated_at(id)?, deleted_at) {
            Resolution::AcceptRemote => {
                remote.delete_entry(id, deleted_at)?;
            }
            Resolution::KeepLocal => {
                debug!("Local edit of {} outlives remote delete", id);
            }
        }
        Ok(())
    }

    /// LWW upsert guarded by the local encryption policy.
    fn apply_upsert(&self, entry: &Entry, report: &mut SyncReport) -> Result<()> {
        if self.vault.encryption_policy(entry.entry_type)? != entry.is_encrypted() {
            warn!(
                "Skipping {} entry {}: encryption policy differs from this device",
                entry.entry_type, entry.id
            );
            report.policy_mismatches += 1;
            return Ok(());
        }

        // A tombstone counts as the last write of an entry that is gone
        let remote = self.vault.remote();
        let local = match remote.local_updated_at(entry.id)? {
            Some(updated_at) => Some(updated_at),
            None => remote.local_deleted_at(entry.id)?,
        };
        match ConflictResolver::resolve_upsert(local, entry.updated_at) {
            Resolution::AcceptRemote => remote.put_entry(entry),
            Resolution::KeepLocal => Ok(()),
        }
    }

    /// Fold the remote snapshot and its tombstones into the local store
    /// under LWW.
    async fn merge_snapshot(&self, codec: &FieldCodec, report: &mut SyncReport) -> Result<bool> {
        let Some(sealed) = self.backend.read(SNAPSHOT_OBJECT).await? else {
            warn!("Snapshot marker present but {} is missing", SNAPSHOT_OBJECT);
            return Ok(false);
        };
        let entries = open_snapshot(codec, &sealed)?;
        let deleted = self.read_snapshot_tombstones(codec).await?;

        for entry in &entries {
            self.apply_upsert(entry, report)?;
        }
        for tombstone in &deleted {
            self.apply_delete(tombstone.entry_id, tombstone.deleted_at)?;
        }
        info!(
            "Merged snapshot of {} entries and {} deletes",
            entries.len(),
            deleted.len()
        );
        Ok(true)
    }

    // ==================== Compaction ====================

    /// Replace the oplog with one snapshot once it grows past the threshold.
    async fn maybe_compact(&self, codec: &FieldCodec, state: &mut SyncState) -> Result<bool> {
        let batches = self.list_batches().await?;
        if batches.len() < self.settings.compact_threshold.max(1) {
            return Ok(false);
        }

        let entries = self.vault.all_entries()?;
        let deleted = self.vault.remote().tombstones()?;
        let high_water = batches
            .iter()
            .map(|b| b.timestamp)
            .max()
            .unwrap_or(state.last_sync_time);

        self.backend
            .write(SNAPSHOT_OBJECT, &seal_snapshot(codec, &entries)?)
            .await?;
        self.backend
            .write(SNAPSHOT_TOMBSTONES_OBJECT, &seal_tombstones(codec, &deleted)?)
            .await?;
        let marker = SnapshotMarker {
            device_id: self.vault.device_id().as_str().to_string(),
            created_at: now_millis(),
            high_water,
            entries: entries.len(),
        };
        self.backend
            .write(SNAPSHOT_MARKER_OBJECT, &serde_json::to_vec(&marker)?)
            .await?;

        for batch in &batches {
            self.backend.remove(&batch.object_name()).await?;
        }

        state.advance_cursor(high_water);
        state.save(&self.vault)?;

        info!(
            "Compacted {} batches into a snapshot of {} entries",
            batches.len(),
            entries.len()
        );
        Ok(true)
    }

    /// Replace the whole local record set with the remote snapshot.
    ///
    /// Returns `false` when no snapshot exists. The cursor moves to the
    /// snapshot's high-water mark so folded batches are not replayed.
    pub async fn restore_from_snapshot(&self) -> Result<bool> {
        let _round = RoundGuard::enter(&self.running)?;
        let codec = self.vault.codec()?;

        let Some(sealed) = self.backend.read(SNAPSHOT_OBJECT).await? else {
            info!("No remote snapshot to restore from");
            return Ok(false);
        };
        let entries = open_snapshot(&codec, &sealed)?;
        let deleted = self.read_snapshot_tombstones(&codec).await?;
        let marker = self.read_marker().await?;

        let restored = self.vault.remote().replace_all(&entries, &deleted)?;

        let mut state = SyncState::load(&self.vault)?;
        state.last_sync_time = marker.map(|m| m.high_water).unwrap_or(0);
        state.save(&self.vault)?;

        info!("Restored {} entries from snapshot", restored);
        Ok(true)
    }

    /// Local sync status for display.
    pub fn status(&self) -> Result<SyncStatus> {
        let state = SyncState::load(&self.vault)?;
        Ok(SyncStatus {
            device_id: self.vault.device_id().clone(),
            last_sync_time: state.last_sync_time,
            last_round_at: state.last_round_at,
            pending_changes: self.vault.pending_change_count()?,
        })
    }

    // ==================== Helpers ====================

    /// Batch objects in the oplog; foreign files are skipped.
    async fn list_batches(&self) -> Result<Vec<BatchName>> {
        let files = self.backend.list_oplog().await?;
        Ok(files
            .iter()
            .filter_map(|file| {
                let parsed = BatchName::parse(file);
                if parsed.is_none() {
                    warn!("Ignoring unrecognised oplog object {}", file);
                }
                parsed
            })
            .collect())
    }

    /// Delete markers stored beside the snapshot; none if the object is absent.
    async fn read_snapshot_tombstones(&self, codec: &FieldCodec) -> Result<Vec<Tombstone>> {
        match self.backend.read(SNAPSHOT_TOMBSTONES_OBJECT).await? {
            Some(sealed) => open_tombstones(codec, &sealed),
            None => Ok(Vec::new()),
        }
    }

    async fn read_marker(&self) -> Result<Option<SnapshotMarker>> {
        let Some(raw) = self.backend.read(SNAPSHOT_MARKER_OBJECT).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                warn!("Ignoring unreadable snapshot marker: {}", e);
                Ok(None)
            }
        }
    }
}

async fn read_lock<B: StorageBackend + ?Sized>(backend: &B) -> Result<Option<RemoteLock>> {
    let Some(raw) = backend.read(LOCK_OBJECT).await? else {
        return Ok(None);
    };
    match serde_json::from_slice(&raw) {
        Ok(lock) => Ok(Some(lock)),
        Err(e) => {
            // A garbled lock cannot name a live holder
            warn!("Treating unreadable remote lock as absent: {}", e);
            Ok(None)
        }
    }
}

async fn release<B: StorageBackend + ?Sized>(backend: &B, device_id: &DeviceId) -> Result<bool> {
    match read_lock(backend).await? {
        Some(lock) if lock.is_held_by(device_id) => {
            backend.remove(LOCK_OBJECT).await?;
            debug!("Released remote lock");
            Ok(true)
        }
        Some(lock) => {
            warn!("Remote lock now belongs to {}; leaving it in place", lock.device_id);
            Ok(false)
        }
        None => Ok(false),
    }
}

/// In-process guard: one round per engine at a time.
struct RoundGuard<'a>(&'a AtomicBool);

impl<'a> RoundGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FlowerKeyError::SyncInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Releases the remote lock if a round future is dropped mid-flight.
struct LockLease<B: StorageBackend + 'static> {
    backend: Arc<B>,
    device_id: DeviceId,
    armed: bool,
}

impl<B: StorageBackend + 'static> LockLease<B> {
    fn new(backend: Arc<B>, device_id: DeviceId) -> Self {
        Self {
            backend,
            device_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<B: StorageBackend + 'static> Drop for LockLease<B> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Sync round abandoned outside a runtime; remote lock expires on its own");
            return;
        };
        let backend = Arc::clone(&self.backend);
        let device_id = self.device_id.clone();
        handle.spawn(async move {
            if let Err(e) = release(backend.as_ref(), &device_id).await {
                warn!("Failed to release remote lock after cancelled round: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::VaultKey;
    use crate::sync::backend::MemoryBackend;
    use crate::sync::config::SYNC_STATE_KEY;
    use crate::database::NewEntry;

    fn engine(backend: &MemoryBackend) -> SyncEngine<MemoryBackend> {
        let vault = Vault::in_memory().unwrap();
        vault
            .unlock(FieldCodec::new(Arc::new(VaultKey::generate())))
            .unwrap();
        SyncEngine::new(Arc::new(backend.clone()), Arc::new(vault))
    }

    fn foreign_lock(backend: &MemoryBackend, holder: &str, expires: i64) {
        let lock = RemoteLock {
            device_id: holder.to_string(),
            expires,
        };
        backend.put(LOCK_OBJECT, serde_json::to_vec(&lock).unwrap());
    }

    #[tokio::test]
    async fn acquire_and_release_own_lock() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);

        engine.acquire_lock().await.unwrap();
        let lock: RemoteLock = serde_json::from_slice(&backend.get(LOCK_OBJECT).unwrap()).unwrap();
        assert!(lock.is_held_by(engine.vault().device_id()));
        assert!(lock.expires > now_millis());

        // Re-acquiring our own lock refreshes it
        engine.acquire_lock().await.unwrap();

        assert!(engine.release_lock().await.unwrap());
        assert!(backend.get(LOCK_OBJECT).is_none());
        assert!(!engine.release_lock().await.unwrap());
    }

    #[tokio::test]
    async fn live_foreign_lock_is_busy() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);
        let expires = now_millis() + 30_000;
        foreign_lock(&backend, "other", expires);

        match engine.acquire_lock().await {
            Err(FlowerKeyError::LockBusy { holder, expires_at }) => {
                assert_eq!(holder, "other");
                assert_eq!(expires_at, expires);
            }
            other => panic!("expected LockBusy, got {:?}", other),
        }

        // Someone else's lock is never removed
        assert!(!engine.release_lock().await.unwrap());
        assert!(backend.get(LOCK_OBJECT).is_some());
    }

    #[tokio::test]
    async fn expired_or_garbled_lock_is_taken_over() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);

        foreign_lock(&backend, "other", now_millis() - 1);
        engine.acquire_lock().await.unwrap();

        backend.put(LOCK_OBJECT, b"not json".to_vec());
        engine.acquire_lock().await.unwrap();
        assert!(engine.release_lock().await.unwrap());
    }

    #[tokio::test]
    async fn sync_on_empty_remote() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);

        let report = engine.sync().await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(backend.get(LOCK_OBJECT).is_none());
        assert!(engine.status().unwrap().last_round_at.is_some());
    }

    #[tokio::test]
    async fn locked_vault_cannot_sync() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);
        engine.vault().lock().unwrap();

        assert!(matches!(engine.sync().await, Err(FlowerKeyError::VaultLocked)));
        assert!(backend.object_names().is_empty());
    }

    #[tokio::test]
    async fn push_stamps_batch_after_existing_ones() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);

        // A batch from a device whose clock runs far ahead
        let future_ts = now_millis() + 3_600_000;
        backend.put(&format!("oplog/ahead_{}.enc", future_ts), b"x".to_vec());

        engine
            .vault()
            .create_entry(NewEntry::bookmark("https://a.example", "A"))
            .unwrap();

        let codec = engine.vault().codec().unwrap();
        let mut state = SyncState::default();
        assert_eq!(engine.push(&codec, &mut state).await.unwrap(), 1);
        assert!(state.last_push_time > future_ts);
        assert_eq!(engine.vault().pending_change_count().unwrap(), 0);
        assert!(backend
            .get(&BatchName::new(engine.vault().device_id(), state.last_push_time).object_name())
            .is_some());
    }

    #[tokio::test]
    async fn status_reports_cursor_and_pending() {
        let backend = MemoryBackend::new();
        let engine = engine(&backend);
        engine
            .vault()
            .set_config(SYNC_STATE_KEY, &serde_json::json!({ "lastSyncTime": 77 }))
            .unwrap();
        engine
            .vault()
            .create_entry(NewEntry::file_ref("a.pdf", "https://a.example/a.pdf"))
            .unwrap();

        let status = engine.status().unwrap();
        assert_eq!(&status.device_id, engine.vault().device_id());
        assert_eq!(status.last_sync_time, 77);
        assert_eq!(status.pending_changes, 1);
        assert_eq!(status.last_round_at, None);
    }
}
