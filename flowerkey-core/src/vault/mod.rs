//! Vault management - coordinates crypto, database and change log
//!
//! [`Vault`] is the local write path: every mutation appends its change
//! record in the same SQLite transaction. Remote data is written only through
//! [`RemoteApply`], which never touches the change log.

mod fields;
mod remote;

pub use remote::RemoteApply;

use crate::crypto::FieldCodec;
use crate::database::{
    ChangeLogRecord, ChangeOperation, Database, Entry, EntryPatch, EntryType, NewEntry,
};
use crate::sync::{change_tracker, tombstones};
use crate::sync::device::{DeviceId, DEVICE_ID_KEY};
use crate::{now_millis, DatabaseError, FlowerKeyError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Config key for the persisted memory secret verification record.
pub const MASTER_DATA_KEY: &str = "masterPasswordData";

/// Stored shape of a sealed config value.
#[derive(Serialize, Deserialize)]
struct SealedValue {
    #[serde(rename = "__enc")]
    enc: String,
}

/// Local vault store
pub struct Vault {
    db: Mutex<Database>,
    codec: RwLock<Option<FieldCodec>>,
    device_id: DeviceId,
}

impl Vault {
    /// Open (or create) a vault database. The vault starts locked.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_database(Database::open(path)?)
    }

    /// Create a new in-memory vault for testing
    pub fn in_memory() -> Result<Self> {
        Self::from_database(Database::in_memory()?)
    }

    fn from_database(db: Database) -> Result<Self> {
        db.initialize_schema()?;

        let device_id = match read_config::<DeviceId>(db.conn(), DEVICE_ID_KEY)? {
            Some(id) => id,
            None => {
                let id = DeviceId::generate();
                write_config(db.conn(), DEVICE_ID_KEY, &id)?;
                info!("Generated device id {}", id);
                id
            }
        };

        Ok(Self {
            db: Mutex::new(db),
            codec: RwLock::new(None),
            device_id,
        })
    }

    /// Attach the session codec; sealed data becomes readable.
    pub fn unlock(&self, codec: FieldCodec) -> Result<()> {
        *self.codec_slot()? = Some(codec);
        Ok(())
    }

    /// Drop the codec held by the vault.
    pub fn lock(&self) -> Result<()> {
        self.codec_slot()?.take();
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.codec.read().map(|c| c.is_some()).unwrap_or(false)
    }

    /// The codec of the current session
    pub fn codec(&self) -> Result<FieldCodec> {
        self.codec
            .read()
            .map_err(|_| DatabaseError::LockPoisoned("Failed to lock codec".to_string()))?
            .clone()
            .ok_or(FlowerKeyError::VaultLocked)
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Write path for data received from other devices.
    pub fn remote(&self) -> RemoteApply<'_> {
        RemoteApply::new(self)
    }

    // ==================== Entries ====================

    /// Create an entry with a fresh random id.
    pub fn create_entry(&self, new: NewEntry) -> Result<Entry> {
        let codec = self.codec()?;
        let db = self.db()?;

        let encrypt = encryption_policy(db.conn(), new.entry_type)?;
        let mut entry = new.into_entry(Uuid::new_v4(), now_millis());
        if !encrypt {
            entry.encrypted = Some(false);
        }
        let stored = fields::seal_entry(&codec, &entry)?;

        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        put_row(&tx, &stored)?;
        change_tracker::append_change(
            &tx,
            entry.id,
            ChangeOperation::Create,
            entry.updated_at,
            &self.device_id,
        )?;
        tx.commit().map_err(DatabaseError::Sqlite)?;

        debug!("Created {} entry {}", entry.entry_type, entry.id);
        Ok(entry)
    }

    /// Apply a patch to an existing entry.
    ///
    /// `updated_at` never moves backwards, even if the wall clock does.
    pub fn update_entry(&self, id: Uuid, patch: EntryPatch) -> Result<Entry> {
        let codec = self.codec()?;
        let db = self.db()?;

        let stored = load_row(db.conn(), id)?
            .ok_or_else(|| FlowerKeyError::NotFound(format!("Entry {}", id)))?;
        let mut entry = fields::open_entry(&codec, stored)?;

        patch.apply_to(&mut entry);
        entry.updated_at = now_millis()
            .max(entry.updated_at.saturating_add(1))
            .max(entry.created_at);
        let stored = fields::seal_entry(&codec, &entry)?;

        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        put_row(&tx, &stored)?;
        change_tracker::append_change(
            &tx,
            id,
            ChangeOperation::Update,
            entry.updated_at,
            &self.device_id,
        )?;
        tx.commit().map_err(DatabaseError::Sqlite)?;

        debug!("Updated entry {}", id);
        Ok(entry)
    }

    /// Delete an entry and leave a tombstone for conflict resolution.
    pub fn delete_entry(&self, id: Uuid) -> Result<()> {
        let db = self.db()?;

        let updated_at = row_updated_at(db.conn(), id)?
            .ok_or_else(|| FlowerKeyError::NotFound(format!("Entry {}", id)))?;
        let timestamp = now_millis().max(updated_at.saturating_add(1));

        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        tx.execute("DELETE FROM entries WHERE id = ?1", [id.to_string()])
            .map_err(DatabaseError::Sqlite)?;
        tombstones::record_delete(&tx, id, timestamp)?;
        change_tracker::append_change(
            &tx,
            id,
            ChangeOperation::Delete,
            timestamp,
            &self.device_id,
        )?;
        tx.commit().map_err(DatabaseError::Sqlite)?;

        debug!("Deleted entry {}", id);
        Ok(())
    }

    pub fn get_entry(&self, id: Uuid) -> Result<Option<Entry>> {
        let codec = self.codec()?;
        let db = self.db()?;
        load_row(db.conn(), id)?
            .map(|stored| fields::open_entry(&codec, stored))
            .transpose()
    }

    /// Last modification time of an entry without opening its fields.
    pub fn entry_updated_at(&self, id: Uuid) -> Result<Option<i64>> {
        row_updated_at(self.db()?.conn(), id)
    }

    /// Entries of one type, most recently updated first.
    pub fn entries_by_type(&self, entry_type: EntryType) -> Result<Vec<Entry>> {
        self.query_entries(
            "SELECT body FROM entries WHERE entry_type = ?1 ORDER BY updated_at DESC",
            params![entry_type.as_str()],
        )
    }

    /// Entries in one folder, most recently updated first.
    pub fn entries_by_folder(&self, folder: &str) -> Result<Vec<Entry>> {
        self.query_entries(
            "SELECT body FROM entries WHERE folder = ?1 ORDER BY updated_at DESC",
            params![folder],
        )
    }

    pub fn all_entries(&self) -> Result<Vec<Entry>> {
        self.query_entries("SELECT body FROM entries ORDER BY created_at ASC, id ASC", [])
    }

    /// Case-insensitive substring search over the readable fields and tags.
    pub fn search(&self, query: &str) -> Result<Vec<Entry>> {
        let q = query.to_lowercase();
        let matches = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|v| v.to_lowercase().contains(&q))
        };

        Ok(self
            .all_entries()?
            .into_iter()
            .filter(|e| {
                matches(&e.codename)
                    || matches(&e.title)
                    || e.description.to_lowercase().contains(&q)
                    || matches(&e.url)
                    || matches(&e.file_name)
                    || e.tags.iter().any(|t| t.to_lowercase().contains(&q))
            })
            .collect())
    }

    /// Distinct folder paths, sorted.
    pub fn all_folders(&self) -> Result<Vec<String>> {
        let db = self.db()?;
        let mut stmt = db
            .conn()
            .prepare("SELECT DISTINCT folder FROM entries ORDER BY folder")
            .map_err(DatabaseError::Sqlite)?;
        let folders = stmt
            .query_map([], |row| row.get(0))
            .map_err(DatabaseError::Sqlite)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(folders)
    }

    /// Distinct tags across all entries, sorted. Tags are not sealed.
    pub fn all_tags(&self) -> Result<Vec<String>> {
        let db = self.db()?;
        let mut tags = BTreeSet::new();
        for stored in load_rows(db.conn(), "SELECT body FROM entries", [])? {
            tags.extend(stored.tags);
        }
        Ok(tags.into_iter().collect())
    }

    fn query_entries<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Entry>> {
        let codec = self.codec()?;
        let db = self.db()?;
        load_rows(db.conn(), sql, params)?
            .into_iter()
            .map(|stored| fields::open_entry(&codec, stored))
            .collect()
    }

    // ==================== Config ====================

    pub fn get_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        read_config(self.db()?.conn(), key)
    }

    pub fn set_config<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        write_config(self.db()?.conn(), key, value)
    }

    pub fn remove_config(&self, key: &str) -> Result<()> {
        self.db()?
            .conn()
            .execute("DELETE FROM config WHERE key = ?1", [key])
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    /// Store a config value sealed under the vault key.
    pub fn set_secret_config<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let codec = self.codec()?;
        let plaintext = serde_json::to_vec(value)?;
        let sealed = SealedValue {
            enc: STANDARD.encode(codec.seal(&plaintext)?),
        };
        self.set_config(key, &sealed)
    }

    /// Read a sealed config value. Older plaintext values are returned as-is.
    pub fn get_secret_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_config::<serde_json::Value>(key)? else {
            return Ok(None);
        };
        let Ok(sealed) = serde_json::from_value::<SealedValue>(raw.clone()) else {
            return Ok(Some(serde_json::from_value(raw)?));
        };

        let codec = self.codec()?;
        Ok(Some(open_sealed_value(&codec, &sealed)?))
    }

    // ==================== Change log ====================

    pub fn unsynced_changes(&self) -> Result<Vec<ChangeLogRecord>> {
        change_tracker::collect_unsynced(self.db()?.conn())
    }

    pub fn mark_changes_synced(&self, ids: &[i64]) -> Result<usize> {
        change_tracker::mark_changes_synced(self.db()?.conn(), ids)
    }

    pub fn pending_change_count(&self) -> Result<u64> {
        change_tracker::count_pending_changes(self.db()?.conn())
    }

    // ==================== Maintenance ====================

    /// Whether entries of this type are sealed at rest (default: yes).
    pub fn encryption_policy(&self, entry_type: EntryType) -> Result<bool> {
        encryption_policy(self.db()?.conn(), entry_type)
    }

    /// Switch a type between sealed and plaintext storage and rewrite its entries.
    ///
    /// Returns the number of rewritten entries. No change records are written.
    pub fn set_encryption_policy(&self, entry_type: EntryType, encrypt: bool) -> Result<usize> {
        let codec = self.codec()?;
        let db = self.db()?;

        let rows = load_rows(
            db.conn(),
            "SELECT body FROM entries WHERE entry_type = ?1",
            params![entry_type.as_str()],
        )?;

        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        let mut rewritten = 0;
        for stored in rows {
            let mut entry = fields::open_entry(&codec, stored)?;
            entry.encrypted = if encrypt { None } else { Some(false) };
            put_row(&tx, &fields::seal_entry(&codec, &entry)?)?;
            rewritten += 1;
        }
        write_config(&tx, entry_type.policy_key(), &encrypt)?;
        tx.commit().map_err(DatabaseError::Sqlite)?;

        info!(
            "{} encryption {}: rewrote {} entries",
            entry_type,
            if encrypt { "enabled" } else { "disabled" },
            rewritten
        );
        Ok(rewritten)
    }

    /// Bookmark shorthand for [`Vault::set_encryption_policy`].
    pub fn set_bookmark_encryption(&self, encrypt: bool) -> Result<usize> {
        self.set_encryption_policy(EntryType::Bookmark, encrypt)
    }

    /// Re-seal every entry and secret config under a new key, then switch to it.
    ///
    /// Used after the memory secret changes. Returns the number of entries.
    pub fn rotate_key(&self, new_codec: FieldCodec) -> Result<usize> {
        let old_codec = self.codec()?;
        let db = self.db()?;

        let rows = load_rows(db.conn(), "SELECT body FROM entries", [])?;
        let secrets = sealed_configs(db.conn())?;

        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        let mut count = 0;
        for stored in rows {
            let entry = fields::open_entry(&old_codec, stored)?;
            put_row(&tx, &fields::seal_entry(&new_codec, &entry)?)?;
            count += 1;
        }
        for (key, sealed) in &secrets {
            let plaintext: serde_json::Value = open_sealed_value(&old_codec, sealed)?;
            let resealed = SealedValue {
                enc: STANDARD.encode(new_codec.seal(&serde_json::to_vec(&plaintext)?)?),
            };
            write_config(&tx, key, &resealed)?;
        }
        tx.commit().map_err(DatabaseError::Sqlite)?;
        drop(db);

        self.unlock(new_codec)?;
        info!(
            "Rotated vault key: {} entries, {} secret configs",
            count,
            secrets.len()
        );
        Ok(count)
    }

    pub(crate) fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("Failed to lock database".to_string()).into())
    }

    fn codec_slot(&self) -> Result<std::sync::RwLockWriteGuard<'_, Option<FieldCodec>>> {
        self.codec
            .write()
            .map_err(|_| DatabaseError::LockPoisoned("Failed to lock codec".to_string()).into())
    }
}

// ==================== Row helpers ====================

/// Insert or replace the stored (sealed) form of an entry.
pub(crate) fn put_row(conn: &Connection, stored: &Entry) -> Result<()> {
    let body = serde_json::to_string(stored)?;
    conn.execute(
        "INSERT INTO entries (id, entry_type, folder, created_at, updated_at, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            entry_type = excluded.entry_type,
            folder = excluded.folder,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            body = excluded.body",
        params![
            stored.id.to_string(),
            stored.entry_type.as_str(),
            stored.folder,
            stored.created_at,
            stored.updated_at,
            body,
        ],
    )
    .map_err(DatabaseError::Sqlite)?;
    Ok(())
}

fn load_row(conn: &Connection, id: Uuid) -> Result<Option<Entry>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM entries WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Sqlite)?;

    body.map(|b| parse_body(&b)).transpose()
}

pub(crate) fn load_rows<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(sql).map_err(DatabaseError::Sqlite)?;
    let bodies = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(DatabaseError::Sqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(DatabaseError::Sqlite)?;

    bodies.iter().map(|b| parse_body(b)).collect()
}

pub(crate) fn row_updated_at(conn: &Connection, id: Uuid) -> Result<Option<i64>> {
    let updated_at = conn
        .query_row(
            "SELECT updated_at FROM entries WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(DatabaseError::Sqlite)?;
    Ok(updated_at)
}

fn parse_body(body: &str) -> Result<Entry> {
    serde_json::from_str(body)
        .map_err(|e| DatabaseError::Corrupt(format!("Unreadable entry body: {}", e)).into())
}

// ==================== Config helpers ====================

pub(crate) fn read_config<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(DatabaseError::Sqlite)?;

    match value {
        Some(v) => Ok(Some(serde_json::from_str(&v)?)),
        None => Ok(None),
    }
}

pub(crate) fn write_config<T: Serialize + ?Sized>(
    conn: &Connection,
    key: &str,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now_millis()],
    )
    .map_err(DatabaseError::Sqlite)?;
    Ok(())
}

fn encryption_policy(conn: &Connection, entry_type: EntryType) -> Result<bool> {
    Ok(read_config::<bool>(conn, entry_type.policy_key())?.unwrap_or(true))
}

fn sealed_configs(conn: &Connection) -> Result<Vec<(String, SealedValue)>> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM config")
        .map_err(DatabaseError::Sqlite)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(DatabaseError::Sqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(DatabaseError::Sqlite)?;

    Ok(rows
        .into_iter()
        .filter_map(|(key, value)| {
            serde_json::from_str::<SealedValue>(&value)
                .ok()
                .map(|sealed| (key, sealed))
        })
        .collect())
}

fn open_sealed_value<T: DeserializeOwned>(codec: &FieldCodec, sealed: &SealedValue) -> Result<T> {
    let envelope = STANDARD.decode(&sealed.enc).map_err(|e| {
        DatabaseError::Corrupt(format!("Sealed config is not valid base64: {}", e))
    })?;
    Ok(serde_json::from_slice(&codec.open(&envelope)?)?)
}
