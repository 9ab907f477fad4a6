//! Write path for entries that arrived from other devices.
//!
//! Nothing written here appends a change record, so applied data is never
//! pushed back out.

use super::{fields, put_row, row_updated_at, Vault};
use crate::database::Entry;
use crate::sync::models::Tombstone;
use crate::sync::tombstones;
use crate::{DatabaseError, Result};
use tracing::debug;
use uuid::Uuid;

/// Remote-apply capability borrowed from a [`Vault`].
pub struct RemoteApply<'v> {
    vault: &'v Vault,
}

impl<'v> RemoteApply<'v> {
    pub(super) fn new(vault: &'v Vault) -> Self {
        Self { vault }
    }

    /// Insert or overwrite an entry exactly as received.
    pub fn put_entry(&self, entry: &Entry) -> Result<()> {
        let codec = self.vault.codec()?;
        let stored = fields::seal_entry(&codec, entry)?;

        let db = self.vault.db()?;
        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        put_row(&tx, &stored)?;
        tombstones::clear(&tx, entry.id)?;
        tx.commit().map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    /// Remove an entry that another device deleted at `deleted_at`.
    ///
    /// The tombstone is kept even when no row existed. Returns whether a
    /// row was removed.
    pub fn delete_entry(&self, id: Uuid, deleted_at: i64) -> Result<bool> {
        let db = self.vault.db()?;
        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        let removed = tx
            .execute("DELETE FROM entries WHERE id = ?1", [id.to_string()])
            .map_err(DatabaseError::Sqlite)?;
        tombstones::record_delete(&tx, id, deleted_at)?;
        tx.commit().map_err(DatabaseError::Sqlite)?;
        Ok(removed > 0)
    }

    /// Replace the whole local record set in one transaction.
    ///
    /// `deleted` markers are merged into the local ones; restored entries
    /// lose any marker they had.
    pub fn replace_all(&self, entries: &[Entry], deleted: &[Tombstone]) -> Result<usize> {
        let codec = self.vault.codec()?;
        let sealed = entries
            .iter()
            .map(|e| fields::seal_entry(&codec, e))
            .collect::<Result<Vec<_>>>()?;

        let db = self.vault.db()?;
        let tx = db.conn().unchecked_transaction().map_err(DatabaseError::Sqlite)?;
        tx.execute("DELETE FROM entries", [])
            .map_err(DatabaseError::Sqlite)?;
        for tombstone in deleted {
            tombstones::record_delete(&tx, tombstone.entry_id, tombstone.deleted_at)?;
        }
        for stored in &sealed {
            put_row(&tx, stored)?;
            tombstones::clear(&tx, stored.id)?;
        }
        tx.commit().map_err(DatabaseError::Sqlite)?;

        debug!("Replaced local record set with {} entries", sealed.len());
        Ok(sealed.len())
    }

    /// Local `updated_at` for conflict resolution.
    pub fn local_updated_at(&self, id: Uuid) -> Result<Option<i64>> {
        row_updated_at(self.vault.db()?.conn(), id)
    }

    /// When the entry was deleted here, whether locally or by an applied
    /// remote delete.
    pub fn local_deleted_at(&self, id: Uuid) -> Result<Option<i64>> {
        tombstones::deleted_at(self.vault.db()?.conn(), id)
    }

    /// Every delete marker, for folding into a snapshot.
    pub fn tombstones(&self) -> Result<Vec<Tombstone>> {
        tombstones::all(self.vault.db()?.conn())
    }
}
