//! Change log queries: append on local mutation, collect unsynced, mark synced.
//!
//! Appends run on the caller's connection so they share the transaction of
//! the entry mutation they describe.

use crate::database::{ChangeKind, ChangeLogRecord, ChangeOperation};
use crate::sync::DeviceId;
use crate::{DatabaseError, Result};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Append one change record. Must run inside the mutation's transaction.
pub fn append_change(
    conn: &Connection,
    entry_id: Uuid,
    operation: ChangeOperation,
    timestamp: i64,
    device_id: &DeviceId,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO changelog (entry_id, entry_type, operation, timestamp, synced, device_id)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            entry_id.to_string(),
            ChangeKind::Entry.as_str(),
            operation.as_str(),
            timestamp,
            device_id.as_str(),
        ],
    )
    .map_err(DatabaseError::Sqlite)?;

    Ok(conn.last_insert_rowid())
}

/// All unsynced records, oldest first.
pub fn collect_unsynced(conn: &Connection) -> Result<Vec<ChangeLogRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, entry_id, entry_type, operation, timestamp, synced, device_id
             FROM changelog
             WHERE synced = 0
             ORDER BY timestamp ASC, id ASC",
        )
        .map_err(DatabaseError::Sqlite)?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,    // id
                row.get::<_, String>(1)?, // entry_id
                row.get::<_, String>(2)?, // entry_type
                row.get::<_, String>(3)?, // operation
                row.get::<_, i64>(4)?,    // timestamp
                row.get::<_, bool>(5)?,   // synced
                row.get::<_, String>(6)?, // device_id
            ))
        })
        .map_err(DatabaseError::Sqlite)?;

    let mut records = Vec::new();
    for row in rows {
        let (id, entry_id, entry_type, operation, timestamp, synced, device_id) =
            row.map_err(DatabaseError::Sqlite)?;

        let entry_id = Uuid::parse_str(&entry_id)
            .map_err(|e| DatabaseError::Corrupt(format!("changelog {}: bad entry id: {}", id, e)))?;
        let entry_type = ChangeKind::parse(&entry_type).ok_or_else(|| {
            DatabaseError::Corrupt(format!("changelog {}: bad entry type {:?}", id, entry_type))
        })?;
        let operation = ChangeOperation::parse(&operation).ok_or_else(|| {
            DatabaseError::Corrupt(format!("changelog {}: bad operation {:?}", id, operation))
        })?;

        records.push(ChangeLogRecord {
            local_sequence_id: id,
            entry_id,
            entry_type,
            operation,
            timestamp,
            origin_device_id: device_id,
            synced,
        });
    }

    Ok(records)
}

/// Flip `synced` for the given records in one transaction.
pub fn mark_changes_synced(conn: &Connection, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction().map_err(DatabaseError::Sqlite)?;
    let mut updated = 0;
    {
        let mut stmt = tx
            .prepare("UPDATE changelog SET synced = 1 WHERE id = ?1")
            .map_err(DatabaseError::Sqlite)?;
        for id in ids {
            updated += stmt.execute([id]).map_err(DatabaseError::Sqlite)?;
        }
    }
    tx.commit().map_err(DatabaseError::Sqlite)?;

    Ok(updated)
}

/// Number of records still waiting to be pushed.
pub fn count_pending_changes(conn: &Connection) -> Result<u64> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM changelog WHERE synced = 0", [], |row| {
            row.get(0)
        })
        .map_err(DatabaseError::Sqlite)?;
    Ok(count as u64)
}
