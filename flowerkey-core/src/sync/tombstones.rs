//! Delete markers: when each deleted entry went away on this device.
//!
//! Kept apart from the change log, so recording a remote delete never
//! produces a change to push. A marker only moves forward in time and is
//! cleared when a newer write brings the entry back.

use crate::sync::models::Tombstone;
use crate::{DatabaseError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Record a delete, keeping the newer time if a marker already exists.
pub fn record_delete(conn: &Connection, entry_id: Uuid, deleted_at: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO tombstones (entry_id, deleted_at) VALUES (?1, ?2)
         ON CONFLICT(entry_id) DO UPDATE SET
            deleted_at = MAX(deleted_at, excluded.deleted_at)",
        params![entry_id.to_string(), deleted_at],
    )
    .map_err(DatabaseError::Sqlite)?;
    Ok(())
}

pub fn deleted_at(conn: &Connection, entry_id: Uuid) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT deleted_at FROM tombstones WHERE entry_id = ?1",
        [entry_id.to_string()],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| DatabaseError::Sqlite(e).into())
}

/// Forget the marker of an entry that exists again.
pub fn clear(conn: &Connection, entry_id: Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM tombstones WHERE entry_id = ?1",
        [entry_id.to_string()],
    )
    .map_err(DatabaseError::Sqlite)?;
    Ok(())
}

/// Every marker, oldest delete first.
pub fn all(conn: &Connection) -> Result<Vec<Tombstone>> {
    let mut stmt = conn
        .prepare(
            "SELECT entry_id, deleted_at FROM tombstones
             ORDER BY deleted_at ASC, entry_id ASC",
        )
        .map_err(DatabaseError::Sqlite)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(DatabaseError::Sqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(DatabaseError::Sqlite)?;

    rows.into_iter()
        .map(|(entry_id, deleted_at)| {
            let entry_id = Uuid::parse_str(&entry_id).map_err(|e| {
                DatabaseError::Corrupt(format!("tombstone {:?}: bad entry id: {}", entry_id, e))
            })?;
            Ok(Tombstone {
                entry_id,
                deleted_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn setup() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db
    }

    #[test]
    fn marker_only_moves_forward() {
        let db = setup();
        let id = Uuid::new_v4();
        assert_eq!(deleted_at(db.conn(), id).unwrap(), None);

        record_delete(db.conn(), id, 9).unwrap();
        record_delete(db.conn(), id, 5).unwrap();
        assert_eq!(deleted_at(db.conn(), id).unwrap(), Some(9));

        record_delete(db.conn(), id, 12).unwrap();
        assert_eq!(deleted_at(db.conn(), id).unwrap(), Some(12));
    }

    #[test]
    fn clear_and_list() {
        let db = setup();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        record_delete(db.conn(), newer, 20).unwrap();
        record_delete(db.conn(), older, 10).unwrap();

        let listed = all(db.conn()).unwrap();
        assert_eq!(
            listed,
            vec![
                Tombstone {
                    entry_id: older,
                    deleted_at: 10
                },
                Tombstone {
                    entry_id: newer,
                    deleted_at: 20
                },
            ]
        );

        clear(db.conn(), older).unwrap();
        assert_eq!(deleted_at(db.conn(), older).unwrap(), None);
        assert_eq!(all(db.conn()).unwrap().len(), 1);
    }
}
