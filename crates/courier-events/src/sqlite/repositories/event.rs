//! Event repository: append-only session log.

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{is_unique_violation, EventStoreError, Result};
use crate::sqlite::row_types::EventRow;

const COLUMNS: &str = "id, session_key, seq, type, payload, created_at";

/// Event repository, stateless, every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert one event.
    ///
    /// A duplicate `(session_key, seq)` surfaces as
    /// [`EventStoreError::SequenceConflict`].
    pub fn insert(conn: &Connection, event: &EventRow) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        let result = conn.execute(
            "INSERT INTO events (id, session_key, seq, type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.session_key,
                event.seq,
                event.event_type,
                payload,
                event.created_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(EventStoreError::SequenceConflict {
                session_key: event.session_key.to_string(),
                seq: event.seq,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a single event by ID.
    pub fn get_by_id(conn: &Connection, event_id: &str) -> Result<Option<EventRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM events WHERE id = ?1"),
                params![event_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All events for a session, ascending by `seq`.
    pub fn get_by_session(conn: &Connection, session_key: &str) -> Result<Vec<EventRow>> {
        Self::get_since(conn, session_key, 0)
    }

    /// Events with `seq > after_seq`, ascending.
    pub fn get_since(conn: &Connection, session_key: &str, after_seq: i64) -> Result<Vec<EventRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM events WHERE session_key = ?1 AND seq > ?2 ORDER BY seq ASC"
        ))?;
        let rows = stmt
            .query_map(params![session_key, after_seq], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `MAX(seq) + 1` for the session, `1` when it has no events.
    pub fn get_next_sequence(conn: &Connection, session_key: &str) -> Result<i64> {
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(seq) FROM events WHERE session_key = ?1",
            params![session_key],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Number of events in a session.
    pub fn count_by_session(conn: &Connection, session_key: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE session_key = ?1",
            params![session_key],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
        Ok(EventRow {
            id: row.get(0)?,
            session_key: row.get(1)?,
            seq: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
