//! Effect repository: the outbox table.
//!
//! Status changes go through [`EffectRepo::transition`], a compare-and-set on
//! the current status. Two workers racing on the same row cannot both win.

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{is_unique_violation, EventStoreError, Result};
use crate::sqlite::row_types::EffectRow;
use crate::types::EffectStatus;

const COLUMNS: &str = "id, session_key, checkpoint_id, type, payload, dedupe_key, status, \
                       attempt_count, last_attempt_at, created_at, updated_at";

/// Effect repository, stateless, every method takes `&Connection`.
pub struct EffectRepo;

impl EffectRepo {
    /// Insert one effect.
    ///
    /// A duplicate `dedupe_key` surfaces as [`EventStoreError::DuplicateDedupeKey`].
    pub fn insert(conn: &Connection, effect: &EffectRow) -> Result<()> {
        let payload = serde_json::to_string(&effect.payload)?;
        let result = conn.execute(
            "INSERT INTO effects (id, session_key, checkpoint_id, type, payload, dedupe_key, status,
                                  attempt_count, last_attempt_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                effect.id,
                effect.session_key,
                effect.checkpoint_id,
                effect.effect_type,
                payload,
                effect.dedupe_key,
                effect.status,
                effect.attempt_count,
                effect.last_attempt_at,
                effect.created_at,
                effect.updated_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(EventStoreError::DuplicateDedupeKey(effect.dedupe_key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a single effect by ID.
    pub fn get_by_id(conn: &Connection, effect_id: &str) -> Result<Option<EffectRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM effects WHERE id = ?1"),
                params![effect_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Get a single effect by dedupe key.
    pub fn get_by_dedupe_key(conn: &Connection, dedupe_key: &str) -> Result<Option<EffectRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM effects WHERE dedupe_key = ?1"),
                params![dedupe_key],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Pending effects, oldest first, optionally scoped to one session.
    ///
    /// Ties on `created_at` fall back to insertion order.
    pub fn get_pending(
        conn: &Connection,
        limit: u32,
        session_key: Option<&str>,
    ) -> Result<Vec<EffectRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM effects
             WHERE status = 'pending' AND (?1 IS NULL OR session_key = ?1)
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![session_key, limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Move `id` from `from` to `to` if it is still in `from`.
    ///
    /// Entering `executing` bumps `attempt_count` and stamps
    /// `last_attempt_at`. Returns whether the row was updated.
    pub fn transition(
        conn: &Connection,
        effect_id: &str,
        from: EffectStatus,
        to: EffectStatus,
        now: &str,
    ) -> Result<bool> {
        let changed = if to == EffectStatus::Executing {
            conn.execute(
                "UPDATE effects
                 SET status = ?3, updated_at = ?4,
                     attempt_count = attempt_count + 1, last_attempt_at = ?4
                 WHERE id = ?1 AND status = ?2",
                params![effect_id, from, to, now],
            )?
        } else {
            conn.execute(
                "UPDATE effects SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
                params![effect_id, from, to, now],
            )?
        };
        Ok(changed == 1)
    }

    /// Delete every pending effect of a session. Returns the number removed.
    pub fn delete_pending_by_session(conn: &Connection, session_key: &str) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM effects WHERE session_key = ?1 AND status = 'pending'",
            params![session_key],
        )?;
        Ok(removed)
    }

    /// `(status, count)` for every status that has at least one row.
    pub fn count_by_status(conn: &Connection) -> Result<Vec<(EffectStatus, i64)>> {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM effects GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EffectRow> {
        Ok(EffectRow {
            id: row.get(0)?,
            session_key: row.get(1)?,
            checkpoint_id: row.get(2)?,
            effect_type: row.get(3)?,
            payload: row.get(4)?,
            dedupe_key: row.get(5)?,
            status: row.get(6)?,
            attempt_count: row.get(7)?,
            last_attempt_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
