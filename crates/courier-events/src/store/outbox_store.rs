//! Durable outbox of delivery intents.
//!
//! `create` is the idempotency boundary: the `dedupe_key` column is unique, so
//! replaying the same event can never produce a second effect. Status moves
//! through a small state machine enforced here and applied as a
//! compare-and-set, which makes concurrent runners safe without locks.

use courier_core::{now_timestamp, EffectId, SessionKey};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::{EventStoreError, Result};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::repositories::effect::EffectRepo;
use crate::sqlite::row_types::EffectRow;
use crate::types::{EffectStatus, EffectType};

/// Input for [`OutboxStore::create`].
#[derive(Clone, Debug)]
pub struct NewEffect<'a> {
    /// Wire-format session key, validated on create.
    pub session_key: &'a str,
    /// `"<threadId>:<eventSeq>"` of the producing event.
    pub checkpoint_id: &'a str,
    /// Effect type.
    pub effect_type: EffectType,
    /// Effect payload.
    pub payload: Value,
    /// Idempotency fingerprint.
    pub dedupe_key: &'a str,
    /// Initial status, `pending` when `None`. Only `pending` or `completed`.
    pub status: Option<EffectStatus>,
}

/// Effect counts per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    /// Waiting for delivery.
    pub pending: i64,
    /// Claimed by a runner.
    pub executing: i64,
    /// Delivered.
    pub completed: i64,
    /// Given up.
    pub failed: i64,
}

impl StatusCount {
    /// Sum over all statuses.
    pub fn total(&self) -> i64 {
        self.pending + self.executing + self.completed + self.failed
    }
}

/// Outbox backed by a connection pool.
#[derive(Clone)]
pub struct OutboxStore {
    pool: ConnectionPool,
}

impl OutboxStore {
    /// Wrap a connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Persist a new effect.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::InvalidSessionKey`] for a malformed key.
    /// - [`EventStoreError::InvalidOperation`] for an initial status other
    ///   than `pending` or `completed`.
    /// - [`EventStoreError::DuplicateDedupeKey`] when the key already exists.
    pub fn create(&self, effect: NewEffect<'_>) -> Result<EffectRow> {
        let session_key = SessionKey::parse(effect.session_key)?;
        let status = effect.status.unwrap_or(EffectStatus::Pending);
        if !matches!(status, EffectStatus::Pending | EffectStatus::Completed) {
            return Err(EventStoreError::InvalidOperation(format!(
                "effects must be created pending or completed, got {status}"
            )));
        }

        let now = now_timestamp();
        let row = EffectRow {
            id: EffectId::new().into_inner(),
            session_key,
            checkpoint_id: effect.checkpoint_id.to_owned(),
            effect_type: effect.effect_type.as_str().to_owned(),
            payload: effect.payload,
            dedupe_key: effect.dedupe_key.to_owned(),
            status,
            attempt_count: 0,
            last_attempt_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        EffectRepo::insert(&*self.conn()?, &row)?;
        debug!(
            session_key = %row.session_key,
            effect_id = %row.id,
            effect_type = %row.effect_type,
            status = %row.status,
            "effect created"
        );
        Ok(row)
    }

    /// Pending effects, oldest first, optionally scoped to one session.
    pub fn get_pending(&self, limit: u32, session_key: Option<&str>) -> Result<Vec<EffectRow>> {
        let key = session_key.map(SessionKey::parse).transpose()?;
        EffectRepo::get_pending(&*self.conn()?, limit, key.as_ref().map(SessionKey::as_str))
    }

    /// Transition an effect to `new_status`.
    ///
    /// Returns the updated row. Entering `executing` increments
    /// `attempt_count` and sets `last_attempt_at`.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::EffectNotFound`] if no such effect exists.
    /// - [`EventStoreError::InvalidTransition`] if the state machine forbids
    ///   the move, or another writer changed the status first.
    pub fn update_status(&self, effect_id: &str, new_status: EffectStatus) -> Result<EffectRow> {
        let conn = self.conn()?;
        let current = EffectRepo::get_by_id(&conn, effect_id)?
            .ok_or_else(|| EventStoreError::EffectNotFound(effect_id.to_owned()))?;

        if !current.status.can_transition_to(new_status) {
            return Err(EventStoreError::InvalidTransition {
                id: effect_id.to_owned(),
                from: current.status,
                to: new_status,
            });
        }

        if !EffectRepo::transition(&conn, effect_id, current.status, new_status, &now_timestamp())? {
            let observed = EffectRepo::get_by_id(&conn, effect_id)?
                .map_or(current.status, |row| row.status);
            return Err(EventStoreError::InvalidTransition {
                id: effect_id.to_owned(),
                from: observed,
                to: new_status,
            });
        }

        debug!(effect_id, from = %current.status, to = %new_status, "effect status updated");
        EffectRepo::get_by_id(&conn, effect_id)?
            .ok_or_else(|| EventStoreError::EffectNotFound(effect_id.to_owned()))
    }

    /// Atomically claim a pending effect (`pending -> executing`).
    ///
    /// Returns `false` when the effect is missing or no longer pending.
    pub fn try_claim(&self, effect_id: &str) -> Result<bool> {
        EffectRepo::transition(
            &*self.conn()?,
            effect_id,
            EffectStatus::Pending,
            EffectStatus::Executing,
            &now_timestamp(),
        )
    }

    /// Remove every still-pending effect of a session.
    ///
    /// Effects already executing or terminal are untouched. Returns the number
    /// removed.
    pub fn clear_pending_by_session(&self, session_key: &str) -> Result<usize> {
        let key = SessionKey::parse(session_key)?;
        let removed = EffectRepo::delete_pending_by_session(&*self.conn()?, key.as_str())?;
        if removed > 0 {
            debug!(session_key = %key, removed, "cleared pending effects");
        }
        Ok(removed)
    }

    /// Single effect by ID.
    pub fn get(&self, effect_id: &str) -> Result<Option<EffectRow>> {
        EffectRepo::get_by_id(&*self.conn()?, effect_id)
    }

    /// Single effect by dedupe key.
    pub fn find_by_dedupe_key(&self, dedupe_key: &str) -> Result<Option<EffectRow>> {
        EffectRepo::get_by_dedupe_key(&*self.conn()?, dedupe_key)
    }

    /// Effect counts per status.
    pub fn count_by_status(&self) -> Result<StatusCount> {
        let mut counts = StatusCount::default();
        for (status, n) in EffectRepo::count_by_status(&*self.conn()?)? {
            match status {
                EffectStatus::Pending => counts.pending = n,
                EffectStatus::Executing => counts.executing = n,
                EffectStatus::Completed => counts.completed = n,
                EffectStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
