//! Session-centric event log API.

use courier_core::{now_timestamp, EventId, SessionKey};
use serde_json::Value;
use tracing::debug;

use crate::errors::{EventStoreError, Result};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::event::EventRepo;
use crate::sqlite::row_types::EventRow;
use crate::types::EventType;

/// Input for [`EventStore::create`].
#[derive(Clone, Debug)]
pub struct NewEvent<'a> {
    /// Wire-format session key, validated on create.
    pub session_key: &'a str,
    /// Position in the session's log, `>= 1`.
    pub seq: i64,
    /// Event type.
    pub event_type: EventType,
    /// Event payload.
    pub payload: Value,
}

/// Append-only event log backed by a connection pool.
#[derive(Clone)]
pub struct EventStore {
    pool: ConnectionPool,
}

impl EventStore {
    /// Wrap a connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations. Returns the number applied.
    pub fn migrate(&self) -> Result<u32> {
        run_migrations(&*self.conn()?)
    }

    /// Underlying pool, for sharing with an [`OutboxStore`](crate::OutboxStore).
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Append an event, assigning its ID and timestamp.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::InvalidSessionKey`] for a malformed key.
    /// - [`EventStoreError::InvalidOperation`] when `seq < 1`.
    /// - [`EventStoreError::SequenceConflict`] when the session already has
    ///   an event at `seq`.
    pub fn create(&self, event: NewEvent<'_>) -> Result<EventRow> {
        let session_key = SessionKey::parse(event.session_key)?;
        if event.seq < 1 {
            return Err(EventStoreError::InvalidOperation(format!(
                "event seq must be >= 1, got {}",
                event.seq
            )));
        }

        let row = EventRow {
            id: EventId::new().into_inner(),
            session_key,
            seq: event.seq,
            event_type: event.event_type.as_str().to_owned(),
            payload: event.payload,
            created_at: now_timestamp(),
        };
        EventRepo::insert(&*self.conn()?, &row)?;
        debug!(
            session_key = %row.session_key,
            seq = row.seq,
            event_type = %row.event_type,
            event_id = %row.id,
            "event appended"
        );
        Ok(row)
    }

    /// `1 + max(seq)` for the session, or `1` if it has no events.
    pub fn get_next_seq(&self, session_key: &str) -> Result<i64> {
        let key = SessionKey::parse(session_key)?;
        EventRepo::get_next_sequence(&*self.conn()?, key.as_str())
    }

    /// Every event of the session, ascending by `seq`.
    pub fn find_by_session(&self, session_key: &str) -> Result<Vec<EventRow>> {
        let key = SessionKey::parse(session_key)?;
        EventRepo::get_by_session(&*self.conn()?, key.as_str())
    }

    /// Events with `seq > after_seq`, ascending.
    pub fn find_since(&self, session_key: &str, after_seq: i64) -> Result<Vec<EventRow>> {
        let key = SessionKey::parse(session_key)?;
        EventRepo::get_since(&*self.conn()?, key.as_str(), after_seq)
    }

    /// Single event by ID.
    pub fn get(&self, event_id: &str) -> Result<Option<EventRow>> {
        EventRepo::get_by_id(&*self.conn()?, event_id)
    }

    /// Number of events in the session.
    pub fn count_by_session(&self, session_key: &str) -> Result<i64> {
        let key = SessionKey::parse(session_key)?;
        EventRepo::count_by_session(&*self.conn()?, key.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
