//! Error types for the event log and outbox.
//!
//! [`EventStoreError`] is returned by every store operation. The two conflict
//! variants are expected idempotency signals: callers that replay treat them as
//! no-ops, see [`EventStoreError::is_conflict`].

use courier_core::SessionKeyError;
use thiserror::Error;

use crate::types::EffectStatus;

/// Errors that can occur during event log and outbox operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// The session key failed validation.
    #[error("invalid session key: {0}")]
    InvalidSessionKey(#[from] SessionKeyError),

    /// An event already exists at this `(session_key, seq)`.
    #[error("event {session_key}#{seq} already exists")]
    SequenceConflict {
        /// Session the event belongs to.
        session_key: String,
        /// Conflicting sequence number.
        seq: i64,
    },

    /// An effect with this dedupe key already exists.
    #[error("duplicate dedupe key: {0}")]
    DuplicateDedupeKey(String),

    /// Requested effect was not found.
    #[error("effect not found: {0}")]
    EffectNotFound(String),

    /// Status change not allowed by the effect state machine (or lost a race).
    #[error("invalid effect transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Effect ID.
        id: String,
        /// Status observed in the database.
        from: EffectStatus,
        /// Requested status.
        to: EffectStatus,
    },

    /// Invalid operation on the store.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventStoreError {
    /// Whether this is a uniqueness conflict (sequence or dedupe key).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SequenceConflict { .. } | Self::DuplicateDedupeKey(_))
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, EventStoreError>;

/// Whether a `SQLite` error is a UNIQUE or PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_display() {
        let err = EventStoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn migration_error_display() {
        let err = EventStoreError::Migration {
            message: "v001 failed: table already exists".into(),
        };
        assert_eq!(
            err.to_string(),
            "migration error: v001 failed: table already exists"
        );
    }

    #[test]
    fn sequence_conflict_display() {
        let err = EventStoreError::SequenceConflict {
            session_key: "u1:a1:t1".into(),
            seq: 3,
        };
        assert_eq!(err.to_string(), "event u1:a1:t1#3 already exists");
        assert!(err.is_conflict());
    }

    #[test]
    fn duplicate_dedupe_key_is_conflict() {
        let err = EventStoreError::DuplicateDedupeKey("dk_abc".into());
        assert_eq!(err.to_string(), "duplicate dedupe key: dk_abc");
        assert!(err.is_conflict());
        assert!(!EventStoreError::EffectNotFound("e".into()).is_conflict());
    }

    #[test]
    fn invalid_transition_display() {
        let err = EventStoreError::InvalidTransition {
            id: "eff-1".into(),
            from: EffectStatus::Completed,
            to: EffectStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "invalid effect transition for eff-1: completed -> pending"
        );
    }

    #[test]
    fn from_session_key_error() {
        let err: EventStoreError = SessionKeyError::MissingSeparator.into();
        assert!(matches!(err, EventStoreError::InvalidSessionKey(_)));
    }

    #[test]
    fn unique_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&rusqlite::Error::QueryReturnedNoRows));
    }
}
