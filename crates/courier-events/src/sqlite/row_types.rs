//! Row structs mapped straight from `SQLite` rows.
//!
//! The `type` column stays a `String` so rows written by a newer build (or by
//! hand) still load; [`EventRow::event_kind`] and [`EffectRow::effect_kind`]
//! give the recognised enum when there is one.

use courier_core::SessionKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EffectStatus, EffectType, EventType};

/// Row from the `events` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    /// Event ID (UUID v7).
    pub id: String,
    /// Owning session.
    pub session_key: SessionKey,
    /// Position in the session's log, starting at 1.
    pub seq: i64,
    /// Stored type string.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub payload: Value,
    /// Creation timestamp.
    pub created_at: String,
}

impl EventRow {
    /// Recognised event type, `None` for unknown strings.
    pub fn event_kind(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }
}

/// Row from the `effects` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectRow {
    /// Effect ID (UUID v7).
    pub id: String,
    /// Owning session.
    pub session_key: SessionKey,
    /// `"<threadId>:<eventSeq>"` of the event that produced it.
    pub checkpoint_id: String,
    /// Stored type string.
    #[serde(rename = "type")]
    pub effect_type: String,
    /// Effect payload.
    pub payload: Value,
    /// Idempotency fingerprint, unique across the table.
    pub dedupe_key: String,
    /// Delivery status.
    pub status: EffectStatus,
    /// Number of times the effect entered `executing`.
    pub attempt_count: i64,
    /// When the effect last entered `executing`.
    pub last_attempt_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last status change.
    pub updated_at: String,
}

impl EffectRow {
    /// Recognised effect type, `None` for unknown strings.
    pub fn effect_kind(&self) -> Option<EffectType> {
        EffectType::parse(&self.effect_type)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
