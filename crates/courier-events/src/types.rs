//! Event and effect vocabularies.
//!
//! Stored as snake_case strings. Row types keep the raw `type` column as a
//! `String` so rows written by other versions still load; these enums are the
//! recognised subset.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Kind of event appended to a session's log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A message typed by the user.
    UserMessage,
    /// A scheduled timer fired for the session.
    Timer,
}

impl EventType {
    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::Timer => "timer",
        }
    }

    /// Parse a stored type string, `None` if unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_message" => Some(Self::UserMessage),
            "timer" => Some(Self::Timer),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of delivery intent held in the outbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    /// Deliver a message to the client.
    SendMessage,
    /// Ask the timer subsystem to schedule a follow-up.
    ScheduleTimer,
}

impl EffectType {
    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::ScheduleTimer => "schedule_timer",
        }
    }

    /// Parse a stored type string, `None` if unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send_message" => Some(Self::SendMessage),
            "schedule_timer" => Some(Self::ScheduleTimer),
            _ => None,
        }
    }
}

impl fmt::Display for EffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of an effect.
///
/// ```text
/// pending ──► executing ──► completed
///    │  ▲         │
///    │  └─────────┤ (revert: no transport)
///    ▼            ▼
///  failed ◄───────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectStatus {
    /// Waiting for delivery.
    Pending,
    /// Claimed by a worker, delivery in progress.
    Executing,
    /// Delivered.
    Completed,
    /// Given up.
    Failed,
}

impl EffectStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Executing, Self::Completed, Self::Failed];

    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing | Self::Failed)
                | (Self::Executing, Self::Completed | Self::Failed | Self::Pending)
        )
    }
}

impl fmt::Display for EffectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for EffectStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EffectStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Self::parse(raw).ok_or_else(|| FromSqlError::Other(format!("unknown effect status: {raw}").into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
