//! Runtime error types.

use courier_events::EventStoreError;

/// Errors raised while sequencing, processing or delivering events.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A component was started twice without an intervening stop.
    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    /// The event type has no processing rule.
    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    /// The event payload is missing a required field or has the wrong shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The agent reported an error or closed its stream early.
    #[error("Agent error: {message}")]
    Agent {
        /// Error description from the agent.
        message: String,
        /// Whether the agent marked the failure as transient.
        retryable: bool,
    },

    /// The agent did not finish within the deadline.
    #[error("Agent timed out after {ms}ms")]
    Timeout {
        /// Deadline that elapsed.
        ms: u64,
    },

    /// Event log or outbox failure.
    #[error("Store error: {0}")]
    Store(#[from] EventStoreError),

    /// The queue dropped the event before it was processed.
    #[error("Event queue closed before the event was processed")]
    QueueClosed,

    /// Internal / unexpected error, including caught panics.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether resubmitting the same input may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Agent { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::QueueClosed => true,
            Self::Store(e) => e.is_conflict(),
            Self::AlreadyStarted(_)
            | Self::UnsupportedEventType(_)
            | Self::InvalidPayload(_)
            | Self::Internal(_) => false,
        }
    }

    /// Error category string for logs.
    pub fn category(&self) -> &str {
        match self {
            Self::AlreadyStarted(_) => "already_started",
            Self::UnsupportedEventType(_) => "unsupported_event_type",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Agent { .. } => "agent",
            Self::Timeout { .. } => "timeout",
            Self::Store(_) => "store",
            Self::QueueClosed => "queue_closed",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience type alias for runtime results.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            RuntimeError::AlreadyStarted("event queue").to_string(),
            "event queue already started"
        );
        assert_eq!(
            RuntimeError::Timeout { ms: 30_000 }.to_string(),
            "Agent timed out after 30000ms"
        );
        assert_eq!(
            RuntimeError::UnsupportedEventType("webhook".into()).to_string(),
            "Unsupported event type: webhook"
        );
    }

    #[test]
    fn agent_recoverability_follows_flag() {
        let transient = RuntimeError::Agent {
            message: "overloaded".into(),
            retryable: true,
        };
        let fatal = RuntimeError::Agent {
            message: "bad request".into(),
            retryable: false,
        };
        assert!(transient.is_recoverable());
        assert!(!fatal.is_recoverable());
    }

    #[test]
    fn store_conflicts_are_recoverable() {
        let conflict = RuntimeError::from(EventStoreError::SequenceConflict {
            session_key: "u:a:t".into(),
            seq: 2,
        });
        assert!(conflict.is_recoverable());
        assert_eq!(conflict.category(), "store");
        let missing = RuntimeError::from(EventStoreError::EffectNotFound("x".into()));
        assert!(!missing.is_recoverable());
    }

    #[test]
    fn validation_errors_are_not_recoverable() {
        assert!(!RuntimeError::InvalidPayload("text".into()).is_recoverable());
        assert!(!RuntimeError::UnsupportedEventType("x".into()).is_recoverable());
        assert_eq!(RuntimeError::QueueClosed.category(), "queue_closed");
    }

    #[test]
    fn panic_message_extracts_text() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(&boxed), "kaboom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&boxed), "unknown panic");
    }
}
