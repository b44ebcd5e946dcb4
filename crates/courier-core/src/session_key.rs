//! Composite session identity.
//!
//! A [`SessionKey`] is the wire string `"<userId>:<agentId>:<threadId>"`. It is
//! the partition key for the event log, the queue lanes and the outbox, and it
//! decomposes back into its three parts for the processor.
//!
//! Segments are restricted to ASCII alphanumerics, `-` and `_`, and may not be
//! empty or longer than [`MAX_SEGMENT_LEN`] bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the three segments.
pub const SEPARATOR: char = ':';

/// Maximum byte length of a single segment.
pub const MAX_SEGMENT_LEN: usize = 128;

const SEGMENT_NAMES: [&str; 3] = ["userId", "agentId", "threadId"];

/// Reasons a session key is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionKeyError {
    /// Fewer than two `:` separators.
    #[error("session key must have the form userId:agentId:threadId")]
    MissingSeparator,

    /// More than two `:` separators.
    #[error("session key has more than three segments")]
    TooManySeparators,

    /// A segment is empty.
    #[error("session key segment {segment} is empty")]
    EmptySegment {
        /// Which segment.
        segment: &'static str,
    },

    /// A segment contains a character outside `[A-Za-z0-9_-]`.
    #[error("session key segment {segment} contains invalid character {ch:?}")]
    InvalidCharacter {
        /// Which segment.
        segment: &'static str,
        /// The offending character.
        ch: char,
    },

    /// A segment exceeds [`MAX_SEGMENT_LEN`].
    #[error("session key segment {segment} exceeds {MAX_SEGMENT_LEN} bytes")]
    SegmentTooLong {
        /// Which segment.
        segment: &'static str,
    },
}

/// Decomposed session key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParts {
    /// Owning user.
    pub user_id: String,
    /// Agent persona.
    pub agent_id: String,
    /// Conversation thread.
    pub thread_id: String,
}

/// Validated `userId:agentId:threadId` key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey(String);

impl SessionKey {
    /// Parse and validate a wire-format key.
    pub fn parse(raw: &str) -> Result<Self, SessionKeyError> {
        validate(raw)?;
        Ok(Self(raw.to_owned()))
    }

    /// Build a key from its parts, validating each one.
    pub fn new(user_id: &str, agent_id: &str, thread_id: &str) -> Result<Self, SessionKeyError> {
        for (name, segment) in SEGMENT_NAMES.iter().zip([user_id, agent_id, thread_id]) {
            validate_segment(name, segment)?;
        }
        Ok(Self(format!("{user_id}{SEPARATOR}{agent_id}{SEPARATOR}{thread_id}")))
    }

    /// The wire string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// User segment.
    pub fn user_id(&self) -> &str {
        self.segment(0)
    }

    /// Agent segment.
    pub fn agent_id(&self) -> &str {
        self.segment(1)
    }

    /// Thread segment.
    pub fn thread_id(&self) -> &str {
        self.segment(2)
    }

    /// Owned decomposition.
    pub fn parts(&self) -> SessionParts {
        SessionParts {
            user_id: self.user_id().to_owned(),
            agent_id: self.agent_id().to_owned(),
            thread_id: self.thread_id().to_owned(),
        }
    }

    // Validated on construction, so exactly three segments exist.
    fn segment(&self, index: usize) -> &str {
        self.0.split(SEPARATOR).nth(index).unwrap_or_default()
    }
}

/// Parse a wire-format key straight into its parts.
pub fn parse_session_key(raw: &str) -> Result<SessionParts, SessionKeyError> {
    SessionKey::parse(raw).map(|key| key.parts())
}

fn validate(raw: &str) -> Result<(), SessionKeyError> {
    let segments: Vec<&str> = raw.split(SEPARATOR).collect();
    match segments.len() {
        0..=2 => return Err(SessionKeyError::MissingSeparator),
        3 => {}
        _ => return Err(SessionKeyError::TooManySeparators),
    }
    for (name, segment) in SEGMENT_NAMES.iter().zip(segments) {
        validate_segment(name, segment)?;
    }
    Ok(())
}

fn validate_segment(name: &'static str, segment: &str) -> Result<(), SessionKeyError> {
    if segment.is_empty() {
        return Err(SessionKeyError::EmptySegment { segment: name });
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(SessionKeyError::SegmentTooLong { segment: name });
    }
    if let Some(ch) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(SessionKeyError::InvalidCharacter { segment: name, ch });
    }
    Ok(())
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionKey {
    type Err = SessionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = SessionKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Self(value))
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl rusqlite::types::ToSql for SessionKey {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl rusqlite::types::FromSql for SessionKey {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let raw = String::column_result(value)?;
        Self::try_from(raw).map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_valid_key() {
        let key = SessionKey::parse("u1:a1:t1").unwrap();
        assert_eq!(key.user_id(), "u1");
        assert_eq!(key.agent_id(), "a1");
        assert_eq!(key.thread_id(), "t1");
        assert_eq!(key.to_string(), "u1:a1:t1");
    }

    #[test]
    fn parse_session_key_returns_parts() {
        let parts = parse_session_key("user-42:agent_x:thread-9").unwrap();
        assert_eq!(
            parts,
            SessionParts {
                user_id: "user-42".into(),
                agent_id: "agent_x".into(),
                thread_id: "thread-9".into(),
            }
        );
    }

    #[test]
    fn rejects_missing_separators() {
        assert_matches!(SessionKey::parse("u1"), Err(SessionKeyError::MissingSeparator));
        assert_matches!(SessionKey::parse("u1:a1"), Err(SessionKeyError::MissingSeparator));
        assert_matches!(SessionKey::parse(""), Err(SessionKeyError::MissingSeparator));
    }

    #[test]
    fn rejects_extra_separators() {
        assert_matches!(
            SessionKey::parse("u1:a1:t1:x"),
            Err(SessionKeyError::TooManySeparators)
        );
    }

    #[test]
    fn rejects_empty_segments() {
        assert_matches!(
            SessionKey::parse(":a1:t1"),
            Err(SessionKeyError::EmptySegment { segment: "userId" })
        );
        assert_matches!(
            SessionKey::parse("u1::t1"),
            Err(SessionKeyError::EmptySegment { segment: "agentId" })
        );
        assert_matches!(
            SessionKey::parse("u1:a1:"),
            Err(SessionKeyError::EmptySegment { segment: "threadId" })
        );
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert_matches!(
            SessionKey::parse("u@1:a1:t1"),
            Err(SessionKeyError::InvalidCharacter { segment: "userId", ch: '@' })
        );
        assert_matches!(
            SessionKey::parse("u1:a#1:t1"),
            Err(SessionKeyError::InvalidCharacter { ch: '#', .. })
        );
        assert_matches!(
            SessionKey::parse("u1:a1:t$"),
            Err(SessionKeyError::InvalidCharacter { ch: '$', .. })
        );
        assert_matches!(
            SessionKey::parse("u 1:a1:t1"),
            Err(SessionKeyError::InvalidCharacter { ch: ' ', .. })
        );
    }

    #[test]
    fn rejects_long_segment() {
        let long = "x".repeat(MAX_SEGMENT_LEN + 1);
        assert_matches!(
            SessionKey::parse(&format!("u1:{long}:t1")),
            Err(SessionKeyError::SegmentTooLong { segment: "agentId" })
        );
    }

    #[test]
    fn new_validates_parts() {
        let key = SessionKey::new("u1", "a1", "t1").unwrap();
        assert_eq!(key.as_str(), "u1:a1:t1");
        assert_matches!(
            SessionKey::new("u1", "a:1", "t1"),
            Err(SessionKeyError::InvalidCharacter { ch: ':', .. })
        );
    }

    #[test]
    fn serde_round_trip_validates() {
        let key = SessionKey::parse("u1:a1:t1").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"u1:a1:t1\"");
        let back: SessionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<SessionKey>("\"u1::t1\"").is_err());
    }

    #[test]
    fn error_display() {
        let err = SessionKeyError::EmptySegment { segment: "threadId" };
        assert_eq!(err.to_string(), "session key segment threadId is empty");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn valid_parts_round_trip(
                user in "[A-Za-z0-9_-]{1,32}",
                agent in "[A-Za-z0-9_-]{1,32}",
                thread in "[A-Za-z0-9_-]{1,32}",
            ) {
                let key = SessionKey::new(&user, &agent, &thread).unwrap();
                let parsed = SessionKey::parse(key.as_str()).unwrap();
                prop_assert_eq!(parsed.user_id(), user.as_str());
                prop_assert_eq!(parsed.agent_id(), agent.as_str());
                prop_assert_eq!(parsed.thread_id(), thread.as_str());
            }

            #[test]
            fn never_panics(raw in ".{0,64}") {
                let _ = SessionKey::parse(&raw);
            }
        }
    }
}
