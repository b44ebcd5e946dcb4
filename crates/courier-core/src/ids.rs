//! Branded ID newtypes and timestamps.
//!
//! Events and effects get distinct ID types so one cannot be passed where the
//! other is expected. All IDs are UUID v7 (time-ordered) generated via
//! [`uuid::Uuid::now_v7`].

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a persisted event.
    EventId
}

branded_id! {
    /// Unique identifier for an outbox effect.
    EffectId
}

/// Current UTC time as RFC 3339 with millisecond precision.
///
/// Fixed width, so lexical order of stored timestamps is chronological.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_is_uuid_v7() {
        let id = EventId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn effect_id_new_is_uuid_v7() {
        let id = EffectId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn serde_is_transparent() {
        let id = EffectId::from("eff-1".to_owned());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"eff-1\"");
    }

    #[test]
    fn timestamp_is_utc_millis() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        // 2025-01-01T00:00:00.000Z
        assert_eq!(ts.len(), 24);
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
