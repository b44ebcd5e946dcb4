//! Deterministic dedupe keys for outbox effects.
//!
//! The fingerprint input is the JSON object
//! `{"checkpointId", "type", "payload", "final"?, "sequence"?}` written in
//! canonical form: object keys sorted by byte order at every depth, no
//! insignificant whitespace, serde_json scalar encoding. The key is `dk_`
//! followed by the lowercase hex SHA-256 of those bytes, so two independent
//! implementations agree byte-for-byte on identical logical input.

use std::fmt::Write as _;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Prefix of every dedupe key.
pub const DEDUPE_KEY_PREFIX: &str = "dk_";

/// Extra discriminator mixed into the fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DedupeMarker {
    /// Payload alone identifies the effect.
    None,
    /// The completed response of a checkpoint.
    Final,
    /// Nth auxiliary effect emitted by a checkpoint.
    Sequence(u64),
}

/// Checkpoint ID for the processing of event `seq` on `thread_id`.
pub fn checkpoint_id(thread_id: &str, seq: i64) -> String {
    format!("{thread_id}:{seq}")
}

/// Derive the dedupe key for an effect.
pub fn derive_dedupe_key(
    checkpoint_id: &str,
    effect_type: &str,
    payload: &Value,
    marker: DedupeMarker,
) -> String {
    let mut input = Map::new();
    let _ = input.insert("checkpointId".into(), Value::String(checkpoint_id.to_owned()));
    let _ = input.insert("type".into(), Value::String(effect_type.to_owned()));
    let _ = input.insert("payload".into(), payload.clone());
    match marker {
        DedupeMarker::None => {}
        DedupeMarker::Final => {
            let _ = input.insert("final".into(), Value::Bool(true));
        }
        DedupeMarker::Sequence(n) => {
            let _ = input.insert("sequence".into(), Value::from(n));
        }
    }

    let digest = Sha256::digest(canonical_json(&Value::Object(input)).as_bytes());
    let mut key = String::with_capacity(DEDUPE_KEY_PREFIX.len() + 64);
    key.push_str(DEDUPE_KEY_PREFIX);
    for byte in digest.iter() {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

/// Serialize a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
