//! # courier-core
//!
//! Foundation types shared by every Courier crate:
//!
//! - **Session keys**: [`SessionKey`], the validated `userId:agentId:threadId` partition key
//! - **Dedupe keys**: canonical JSON + SHA-256 fingerprints that make effect creation idempotent
//! - **Branded IDs**: `EventId`, `EffectId` as UUID v7 newtypes
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack

#![deny(unsafe_code)]

pub mod dedupe;
pub mod ids;
pub mod logging;
pub mod session_key;

pub use dedupe::{canonical_json, checkpoint_id, derive_dedupe_key, DedupeMarker};
pub use ids::{now_timestamp, EffectId, EventId};
pub use session_key::{parse_session_key, SessionKey, SessionKeyError, SessionParts};
