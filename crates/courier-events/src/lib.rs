//! # courier-events
//!
//! Event sourcing and transactional outbox with a `SQLite` backend.
//!
//! - **Event log**: append-only, one event per `(session_key, seq)`, replayable per session
//! - **Outbox**: durable delivery intents ("effects") whose `dedupe_key` uniqueness is the
//!   idempotency boundary, with a compare-and-set status state machine
//! - **`SQLite` backend**: `r2d2` pool, pragmas, version-tracked migrations, stateless repositories
//! - **Stores**: [`EventStore`] and [`OutboxStore`], the high-level APIs the runtime uses
//!
//! Cross-process safety comes from the two uniqueness constraints and the
//! status compare-and-set, never from in-memory locks.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::{EventStoreError, Result};
pub use sqlite::connection::{new_file, new_in_memory, ConnectionConfig, ConnectionPool};
pub use sqlite::migrations::{current_version, latest_version, run_migrations};
pub use sqlite::row_types::{EffectRow, EventRow};
pub use store::{EventStore, NewEffect, NewEvent, OutboxStore, StatusCount};
pub use types::{EffectStatus, EffectType, EventType};
