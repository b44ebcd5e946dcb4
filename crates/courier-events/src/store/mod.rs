//! High-level store APIs.
//!
//! [`EventStore`] owns the append-only log and [`OutboxStore`] the effects
//! table. Both wrap a cloned handle to the same connection pool and delegate
//! SQL to the stateless repositories.

mod event_store;
mod outbox_store;

pub use event_store::*;
pub use outbox_store::*;
