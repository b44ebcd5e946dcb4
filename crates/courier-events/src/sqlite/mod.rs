//! `SQLite` backend for the event log and outbox.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and busy timeout applied to every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time, applied transactionally.
//! - **[`row_types`]**: row structs mapped straight from `rusqlite` rows.
//! - **[`repositories`]**: stateless repository structs, every method takes `&Connection`.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    new_file, new_in_memory, verify_pragmas, ConnectionConfig, ConnectionPool, PooledConnection,
    PragmaState,
};
pub use migrations::{current_version, latest_version, run_migrations};
