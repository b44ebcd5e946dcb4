//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`,
//! so every operation is a function of (connection, input) and can run on a
//! pooled connection or inside a caller's transaction.

pub mod effect;
pub mod event;
