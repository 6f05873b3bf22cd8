//! # Wacast DB
//!
//! SQLite persistence for the campaign engine. One `SqliteStore` wraps a
//! single connection behind a mutex (WAL mode); the claim step is a single
//! UPDATE…RETURNING statement so racing workers can never double-claim.

pub mod sqlite;

pub use sqlite::SqliteStore;
