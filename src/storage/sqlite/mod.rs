//! `SQLite` storage backend.
//!
//! Records, duplicate groups, and group membership live in one database;
//! merges run inside a single transaction.

mod connection;
mod store;

pub use store::SqliteStore;
