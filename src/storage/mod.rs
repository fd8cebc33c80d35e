//! Storage layer.
//!
//! The detection engine reads candidates through [`CandidateSource`] and
//! writes groups (and merge side effects) through [`DuplicateStore`]. Both
//! backends implement both traits:
//!
//! - [`MemoryStore`]: single-mutex in-memory store for tests and dry runs
//! - [`SqliteStore`]: `SQLite` database with transactional merges

// Allow significant_drop_tightening - holding the connection guard for the
// whole method keeps each operation serialized.
#![allow(clippy::significant_drop_tightening)]

pub mod import;
mod memory;
pub mod sqlite;
mod traits;

pub use import::{read_csv, read_csv_file};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{CandidateSource, DuplicateStore, MergeCommit};
