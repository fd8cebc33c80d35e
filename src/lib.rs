//! # Dupscan
//!
//! Fuzzy duplicate detection for business master data.
//!
//! Dupscan compares large sets of textual business records (counterparty
//! names, nomenclature descriptions) pairwise with a weighted blend of string
//! similarity algorithms, runs the comparison as a cancellable background task,
//! and produces duplicate-candidate groups that can later be merged or resolved.
//!
//! ## Features
//!
//! - Weighted hybrid similarity (Jaro-Winkler, LCS, phonetic, n-gram, Jaccard)
//! - Bounded LRU cache of pairwise comparison results
//! - Background detection tasks with progress polling and cancellation
//! - Admission gate capping concurrent heavy batch jobs
//! - Duplicate group registry with atomic merges
//! - Pluggable storage (in-memory, `SQLite`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use dupscan::{DetectionRequest, DetectionTaskManager, EntityType};
//!
//! let started = manager
//!     .start_detection(DetectionRequest::new(42, EntityType::Counterparty, 0.8))
//!     .await?;
//! let snapshot = manager.wait_for(&started.task_id).await?;
//! println!("groups found: {}", snapshot.progress.groups_found);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::DupscanConfig;
pub use models::{
    Algorithm, DetectionRequest, DetectionStarted, DuplicateGroup, DuplicateTask, EntityType,
    GroupId, GroupStatus, Record, RecordId, SimilarityResult, SimilarityWeights, TaskId,
    TaskProgress, TaskStatus,
};
pub use services::{
    AdmissionConfig, AdmissionGate, AdmissionPermit, CancellationFlag, ComparisonCache,
    DetectionConfig, DetectionTaskManager, DuplicateGroupRegistry, SimilarityConfig,
    SimilarityScorer,
};
pub use storage::{CandidateSource, DuplicateStore, MemoryStore, SqliteStore};

/// Error type for dupscan operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Bad threshold, batch size, empty pair list, malformed request |
/// | `InvalidWeights` | No similarity algorithm has a positive weight |
/// | `QueueBusy` | Admission gate acquire timed out |
/// | `NotFound` | Unknown task, group, or record |
/// | `DataSource` | Candidate fetch from the external source failed |
/// | `MergeConflict` | Merge/resolve on a group that is no longer open |
/// | `Cancelled` | Caller cancelled while waiting for admission |
/// | `OperationFailed` | Storage, I/O, or lock failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Similarity weights cannot produce a score.
    ///
    /// Raised when every weight is zero, or a weight is negative or not finite.
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    /// The admission gate had no free slot within the acquire timeout.
    #[error("queue busy: no detection slot freed within {waited_ms}ms")]
    QueueBusy {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// A task, group, or record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The kind of entity ("task", "group", "record").
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The external candidate source failed.
    ///
    /// Recorded on the task object; never retried automatically.
    #[error("data source error: {0}")]
    DataSource(String),

    /// A merge or resolve was attempted on a group that is no longer open.
    #[error("merge conflict: {0}")]
    MergeConflict(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` database operations fail
    /// - Filesystem I/O errors occur
    /// - A lock is poisoned
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns `true` for validation failures surfaced synchronously to callers.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::InvalidWeights(_))
    }

    /// Shorthand for [`Error::NotFound`].
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for dupscan operations.
pub type Result<T> = std::result::Result<T, Error>;
