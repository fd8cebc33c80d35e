//! Data models for dupscan.
//!
//! This module contains the core data structures shared by the scorer, the
//! detection task manager, the group registry, and the storage backends.

mod group;
mod record;
mod similarity;
mod task;

pub use group::{DuplicateGroup, GroupId, GroupStatus, select_master};
pub use record::{EntityType, Record, RecordId};
pub use similarity::{Algorithm, SimilarityResult, SimilarityWeights};
pub use task::{
    DetectionRequest, DetectionStarted, DuplicateTask, TaskId, TaskProgress, TaskStatus,
};
