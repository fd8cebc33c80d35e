//! Business logic services.
//!
//! Services orchestrate storage backends and provide high-level operations:
//!
//! - [`SimilarityScorer`]: weighted fuzzy comparison with a shared cache
//! - [`DetectionTaskManager`]: background detection tasks
//! - [`DuplicateGroupRegistry`]: review, merge, and dismissal of groups
//! - [`AdmissionGate`]: bounded concurrency for heavy jobs

mod admission;
mod cancellation;
pub mod detection;
mod group;
pub mod similarity;

pub use admission::{AdmissionConfig, AdmissionGate, AdmissionPermit};
pub use cancellation::CancellationFlag;
pub use detection::{DetectionConfig, DetectionTaskManager};
pub use group::DuplicateGroupRegistry;
pub use similarity::{ComparisonCache, SimilarityConfig, SimilarityScorer, StringPair};
