//! Storage traits.

mod source;
mod store;

pub use source::CandidateSource;
pub use store::{DuplicateStore, MergeCommit};
