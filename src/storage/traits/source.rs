//! Candidate source trait.

use crate::Result;
use crate::models::{EntityType, Record};

/// Paged read access to the records a detection scan compares.
///
/// The engine never owns this data; it only streams it. Implementations
/// must return records in a stable order so consecutive pages neither skip
/// nor repeat records.
pub trait CandidateSource: Send + Sync {
    /// Fetches up to `limit` records starting at `offset`.
    ///
    /// An empty page marks the end of the data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataSource`](crate::Error::DataSource) (or another
    /// error) when the source cannot be read.
    fn fetch_candidate_batch(
        &self,
        project_id: i64,
        entity_type: EntityType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>>;

    /// Returns the total number of candidate records.
    ///
    /// Scans use it only for the progress total; a failure here is logged
    /// and the scan goes on without one.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot be read.
    fn count_candidates(&self, project_id: i64, entity_type: EntityType) -> Result<usize>;
}
