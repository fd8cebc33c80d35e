//! Duplicate store trait.

use crate::Result;
use crate::models::{DuplicateGroup, GroupId, GroupStatus, Record, RecordId};
use std::collections::BTreeMap;

/// Everything one group merge changes, applied as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommit {
    /// Group being merged.
    pub group_id: GroupId,
    /// Surviving record.
    pub master: RecordId,
    /// Fields to set on the master.
    pub fields: BTreeMap<String, String>,
    /// Records absorbed into the master and deleted.
    pub deleted: Vec<RecordId>,
}

/// Persistence sink for duplicate groups and the merge side effects on records.
///
/// The store is the system of record for the records a scan reads: a
/// candidate missing from [`get_records`](Self::get_records) is treated as
/// deleted. Implementations must be thread-safe (`Send + Sync`).
pub trait DuplicateStore: Send + Sync {
    /// Inserts or replaces a group.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn save_group(&self, group: &DuplicateGroup) -> Result<()>;

    /// Gets a group by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn get_group(&self, id: &GroupId) -> Result<Option<DuplicateGroup>>;

    /// Lists a project's groups, optionally filtered by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn list_groups(
        &self,
        project_id: i64,
        status: Option<GroupStatus>,
    ) -> Result<Vec<DuplicateGroup>>;

    /// Inserts a group, or replaces it only while the stored copy is still open.
    ///
    /// Returns `false` and changes nothing when the stored group was resolved
    /// or deleted. The status check and the write are one atomic step, so a
    /// running scan never reopens a group a reviewer has closed.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn save_open_group(&self, group: &DuplicateGroup) -> Result<bool>;

    /// Removes a group outright if it is still open. Returns `false` if it
    /// did not exist or has been closed.
    ///
    /// Used when a scan folds one group into another.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn remove_open_group(&self, id: &GroupId) -> Result<bool>;

    /// Sets a group's status. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn set_group_status(&self, id: &GroupId, status: GroupStatus) -> Result<bool>;

    /// Loads records by ID within a project, ascending by ID. Missing IDs are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn get_records(&self, project_id: i64, ids: &[RecordId]) -> Result<Vec<Record>>;

    /// Sets fields on a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if the record does
    /// not exist, or an error if storage cannot be accessed.
    fn update_master_fields(&self, master: RecordId, fields: &BTreeMap<String, String>)
    -> Result<()>;

    /// Deletes records and drops them from every group. Returns how many records were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    fn delete_members(&self, ids: &[RecordId]) -> Result<usize>;

    /// Applies a merge atomically.
    ///
    /// Updates the master fields, deletes the absorbed records (dropping
    /// them from every group), and marks the group resolved. On error
    /// nothing is changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if the group or
    /// master is missing, [`Error::MergeConflict`](crate::Error::MergeConflict)
    /// if the group is no longer open, or an error if storage cannot be accessed.
    fn commit_merge(&self, merge: &MergeCommit) -> Result<()>;
}
