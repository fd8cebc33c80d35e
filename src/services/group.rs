//! Duplicate group registry.
//!
//! Review operations over the groups produced by detection scans.
//!
//! | Operation | Effect on group | Effect on records |
//! |-----------|-----------------|-------------------|
//! | `resolve_group` | `resolved` | none |
//! | `merge_group` | `resolved` | master gains missing fields, others deleted |
//! | `delete_group` | `deleted` | none |
//!
//! Mutating operations on the same project are serialized, so two
//! concurrent merges cannot both consume the same member.
//!
//! # Example
//!
//! ```rust,ignore
//! use dupscan::services::DuplicateGroupRegistry;
//!
//! let registry = DuplicateGroupRegistry::new(store);
//! for group in registry.list_groups(42, None)? {
//!     println!("{} -> master {}", group.id, group.suggested_master);
//! }
//! let merged = registry.merge_group(42, 10, &[11, 12])?;
//! ```

use crate::models::{DuplicateGroup, GroupId, GroupStatus, Record, RecordId, select_master};
use crate::storage::{DuplicateStore, MergeCommit};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::instrument;

/// Service for reviewing duplicate groups.
pub struct DuplicateGroupRegistry {
    store: Arc<dyn DuplicateStore>,
    project_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl DuplicateGroupRegistry {
    /// Creates a registry over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DuplicateStore>) -> Self {
        Self {
            store,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lists a project's groups with the given status, `open` when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be accessed.
    pub fn list_groups(
        &self,
        project_id: i64,
        status: Option<GroupStatus>,
    ) -> Result<Vec<DuplicateGroup>> {
        self.store
            .list_groups(project_id, Some(status.unwrap_or_default()))
    }

    /// Gets a group by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the group does not exist.
    pub fn get_group(&self, group_id: &GroupId) -> Result<DuplicateGroup> {
        self.store
            .get_group(group_id)?
            .ok_or_else(|| Error::not_found("group", group_id))
    }

    /// Marks an open group resolved without touching its members.
    ///
    /// Returns the group's master record.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the group is not in the project or has no
    ///   surviving members
    /// - [`Error::MergeConflict`] if the group is no longer open
    #[instrument(skip(self, group_id), fields(group_id = %group_id))]
    pub fn resolve_group(&self, project_id: i64, group_id: &GroupId) -> Result<Record> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let group = self.open_group(project_id, group_id)?;
        let records = self.store.get_records(project_id, &group.members)?;
        let master = records
            .iter()
            .find(|r| r.id == group.suggested_master)
            .or_else(|| select_master(&records))
            .cloned()
            .ok_or_else(|| Error::not_found("record", group.suggested_master))?;

        self.store.set_group_status(&group.id, GroupStatus::Resolved)?;
        metrics::counter!("duplicate_group_resolved_total").increment(1);
        tracing::info!(project_id, master = %master.id, "Group resolved");
        Ok(master)
    }

    /// Merges records of one group into a master record.
    ///
    /// The master takes every attribute it is missing (or has blank) from the
    /// merged records, visiting them in ascending ID order. The merged
    /// records are then deleted and the group marked resolved, all in one
    /// store commit.
    ///
    /// Returns the master record as stored after the merge.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `merge_ids` is empty or contains the master
    /// - [`Error::NotFound`] if no group holds all the records, or a record is missing
    /// - [`Error::MergeConflict`] if the only such group is no longer open
    #[instrument(skip(self, merge_ids), fields(merge_count = merge_ids.len()))]
    pub fn merge_group(
        &self,
        project_id: i64,
        master_id: i64,
        merge_ids: &[i64],
    ) -> Result<Record> {
        let start = Instant::now();
        let master_id = RecordId::new(master_id);
        let merge_ids: BTreeSet<RecordId> = merge_ids.iter().copied().map(RecordId::new).collect();
        if merge_ids.is_empty() {
            return Err(Error::InvalidInput("merge_ids must not be empty".to_string()));
        }
        if merge_ids.contains(&master_id) {
            return Err(Error::InvalidInput(format!(
                "master {master_id} cannot also be merged into itself"
            )));
        }

        let lock = self.project_lock(project_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let group = self.group_holding(project_id, master_id, &merge_ids)?;
        let wanted: Vec<RecordId> = std::iter::once(master_id)
            .chain(merge_ids.iter().copied())
            .collect();
        let records = self.store.get_records(project_id, &wanted)?;
        if let Some(missing) = wanted.iter().find(|id| !records.iter().any(|r| r.id == **id)) {
            return Err(Error::not_found("record", missing));
        }

        let Some((master, absorbed)) = split_master(records, master_id) else {
            return Err(Error::not_found("record", master_id));
        };
        let fields = absorb_fields(&master, &absorbed);
        let commit = MergeCommit {
            group_id: group.id.clone(),
            master: master_id,
            fields,
            deleted: merge_ids.iter().copied().collect(),
        };

        if let Err(e) = self.store.commit_merge(&commit) {
            metrics::counter!("duplicate_group_merges_total", "status" => "error").increment(1);
            return Err(e);
        }
        metrics::counter!("duplicate_group_merges_total", "status" => "success").increment(1);
        metrics::histogram!("duplicate_group_merge_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(
            project_id,
            group_id = %group.id,
            master = %master_id,
            filled = commit.fields.len(),
            deleted = commit.deleted.len(),
            "Group merged"
        );

        self.store
            .get_records(project_id, &[master_id])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("record", master_id))
    }

    /// Dismisses a group as a false positive, keeping every member record.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the group is not in the project
    /// - [`Error::MergeConflict`] if the group is no longer open
    #[instrument(skip(self, group_id), fields(group_id = %group_id))]
    pub fn delete_group(&self, project_id: i64, group_id: &GroupId) -> Result<()> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let group = self.open_group(project_id, group_id)?;
        self.store.set_group_status(&group.id, GroupStatus::Deleted)?;
        metrics::counter!("duplicate_group_deleted_total").increment(1);
        tracing::info!(project_id, "Group dismissed");
        Ok(())
    }

    fn project_lock(&self, project_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self
            .project_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(project_id).or_default())
    }

    fn open_group(&self, project_id: i64, group_id: &GroupId) -> Result<DuplicateGroup> {
        let group = self
            .store
            .get_group(group_id)?
            .filter(|g| g.project_id == project_id)
            .ok_or_else(|| Error::not_found("group", group_id))?;
        if !group.is_open() {
            return Err(Error::MergeConflict(format!(
                "group {} is already {}",
                group.id,
                group.status.as_str()
            )));
        }
        Ok(group)
    }

    /// Finds the open group holding the master and every merge ID.
    fn group_holding(
        &self,
        project_id: i64,
        master_id: RecordId,
        merge_ids: &BTreeSet<RecordId>,
    ) -> Result<DuplicateGroup> {
        let mut closed = None;
        for group in self.store.list_groups(project_id, None)? {
            if !group.contains(master_id) || !merge_ids.iter().all(|id| group.contains(*id)) {
                continue;
            }
            if group.is_open() {
                return Ok(group);
            }
            if closed.is_none() {
                closed = Some(group);
            }
        }

        match closed {
            Some(group) => Err(Error::MergeConflict(format!(
                "group {} is already {}",
                group.id,
                group.status.as_str()
            ))),
            None => Err(Error::not_found(
                "group",
                format!("containing master {master_id} and {} merge records", merge_ids.len()),
            )),
        }
    }
}

fn split_master(records: Vec<Record>, master_id: RecordId) -> Option<(Record, Vec<Record>)> {
    let (mut masters, absorbed): (Vec<Record>, Vec<Record>) =
        records.into_iter().partition(|r| r.id == master_id);
    masters.pop().map(|master| (master, absorbed))
}

/// Fields the master lacks, taken from the first absorbed record that has them.
///
/// `absorbed` must be in ascending ID order.
fn absorb_fields(master: &Record, absorbed: &[Record]) -> BTreeMap<String, String> {
    let mut filled = BTreeMap::new();
    for record in absorbed {
        for (key, value) in &record.fields {
            if value.trim().is_empty() || !master.is_missing(key) {
                continue;
            }
            filled.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    filled
}
