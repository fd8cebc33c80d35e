//! In-memory store.
//!
//! Holds records and groups behind one mutex, so every operation (including
//! [`DuplicateStore::commit_merge`]) is atomic. Used by tests and CLI dry runs.

use super::traits::{CandidateSource, DuplicateStore, MergeCommit};
use crate::models::{DuplicateGroup, EntityType, GroupId, GroupStatus, Record, RecordId};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<RecordId, Record>,
    groups: HashMap<GroupId, DuplicateGroup>,
}

/// Thread-safe in-memory record and group store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.records.extend(records.into_iter().map(|r| (r.id, r)));
        }
        store
    }

    /// Inserts or replaces records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn upsert_records(&self, records: impl IntoIterator<Item = Record>) -> Result<usize> {
        let mut state = self.lock()?;
        let mut count = 0;
        for record in records {
            state.records.insert(record.id, record);
            count += 1;
        }
        Ok(count)
    }

    /// Gets a record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn record(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.lock()?.records.get(&id).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| Error::operation("lock_memory_store", e))
    }
}

fn strip_members(groups: &mut HashMap<GroupId, DuplicateGroup>, deleted: &[RecordId]) {
    let now = Utc::now();
    for group in groups.values_mut() {
        let before = group.members.len();
        group.members.retain(|id| !deleted.contains(id));
        if group.members.len() != before {
            group.updated_at = now;
        }
    }
}

impl CandidateSource for MemoryStore {
    fn fetch_candidate_batch(
        &self,
        project_id: i64,
        entity_type: EntityType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let state = self.lock()?;
        Ok(state
            .records
            .values()
            .filter(|r| r.project_id == project_id && r.entity_type == entity_type)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count_candidates(&self, project_id: i64, entity_type: EntityType) -> Result<usize> {
        let state = self.lock()?;
        Ok(state
            .records
            .values()
            .filter(|r| r.project_id == project_id && r.entity_type == entity_type)
            .count())
    }
}

impl DuplicateStore for MemoryStore {
    fn save_group(&self, group: &DuplicateGroup) -> Result<()> {
        self.lock()?.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    fn get_group(&self, id: &GroupId) -> Result<Option<DuplicateGroup>> {
        Ok(self.lock()?.groups.get(id).cloned())
    }

    fn list_groups(
        &self,
        project_id: i64,
        status: Option<GroupStatus>,
    ) -> Result<Vec<DuplicateGroup>> {
        let state = self.lock()?;
        let mut groups: Vec<DuplicateGroup> = state
            .groups
            .values()
            .filter(|g| g.project_id == project_id && status.is_none_or(|s| g.status == s))
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(groups)
    }

    fn save_open_group(&self, group: &DuplicateGroup) -> Result<bool> {
        let mut state = self.lock()?;
        if state.groups.get(&group.id).is_some_and(|g| !g.is_open()) {
            return Ok(false);
        }
        state.groups.insert(group.id.clone(), group.clone());
        Ok(true)
    }

    fn remove_open_group(&self, id: &GroupId) -> Result<bool> {
        let mut state = self.lock()?;
        if !state.groups.get(id).is_some_and(DuplicateGroup::is_open) {
            return Ok(false);
        }
        Ok(state.groups.remove(id).is_some())
    }

    fn set_group_status(&self, id: &GroupId, status: GroupStatus) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state.groups.get_mut(id).is_some_and(|group| {
            group.status = status;
            group.updated_at = Utc::now();
            true
        }))
    }

    fn get_records(&self, project_id: i64, ids: &[RecordId]) -> Result<Vec<Record>> {
        let state = self.lock()?;
        let mut records: Vec<Record> = ids
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records.dedup_by_key(|r| r.id);
        Ok(records)
    }

    fn update_master_fields(
        &self,
        master: RecordId,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let record = state
            .records
            .get_mut(&master)
            .ok_or_else(|| Error::not_found("record", master))?;
        record
            .fields
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn delete_members(&self, ids: &[RecordId]) -> Result<usize> {
        let mut state = self.lock()?;
        let deleted = ids
            .iter()
            .filter(|id| state.records.remove(*id).is_some())
            .count();
        strip_members(&mut state.groups, ids);
        Ok(deleted)
    }

    fn commit_merge(&self, merge: &MergeCommit) -> Result<()> {
        let mut state = self.lock()?;
        // Check everything first so a failure leaves the state untouched.
        match state.groups.get(&merge.group_id) {
            None => return Err(Error::not_found("group", &merge.group_id)),
            Some(group) if !group.is_open() => {
                return Err(Error::MergeConflict(format!(
                    "group {} is {}",
                    merge.group_id, group.status
                )));
            },
            Some(_) => {},
        }
        if !state.records.contains_key(&merge.master) {
            return Err(Error::not_found("record", merge.master));
        }

        if let Some(master) = state.records.get_mut(&merge.master) {
            master
                .fields
                .extend(merge.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        for id in &merge.deleted {
            state.records.remove(id);
        }
        strip_members(&mut state.groups, &merge.deleted);
        if let Some(group) = state.groups.get_mut(&merge.group_id) {
            group.status = GroupStatus::Resolved;
            group.updated_at = Utc::now();
        }
        Ok(())
    }
}
