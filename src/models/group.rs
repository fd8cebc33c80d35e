//! Duplicate groups produced by detection scans.
//!
//! A group clusters record IDs whose pairwise combined similarity reached the
//! detection threshold. Groups are created by a scan, then either merged into
//! their master record, resolved as intentionally distinct, or deleted as a
//! false positive.

use super::{EntityType, Record, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Creates a group ID from the given string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a new random group ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("grp_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Awaiting review.
    #[default]
    Open,
    /// Merged, or confirmed as intentionally distinct.
    Resolved,
    /// Dismissed as a false positive.
    Deleted,
}

impl GroupStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Deleted => "deleted",
        }
    }

    /// Parses a status string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "resolved" | "merged" => Some(Self::Resolved),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GroupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown group status: {s}"))
    }
}

/// A cluster of records suspected to describe the same entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Group identifier.
    pub id: GroupId,
    /// Project the members belong to.
    pub project_id: i64,
    /// Entity type of the members.
    pub entity_type: EntityType,
    /// Member record IDs, ascending.
    pub members: Vec<RecordId>,
    /// Member suggested to survive a merge.
    pub suggested_master: RecordId,
    /// Highest pairwise score observed inside the group.
    pub max_score: f64,
    /// Lifecycle state.
    pub status: GroupStatus,
    /// Detection task that produced the group, if any.
    pub task_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl DuplicateGroup {
    /// Creates an open group from its member records.
    ///
    /// Returns `None` when fewer than two distinct records are given.
    #[must_use]
    pub fn from_records(id: GroupId, records: &[Record], max_score: f64) -> Option<Self> {
        let master = select_master(records)?;
        let mut members: Vec<RecordId> = records.iter().map(|r| r.id).collect();
        members.sort_unstable();
        members.dedup();
        if members.len() < 2 {
            return None;
        }
        let now = Utc::now();
        Some(Self {
            id,
            project_id: master.project_id,
            entity_type: master.entity_type,
            members,
            suggested_master: master.id,
            max_score,
            status: GroupStatus::Open,
            task_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Tags the group with the task that produced it.
    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Returns `true` when the record is a member.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.members.binary_search(&id).is_ok()
    }

    /// Returns `true` while the group awaits review.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == GroupStatus::Open
    }
}

/// Picks the most complete record; ties go to the lowest record ID.
#[must_use]
pub fn select_master(records: &[Record]) -> Option<&Record> {
    records.iter().min_by(|a, b| {
        b.completeness()
            .cmp(&a.completeness())
            .then_with(|| a.id.cmp(&b.id))
    })
}
