//! Detection tasks and requests.

use super::{EntityType, GroupId, SimilarityWeights};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a detection task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task ID from the given string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh task ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("dup_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Task state machine: `pending → running → {completed | failed | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, scan not started yet.
    Pending,
    /// Scan in progress.
    Running,
    /// Scan finished.
    Completed,
    /// Scan stopped on an unrecoverable error.
    Failed,
    /// Scan stopped on request.
    Cancelled,
}

impl TaskStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress counters of a scan. Monotonically non-decreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Records read from the source.
    pub scanned: u64,
    /// Pairwise comparisons performed.
    pub compared: u64,
    /// Duplicate groups currently materialised.
    pub groups_found: u64,
    /// Candidates the scan expects to read, capped by the item limit.
    /// `None` until the source has been counted.
    #[serde(default)]
    pub total: Option<u64>,
}

/// A validated request to start a detection scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    /// Project to scan.
    pub project_id: i64,
    /// Entity type to scan.
    #[serde(default)]
    pub entity_type: EntityType,
    /// Minimum combined score for two records to be grouped, in `(0, 1]`.
    pub threshold: f64,
    /// Page size for candidate fetches. Defaults when unset.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Use the advanced weight set and token blocking.
    #[serde(default)]
    pub use_advanced_weights: bool,
    /// Explicit weights. Defaults when unset.
    #[serde(default)]
    pub weights: Option<SimilarityWeights>,
    /// Hard cap on records scanned. `None` or 0 scans everything.
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl DetectionRequest {
    /// Creates a request with default batch size, weights, and no item cap.
    #[must_use]
    pub const fn new(project_id: i64, entity_type: EntityType, threshold: f64) -> Self {
        Self {
            project_id,
            entity_type,
            threshold,
            batch_size: None,
            use_advanced_weights: false,
            weights: None,
            max_items: None,
        }
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Sets explicit weights.
    #[must_use]
    pub const fn with_weights(mut self, weights: SimilarityWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Enables advanced weighting.
    #[must_use]
    pub const fn with_advanced_weights(mut self, enabled: bool) -> Self {
        self.use_advanced_weights = enabled;
        self
    }

    /// Sets the item cap.
    #[must_use]
    pub const fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the threshold is outside `(0, 1]`
    /// or an explicit batch size is 0, and [`Error::InvalidWeights`] for
    /// explicit weights with no positive entry.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 1.0 {
            return Err(Error::InvalidInput(format!(
                "threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if self.batch_size == Some(0) {
            return Err(Error::InvalidInput(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if let Some(weights) = &self.weights {
            weights.validate()?;
        }
        Ok(())
    }

    /// Weights the scan will use: explicit weights, else the advanced set
    /// when requested, else `default`.
    #[must_use]
    pub fn effective_weights(&self, default: SimilarityWeights) -> SimilarityWeights {
        self.weights.unwrap_or_else(|| {
            if self.use_advanced_weights {
                SimilarityWeights::advanced()
            } else {
                default
            }
        })
    }

    /// Item cap with 0 treated as unlimited.
    #[must_use]
    pub fn effective_max_items(&self) -> Option<usize> {
        self.max_items.filter(|&m| m > 0)
    }
}

/// Snapshot of a detection task.
///
/// Mutated only by the owning background job; immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateTask {
    /// Task identifier.
    pub id: TaskId,
    /// Project being scanned.
    pub project_id: i64,
    /// Entity type being scanned.
    pub entity_type: EntityType,
    /// Requested threshold.
    pub threshold: f64,
    /// Effective weights.
    pub weights: SimilarityWeights,
    /// Effective batch size.
    pub batch_size: usize,
    /// Item cap, if any.
    pub max_items: Option<usize>,
    /// Whether advanced weighting and blocking are on.
    pub use_advanced_weights: bool,
    /// Current state.
    pub status: TaskStatus,
    /// Progress counters.
    pub progress: TaskProgress,
    /// Groups materialised by the scan, populated as it runs.
    pub result_groups: Vec<GroupId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time the scan started.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message for failed tasks.
    pub error: Option<String>,
}

impl DuplicateTask {
    /// Creates a pending task from a validated request.
    ///
    /// `default_weights` apply when the request names neither explicit nor
    /// advanced weights.
    #[must_use]
    pub fn pending(
        id: TaskId,
        request: &DetectionRequest,
        batch_size: usize,
        default_weights: SimilarityWeights,
    ) -> Self {
        Self {
            id,
            project_id: request.project_id,
            entity_type: request.entity_type,
            threshold: request.threshold,
            weights: request.effective_weights(default_weights),
            batch_size,
            max_items: request.effective_max_items(),
            use_advanced_weights: request.use_advanced_weights,
            status: TaskStatus::Pending,
            progress: TaskProgress::default(),
            result_groups: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Applies a state transition, stamping timestamps.
    ///
    /// Illegal transitions (including any out of a terminal state) are
    /// ignored and reported as `false`.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            },
            TaskStatus::Pending => {},
        }
        true
    }

    /// Replaces progress counters, never letting them decrease.
    pub fn advance(&mut self, progress: TaskProgress) {
        if self.status.is_terminal() {
            return;
        }
        self.progress.scanned = self.progress.scanned.max(progress.scanned);
        self.progress.compared = self.progress.compared.max(progress.compared);
        self.progress.groups_found = self.progress.groups_found.max(progress.groups_found);
        if progress.total.is_some() {
            self.progress.total = progress.total;
        }
    }
}

/// Response to an accepted detection request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionStarted {
    /// Allocated task ID.
    pub task_id: TaskId,
    /// Always `"started"`.
    pub status: String,
}

impl DetectionStarted {
    /// Builds the response for a started task.
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: "started".to_string(),
        }
    }
}
