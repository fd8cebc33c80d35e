//! Detection task lifecycle.

use super::DetectionConfig;
use super::scan::{Scan, ScanOutcome, ScanPlan, ScanReport};
use crate::models::{DetectionRequest, DetectionStarted, DuplicateTask, TaskId, TaskStatus};
use crate::services::similarity::SimilarityScorer;
use crate::services::{AdmissionGate, AdmissionPermit, CancellationFlag};
use crate::storage::{CandidateSource, DuplicateStore};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::watch;
use tracing::instrument;

/// Shared state of one task.
///
/// The snapshot is written only by the task's own job (and the manager
/// before the job starts); readers clone it.
struct TaskSlot {
    task: RwLock<DuplicateTask>,
    cancel: CancellationFlag,
    status: watch::Sender<TaskStatus>,
}

impl TaskSlot {
    fn new(task: DuplicateTask, cancel: CancellationFlag) -> Self {
        let (status, _) = watch::channel(task.status);
        Self {
            task: RwLock::new(task),
            cancel,
            status,
        }
    }

    // Poisoning only means a writer panicked mid-update; the snapshot
    // fields are still individually valid.
    fn read(&self) -> RwLockReadGuard<'_, DuplicateTask> {
        self.task
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DuplicateTask> {
        self.task
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn snapshot(&self) -> DuplicateTask {
        self.read().clone()
    }

    fn set_status(&self, next: TaskStatus, error: Option<String>) -> bool {
        let changed = {
            let mut task = self.write();
            let changed = task.transition(next);
            if changed && error.is_some() {
                task.error = error;
            }
            changed
        };
        if changed {
            self.status.send_replace(next);
        }
        changed
    }

    fn report(&self, report: &ScanReport) {
        let mut task = self.write();
        if task.status.is_terminal() {
            return;
        }
        task.advance(report.progress);
        task.result_groups.clone_from(&report.groups);
    }
}

/// Runs duplicate detection scans as background tasks.
///
/// Each accepted request holds one [`AdmissionGate`] slot for the lifetime
/// of its scan. Task snapshots stay queryable after the task ends.
pub struct DetectionTaskManager {
    source: Arc<dyn CandidateSource>,
    store: Arc<dyn DuplicateStore>,
    scorer: SimilarityScorer,
    gate: AdmissionGate,
    config: DetectionConfig,
    tasks: RwLock<HashMap<TaskId, Arc<TaskSlot>>>,
}

impl DetectionTaskManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(
        source: Arc<dyn CandidateSource>,
        store: Arc<dyn DuplicateStore>,
        scorer: SimilarityScorer,
        gate: AdmissionGate,
        config: DetectionConfig,
    ) -> Self {
        Self {
            source,
            store,
            scorer,
            gate,
            config,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the scorer shared by all scans.
    #[must_use]
    pub const fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Returns the admission gate.
    #[must_use]
    pub const fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Returns the configured defaults.
    #[must_use]
    pub const fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Starts a detection scan.
    ///
    /// Returns once the task is running; the scan itself proceeds in the
    /// background.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] / [`Error::InvalidWeights`] for a bad request
    /// - [`Error::QueueBusy`] if no admission slot freed in time
    ///
    /// No task is created in either case.
    pub async fn start_detection(&self, request: DetectionRequest) -> Result<DetectionStarted> {
        self.start_detection_with_cancel(request, CancellationFlag::new())
            .await
    }

    /// Starts a detection scan controlled by a caller-owned cancellation flag.
    ///
    /// Cancelling the flag while queued for admission abandons the request
    /// with [`Error::Cancelled`]; cancelling it later stops the scan between
    /// batches.
    ///
    /// # Errors
    ///
    /// See [`Self::start_detection`]; also [`Error::Cancelled`].
    #[instrument(
        skip_all,
        fields(
            project_id = request.project_id,
            entity_type = %request.entity_type,
            threshold = request.threshold,
        )
    )]
    pub async fn start_detection_with_cancel(
        &self,
        request: DetectionRequest,
        cancel: CancellationFlag,
    ) -> Result<DetectionStarted> {
        if let Err(e) = request.validate() {
            metrics::counter!("detection_task_rejected_total", "reason" => "invalid_input")
                .increment(1);
            return Err(e);
        }

        let permit = match self.gate.acquire_cancellable(&cancel).await {
            Ok(permit) => permit,
            Err(e) => {
                let reason = if matches!(e, Error::Cancelled) {
                    "cancelled"
                } else {
                    "queue_busy"
                };
                metrics::counter!("detection_task_rejected_total", "reason" => reason)
                    .increment(1);
                return Err(e);
            },
        };

        let batch_size = request.batch_size.unwrap_or(self.config.default_batch_size);
        let task = DuplicateTask::pending(
            TaskId::generate(),
            &request,
            batch_size.max(1),
            self.scorer.default_weights(),
        );
        let task_id = task.id.clone();
        let plan = ScanPlan {
            task_id: task_id.clone(),
            project_id: task.project_id,
            entity_type: task.entity_type,
            threshold: task.threshold,
            weights: task.weights,
            batch_size: task.batch_size,
            max_items: task.max_items,
            blocking: task.use_advanced_weights,
        };

        let slot = Arc::new(TaskSlot::new(task, cancel));
        self.tasks_write()?.insert(task_id.clone(), Arc::clone(&slot));
        slot.set_status(TaskStatus::Running, None);
        metrics::counter!("detection_task_started_total").increment(1);
        tracing::info!(task_id = %task_id, batch_size = plan.batch_size, "Detection task started");

        let job = ScanJob {
            slot,
            plan,
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            scorer: self.scorer.clone(),
        };
        job.spawn(permit);

        Ok(DetectionStarted::new(task_id))
    }

    /// Returns a snapshot of a task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown task ID.
    pub fn get_task_status(&self, task_id: &TaskId) -> Result<DuplicateTask> {
        Ok(self.slot(task_id)?.snapshot())
    }

    /// Requests cancellation of a task.
    ///
    /// Returns `false` when the task has already finished. The task becomes
    /// `cancelled` once the scan observes the request between batches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown task ID.
    #[instrument(skip(self, task_id), fields(task_id = %task_id))]
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<bool> {
        let slot = self.slot(task_id)?;
        if slot.read().status.is_terminal() {
            return Ok(false);
        }
        if slot.cancel.cancel() {
            metrics::counter!("detection_task_cancel_requested_total").increment(1);
            tracing::info!("Cancellation requested");
        }
        Ok(true)
    }

    /// Snapshots of every known task, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the task table lock is poisoned.
    pub fn list_tasks(&self) -> Result<Vec<DuplicateTask>> {
        let slots: Vec<Arc<TaskSlot>> = self.tasks_read()?.values().cloned().collect();
        let mut tasks: Vec<DuplicateTask> = slots.iter().map(|s| s.snapshot()).collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        Ok(tasks)
    }

    /// Waits until a task reaches a terminal state and returns its snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown task ID.
    pub async fn wait_for(&self, task_id: &TaskId) -> Result<DuplicateTask> {
        let slot = self.slot(task_id)?;
        let mut status = slot.status.subscribe();
        status
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|e| Error::operation("wait_for_task", e))?;
        Ok(slot.snapshot())
    }

    fn slot(&self, task_id: &TaskId) -> Result<Arc<TaskSlot>> {
        self.tasks_read()?
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::not_found("task", task_id))
    }

    fn tasks_read(&self) -> Result<RwLockReadGuard<'_, HashMap<TaskId, Arc<TaskSlot>>>> {
        self.tasks
            .read()
            .map_err(|e| Error::operation("read_task_table", e))
    }

    fn tasks_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TaskId, Arc<TaskSlot>>>> {
        self.tasks
            .write()
            .map_err(|e| Error::operation("write_task_table", e))
    }
}

/// Everything a background scan needs, owned.
struct ScanJob {
    slot: Arc<TaskSlot>,
    plan: ScanPlan,
    source: Arc<dyn CandidateSource>,
    store: Arc<dyn DuplicateStore>,
    scorer: SimilarityScorer,
}

impl ScanJob {
    fn spawn(self, permit: AdmissionPermit) {
        let slot = Arc::clone(&self.slot);
        let task_id = self.plan.task_id.clone();
        tokio::spawn(async move {
            let worker = tokio::task::spawn_blocking(move || self.run(permit));
            if let Err(e) = worker.await {
                // The permit was dropped with the worker's stack.
                tracing::error!(task_id = %task_id, error = %e, "Detection worker aborted");
                finish(&slot, TaskStatus::Failed, Some(format!("scan worker failed: {e}")));
            }
        });
    }

    fn run(self, permit: AdmissionPermit) {
        let start = Instant::now();
        metrics::gauge!("detection_task_running").increment(1.0);

        let scan = Scan::new(
            &self.plan,
            self.source.as_ref(),
            self.store.as_ref(),
            &self.scorer,
            &self.slot.cancel,
        );
        let result = scan.run(|report| self.slot.report(report));

        permit.release();
        metrics::gauge!("detection_task_running").decrement(1.0);
        metrics::histogram!("detection_task_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(ScanOutcome::Completed) => finish(&self.slot, TaskStatus::Completed, None),
            Ok(ScanOutcome::Cancelled) => finish(&self.slot, TaskStatus::Cancelled, None),
            Err(e) => {
                tracing::warn!(task_id = %self.plan.task_id, error = %e, "Detection task failed");
                finish(&self.slot, TaskStatus::Failed, Some(e.to_string()));
            },
        }
    }
}

fn finish(slot: &TaskSlot, status: TaskStatus, error: Option<String>) {
    if slot.set_status(status, error) {
        let snapshot = slot.snapshot();
        metrics::counter!("detection_task_finished_total", "status" => status.as_str())
            .increment(1);
        tracing::info!(
            task_id = %snapshot.id,
            status = status.as_str(),
            scanned = snapshot.progress.scanned,
            compared = snapshot.progress.compared,
            groups_found = snapshot.progress.groups_found,
            "Detection task finished"
        );
    }
}
