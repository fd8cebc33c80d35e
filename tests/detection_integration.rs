//! Detection task lifecycle integration tests.
//!
//! Drives `DetectionTaskManager` end to end:
//! - grouping of reordered business names
//! - empty projects, bad requests
//! - cancellation and data source failures keep persisted groups
//! - admission slots are released on every exit path
//! - groups reviewed while a scan runs stay reviewed
//! - `SQLite`-backed scans

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use dupscan::services::{CancellationFlag, DuplicateGroupRegistry, SimilarityConfig};
use dupscan::storage::{CandidateSource, DuplicateStore};
use dupscan::{
    AdmissionConfig, AdmissionGate, DetectionConfig, DetectionRequest, DetectionTaskManager,
    EntityType, Error, MemoryStore, Record, RecordId, SimilarityScorer, SqliteStore, TaskId,
    TaskStatus,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

fn counterparty(id: i64, name: &str) -> Record {
    Record::new(id, 1, EntityType::Counterparty, name)
}

fn manager_over(
    source: Arc<dyn CandidateSource>,
    store: Arc<dyn DuplicateStore>,
    gate: AdmissionGate,
) -> DetectionTaskManager {
    DetectionTaskManager::new(
        source,
        store,
        SimilarityScorer::new(SimilarityConfig::default()).unwrap(),
        gate,
        DetectionConfig::default(),
    )
}

fn memory_manager(store: &Arc<MemoryStore>) -> DetectionTaskManager {
    manager_over(
        store.clone(),
        store.clone(),
        AdmissionGate::new(AdmissionConfig::default()),
    )
}

async fn wait(manager: &DetectionTaskManager, id: &TaskId) -> dupscan::DuplicateTask {
    tokio::time::timeout(Duration::from_secs(10), manager.wait_for(id))
        .await
        .expect("task did not finish in time")
        .unwrap()
}

/// Cancels the given flag when asked for any page after the first.
struct CancelOnSecondPage {
    inner: Arc<MemoryStore>,
    cancel: CancellationFlag,
    fetches: AtomicUsize,
}

impl CandidateSource for CancelOnSecondPage {
    fn fetch_candidate_batch(
        &self,
        project_id: i64,
        entity_type: EntityType,
        offset: usize,
        limit: usize,
    ) -> dupscan::Result<Vec<Record>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if offset > 0 {
            self.cancel.cancel();
        }
        self.inner
            .fetch_candidate_batch(project_id, entity_type, offset, limit)
    }

    fn count_candidates(&self, project_id: i64, entity_type: EntityType) -> dupscan::Result<usize> {
        self.inner.count_candidates(project_id, entity_type)
    }
}

/// Fails every fetch past the first page.
struct FailsAfterFirstPage {
    inner: Arc<MemoryStore>,
}

impl CandidateSource for FailsAfterFirstPage {
    fn fetch_candidate_batch(
        &self,
        project_id: i64,
        entity_type: EntityType,
        offset: usize,
        limit: usize,
    ) -> dupscan::Result<Vec<Record>> {
        if offset > 0 {
            return Err(Error::DataSource("connection reset by peer".to_string()));
        }
        self.inner
            .fetch_candidate_batch(project_id, entity_type, offset, limit)
    }

    fn count_candidates(&self, project_id: i64, entity_type: EntityType) -> dupscan::Result<usize> {
        self.inner.count_candidates(project_id, entity_type)
    }
}

/// Blocks the first fetch until the test releases it.
struct HeldSource {
    release: Mutex<mpsc::Receiver<()>>,
}

impl CandidateSource for HeldSource {
    fn fetch_candidate_batch(
        &self,
        _project_id: i64,
        _entity_type: EntityType,
        _offset: usize,
        _limit: usize,
    ) -> dupscan::Result<Vec<Record>> {
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
        Ok(Vec::new())
    }

    fn count_candidates(
        &self,
        _project_id: i64,
        _entity_type: EntityType,
    ) -> dupscan::Result<usize> {
        Ok(0)
    }
}

/// What a reviewer does to every open group before the second page.
#[derive(Clone, Copy)]
enum Review {
    Dismiss,
    MergeFirstTwo,
}

/// Runs a review through the registry once, between the first two pages.
struct ReviewBeforeSecondPage {
    inner: Arc<MemoryStore>,
    registry: DuplicateGroupRegistry,
    review: Review,
    done: AtomicBool,
}

impl ReviewBeforeSecondPage {
    fn new(inner: &Arc<MemoryStore>, review: Review) -> Self {
        Self {
            inner: inner.clone(),
            registry: DuplicateGroupRegistry::new(inner.clone()),
            review,
            done: AtomicBool::new(false),
        }
    }
}

impl CandidateSource for ReviewBeforeSecondPage {
    fn fetch_candidate_batch(
        &self,
        project_id: i64,
        entity_type: EntityType,
        offset: usize,
        limit: usize,
    ) -> dupscan::Result<Vec<Record>> {
        if offset > 0 && !self.done.swap(true, Ordering::SeqCst) {
            for group in self.registry.list_groups(project_id, None)? {
                match self.review {
                    Review::Dismiss => self.registry.delete_group(project_id, &group.id)?,
                    Review::MergeFirstTwo => {
                        self.registry.merge_group(project_id, 1, &[2])?;
                    },
                }
            }
        }
        self.inner
            .fetch_candidate_batch(project_id, entity_type, offset, limit)
    }

    fn count_candidates(&self, project_id: i64, entity_type: EntityType) -> dupscan::Result<usize> {
        self.inner.count_candidates(project_id, entity_type)
    }
}

// ============================================================================
// Grouping
// ============================================================================

#[tokio::test]
async fn test_reordered_names_grouped_at_075() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "ООО Ромашка"),
        counterparty(2, "Ромашка ООО"),
        counterparty(3, "ИП Сидоров"),
    ]));
    let manager = memory_manager(&store);

    let started = manager
        .start_detection(DetectionRequest::new(1, EntityType::Counterparty, 0.75))
        .await
        .unwrap();
    assert_eq!(started.status, "started");
    assert!(started.task_id.as_str().starts_with("dup_"));

    let task = wait(&manager, &started.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress.total, Some(3));
    assert_eq!(task.progress.scanned, 3);
    assert_eq!(task.progress.compared, 3);
    assert_eq!(task.progress.groups_found, 1);
    assert_eq!(task.result_groups.len(), 1);

    let group = store.get_group(&task.result_groups[0]).unwrap().unwrap();
    assert_eq!(group.members, vec![RecordId::new(1), RecordId::new(2)]);
    assert!(group.max_score > 0.8);
    assert_eq!(group.task_id.as_deref(), Some(started.task_id.as_str()));
}

#[tokio::test]
async fn test_other_project_and_entity_ignored() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "Ромашка"),
        Record::new(2, 2, EntityType::Counterparty, "Ромашка"),
        Record::new(3, 1, EntityType::Nomenclature, "Ромашка"),
    ]));
    let manager = memory_manager(&store);

    let started = manager
        .start_detection(DetectionRequest::new(1, EntityType::Counterparty, 0.9))
        .await
        .unwrap();
    let task = wait(&manager, &started.task_id).await;
    assert_eq!(task.progress.scanned, 1);
    assert_eq!(task.progress.groups_found, 0);
}

#[tokio::test]
async fn test_zero_candidates_completes_with_no_groups() {
    let store = Arc::new(MemoryStore::new());
    let manager = memory_manager(&store);

    let started = manager
        .start_detection(DetectionRequest::new(99, EntityType::Counterparty, 0.8))
        .await
        .unwrap();
    let task = wait(&manager, &started.task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress.groups_found, 0);
    assert_eq!(task.progress.scanned, 0);
    assert_eq!(task.progress.total, Some(0));
    assert!(task.result_groups.is_empty());
    assert!(task.error.is_none());
}

#[tokio::test]
async fn test_advanced_weights_with_blocking() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "ООО Ромашка"),
        counterparty(2, "Зенит Спорт"),
        counterparty(3, "Ромашка ООО"),
        counterparty(4, "Спорт Зенит"),
    ]));
    let manager = memory_manager(&store);

    let request =
        DetectionRequest::new(1, EntityType::Counterparty, 0.8).with_advanced_weights(true);
    let started = manager.start_detection(request).await.unwrap();
    let task = wait(&manager, &started.task_id).await;

    assert!(task.use_advanced_weights);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress.groups_found, 2);
    // Blocking skips the unrelated pairs.
    assert!(task.progress.compared < 6);
}

#[tokio::test]
async fn test_transitive_matches_share_one_group() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "Ромашка"),
        counterparty(2, "Другое"),
        counterparty(3, "ромашка"),
        counterparty(4, "РОМАШКА"),
    ]));
    let manager = memory_manager(&store);

    let request = DetectionRequest::new(1, EntityType::Counterparty, 0.95).with_batch_size(1);
    let started = manager.start_detection(request).await.unwrap();
    let task = wait(&manager, &started.task_id).await;

    assert_eq!(task.result_groups.len(), 1);
    let group = store.get_group(&task.result_groups[0]).unwrap().unwrap();
    assert_eq!(
        group.members,
        vec![RecordId::new(1), RecordId::new(3), RecordId::new(4)]
    );
    assert_eq!(store.list_groups(1, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_max_items_caps_progress_total() {
    let store = Arc::new(MemoryStore::with_records(
        (1..=5).map(|i| counterparty(i, "Ромашка")),
    ));
    let manager = memory_manager(&store);

    let request = DetectionRequest::new(1, EntityType::Counterparty, 0.9).with_max_items(3);
    let started = manager.start_detection(request).await.unwrap();
    let task = wait(&manager, &started.task_id).await;

    assert_eq!(task.progress.total, Some(3));
    assert_eq!(task.progress.scanned, 3);
}

// ============================================================================
// Review during a scan
// ============================================================================

#[tokio::test]
async fn test_group_dismissed_mid_scan_stays_deleted() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "Ромашка"),
        counterparty(2, "Ромашка"),
        counterparty(3, "Ромашка"),
    ]));
    let source = Arc::new(ReviewBeforeSecondPage::new(&store, Review::Dismiss));
    let manager = manager_over(source, store.clone(), AdmissionGate::disabled());

    let request = DetectionRequest::new(1, EntityType::Counterparty, 0.9).with_batch_size(2);
    let started = manager.start_detection(request).await.unwrap();
    let task = wait(&manager, &started.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.result_groups.is_empty());

    let registry = DuplicateGroupRegistry::new(store.clone());
    assert!(registry.list_groups(1, None).unwrap().is_empty());
    let dismissed = registry
        .list_groups(1, Some(dupscan::GroupStatus::Deleted))
        .unwrap();
    assert_eq!(dismissed.len(), 1);
    assert_eq!(dismissed[0].members, vec![RecordId::new(1), RecordId::new(2)]);
}

#[tokio::test]
async fn test_merge_mid_scan_keeps_deleted_records_out() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "Ромашка"),
        counterparty(2, "Ромашка"),
        counterparty(3, "Ромашка"),
        counterparty(4, "Ромашка"),
    ]));
    let source = Arc::new(ReviewBeforeSecondPage::new(&store, Review::MergeFirstTwo));
    let manager = manager_over(source, store.clone(), AdmissionGate::disabled());

    let request = DetectionRequest::new(1, EntityType::Counterparty, 0.9).with_batch_size(2);
    let started = manager.start_detection(request).await.unwrap();
    let task = wait(&manager, &started.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    assert!(store.record(RecordId::new(2)).unwrap().is_none());
    let open = store.list_groups(1, Some(dupscan::GroupStatus::Open)).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].members, vec![RecordId::new(3), RecordId::new(4)]);
    assert_eq!(task.result_groups, vec![open[0].id.clone()]);

    let resolved = store
        .list_groups(1, Some(dupscan::GroupStatus::Resolved))
        .unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].members, vec![RecordId::new(1)]);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_invalid_requests_create_no_task() {
    let store = Arc::new(MemoryStore::new());
    let manager = memory_manager(&store);

    for threshold in [0.0, -0.1, 1.01] {
        let err = manager
            .start_detection(DetectionRequest::new(1, EntityType::Counterparty, threshold))
            .await
            .unwrap_err();
        assert!(err.is_invalid_input(), "threshold {threshold}: {err}");
    }

    let err = manager
        .start_detection(DetectionRequest::new(1, EntityType::Counterparty, 0.8).with_batch_size(0))
        .await
        .unwrap_err();
    assert!(err.is_invalid_input());

    let err = manager
        .start_detection(
            DetectionRequest::new(1, EntityType::Counterparty, 0.8)
                .with_weights(dupscan::SimilarityWeights::zero()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidWeights(_)));

    assert!(manager.list_tasks().unwrap().is_empty());
    assert_eq!(manager.gate().in_use(), 0);
}

// ============================================================================
// Cancellation and failure
// ============================================================================

#[tokio::test]
async fn test_cancel_mid_scan_keeps_groups() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "Ромашка"),
        counterparty(2, "Ромашка"),
        counterparty(3, "Альфа"),
        counterparty(4, "Бета"),
        counterparty(5, "Гамма"),
        counterparty(6, "Дельта"),
    ]));
    let cancel = CancellationFlag::new();
    let source = Arc::new(CancelOnSecondPage {
        inner: store.clone(),
        cancel: cancel.clone(),
        fetches: AtomicUsize::new(0),
    });
    let manager = manager_over(source.clone(), store.clone(), AdmissionGate::disabled());

    let request = DetectionRequest::new(1, EntityType::Counterparty, 0.9).with_batch_size(2);
    let started = manager
        .start_detection_with_cancel(request, cancel)
        .await
        .unwrap();
    let task = wait(&manager, &started.task_id).await;

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.progress.scanned, 4);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    assert!(task.completed_at.is_some());

    let registry = DuplicateGroupRegistry::new(store.clone());
    let groups = registry.list_groups(1, None).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members, vec![RecordId::new(1), RecordId::new(2)]);
}

#[tokio::test]
async fn test_data_source_error_fails_task_keeps_groups() {
    let store = Arc::new(MemoryStore::with_records([
        counterparty(1, "Ромашка"),
        counterparty(2, "Ромашка"),
        counterparty(3, "Ромашка"),
    ]));
    let source = Arc::new(FailsAfterFirstPage {
        inner: store.clone(),
    });
    let gate = AdmissionGate::new(AdmissionConfig::new().with_max_concurrent(1));
    let manager = manager_over(source, store.clone(), gate);

    let request = DetectionRequest::new(1, EntityType::Counterparty, 0.9).with_batch_size(2);
    let started = manager.start_detection(request).await.unwrap();
    let task = wait(&manager, &started.task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let error = task.error.as_deref().unwrap();
    assert!(error.contains("connection reset by peer"), "{error}");
    assert_eq!(task.result_groups.len(), 1);
    assert_eq!(store.list_groups(1, None).unwrap().len(), 1);
    assert_eq!(manager.gate().in_use(), 0);

    // Terminal snapshots are stable.
    assert!(!manager.cancel_task(&started.task_id).unwrap());
    assert_eq!(manager.get_task_status(&started.task_id).unwrap(), task);
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_queue_busy_when_gate_full() {
    let (release, held) = mpsc::channel();
    let source = Arc::new(HeldSource {
        release: Mutex::new(held),
    });
    let store = Arc::new(MemoryStore::new());
    let gate = AdmissionGate::new(
        AdmissionConfig::new()
            .with_max_concurrent(1)
            .with_acquire_timeout_ms(50),
    );
    let manager = manager_over(source, store, gate);

    let first = manager
        .start_detection(DetectionRequest::new(1, EntityType::Counterparty, 0.8))
        .await
        .unwrap();
    assert_eq!(manager.gate().in_use(), 1);

    let err = manager
        .start_detection(DetectionRequest::new(2, EntityType::Counterparty, 0.8))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueueBusy { .. }));
    assert_eq!(manager.list_tasks().unwrap().len(), 1);

    release.send(()).unwrap();
    let task = wait(&manager, &first.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(manager.gate().in_use(), 0);

    // The freed slot admits the next request.
    let second = manager
        .start_detection(DetectionRequest::new(2, EntityType::Counterparty, 0.8))
        .await;
    release.send(()).ok();
    let second = second.unwrap();
    wait(&manager, &second.task_id).await;
    assert_eq!(manager.list_tasks().unwrap().len(), 2);
}

// ============================================================================
// SQLite
// ============================================================================

#[tokio::test]
async fn test_sqlite_scan_then_merge() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("dupscan.db")).unwrap());
    store
        .upsert_records(&[
            counterparty(10, "ООО Ромашка").with_field("inn", "7701"),
            counterparty(11, "Ромашка ООО").with_field("phone", "+7 495 000"),
            counterparty(12, "ооо ромашка").with_field("email", "info@romashka.ru"),
            counterparty(13, "Северсталь"),
        ])
        .unwrap();
    let manager = manager_over(
        store.clone(),
        store.clone(),
        AdmissionGate::new(AdmissionConfig::default()),
    );

    let started = manager
        .start_detection(
            DetectionRequest::new(1, EntityType::Counterparty, 0.75).with_batch_size(2),
        )
        .await
        .unwrap();
    let task = wait(&manager, &started.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result_groups.len(), 1);

    let registry = DuplicateGroupRegistry::new(store.clone());
    let groups = registry.list_groups(1, None).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members.len(), 3);

    let master = registry.merge_group(1, 10, &[11, 12]).unwrap();
    assert_eq!(master.fields.get("phone").map(String::as_str), Some("+7 495 000"));
    assert_eq!(
        master.fields.get("email").map(String::as_str),
        Some("info@romashka.ru")
    );
    assert!(store.record(RecordId::new(11)).unwrap().is_none());
    assert!(registry.list_groups(1, None).unwrap().is_empty());
}
