//! `DuplicateGroupRegistry` integration tests.
//!
//! Runs the review operations against both storage backends:
//! - merge fills missing master fields and deletes absorbed records
//! - resolve and delete leave records untouched
//! - operations on closed groups conflict
//! - concurrent merges of one group are serialized

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use dupscan::storage::DuplicateStore;
use dupscan::{
    DuplicateGroup, DuplicateGroupRegistry, EntityType, Error, GroupId, GroupStatus, MemoryStore,
    Record, RecordId, SqliteStore,
};
use std::sync::Arc;
use tempfile::TempDir;
use test_case::test_case;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    Sqlite,
}

fn records() -> Vec<Record> {
    vec![
        Record::new(10, 1, EntityType::Counterparty, "ООО Ромашка").with_field("inn", "7701"),
        Record::new(11, 1, EntityType::Counterparty, "Ромашка ООО")
            .with_field("inn", "9999")
            .with_field("phone", "+7 495 111"),
        Record::new(12, 1, EntityType::Counterparty, "Ромашка")
            .with_field("phone", "+7 495 222")
            .with_field("address", "Москва"),
    ]
}

/// Builds a store seeded with records 10-12 and one open group over them.
fn seeded(backend: Backend) -> (Arc<dyn DuplicateStore>, GroupId, Option<TempDir>) {
    let records = records();
    let (store, dir): (Arc<dyn DuplicateStore>, Option<TempDir>) = match backend {
        Backend::Memory => (Arc::new(MemoryStore::with_records(records.clone())), None),
        Backend::Sqlite => {
            let dir = TempDir::new().unwrap();
            let store = SqliteStore::new(dir.path().join("groups.db")).unwrap();
            store.upsert_records(&records).unwrap();
            (Arc::new(store), Some(dir))
        },
    };
    let group = DuplicateGroup::from_records(GroupId::generate(), &records, 0.93).unwrap();
    store.save_group(&group).unwrap();
    (store, group.id, dir)
}

// ============================================================================
// Merge
// ============================================================================

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
fn test_merge_master_absorbs_missing_fields(backend: Backend) {
    let (store, group_id, _dir) = seeded(backend);
    let registry = DuplicateGroupRegistry::new(store.clone());

    let master = registry.merge_group(1, 10, &[11, 12]).unwrap();

    assert_eq!(master.id, RecordId::new(10));
    // Existing value kept, missing ones filled from the lowest ID first.
    assert_eq!(master.fields.get("inn").map(String::as_str), Some("7701"));
    assert_eq!(master.fields.get("phone").map(String::as_str), Some("+7 495 111"));
    assert_eq!(master.fields.get("address").map(String::as_str), Some("Москва"));

    let remaining = store
        .get_records(1, &[RecordId::new(10), RecordId::new(11), RecordId::new(12)])
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, RecordId::new(10));

    let group = registry.get_group(&group_id).unwrap();
    assert_eq!(group.status, GroupStatus::Resolved);
    assert!(registry.list_groups(1, None).unwrap().is_empty());
    assert_eq!(registry.list_groups(1, Some(GroupStatus::Resolved)).unwrap().len(), 1);
}

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
fn test_merge_subset_of_group(backend: Backend) {
    let (store, _, _dir) = seeded(backend);
    let registry = DuplicateGroupRegistry::new(store.clone());

    let master = registry.merge_group(1, 12, &[11]).unwrap();
    assert_eq!(master.fields.get("inn").map(String::as_str), Some("9999"));
    assert_eq!(master.fields.get("phone").map(String::as_str), Some("+7 495 222"));
    assert_eq!(
        store
            .get_records(1, &[RecordId::new(10)])
            .unwrap()
            .len(),
        1
    );
}

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
fn test_merge_after_resolve_conflicts(backend: Backend) {
    let (store, group_id, _dir) = seeded(backend);
    let registry = DuplicateGroupRegistry::new(store.clone());

    let master = registry.resolve_group(1, &group_id).unwrap();
    // Record 11 has the most populated fields.
    assert_eq!(master.id, RecordId::new(11));

    let err = registry.merge_group(1, 10, &[11, 12]).unwrap_err();
    assert!(matches!(err, Error::MergeConflict(_)), "{err}");
    assert_eq!(
        store
            .get_records(1, &[RecordId::new(10), RecordId::new(11), RecordId::new(12)])
            .unwrap()
            .len(),
        3
    );
}

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
fn test_merge_unknown_records(backend: Backend) {
    let (store, _, _dir) = seeded(backend);
    let registry = DuplicateGroupRegistry::new(store);

    assert!(matches!(
        registry.merge_group(1, 10, &[404]),
        Err(Error::NotFound { kind: "group", .. })
    ));
    assert!(matches!(
        registry.merge_group(2, 10, &[11]),
        Err(Error::NotFound { .. })
    ));
}

// ============================================================================
// Resolve / delete
// ============================================================================

#[test_case(Backend::Memory ; "memory")]
#[test_case(Backend::Sqlite ; "sqlite")]
fn test_delete_dismisses_without_touching_records(backend: Backend) {
    let (store, group_id, _dir) = seeded(backend);
    let registry = DuplicateGroupRegistry::new(store.clone());

    registry.delete_group(1, &group_id).unwrap();

    assert!(registry.list_groups(1, None).unwrap().is_empty());
    assert_eq!(registry.get_group(&group_id).unwrap().status, GroupStatus::Deleted);
    assert_eq!(
        store
            .get_records(1, &[RecordId::new(10), RecordId::new(11), RecordId::new(12)])
            .unwrap()
            .len(),
        3
    );
    assert!(matches!(
        registry.delete_group(1, &group_id),
        Err(Error::MergeConflict(_))
    ));
}

#[test]
fn test_unknown_group() {
    let registry = DuplicateGroupRegistry::new(Arc::new(MemoryStore::new()));
    let id = GroupId::new("grp_missing");
    assert!(matches!(
        registry.get_group(&id),
        Err(Error::NotFound { kind: "group", .. })
    ));
    assert!(matches!(
        registry.resolve_group(1, &id),
        Err(Error::NotFound { .. })
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_merges_apply_once() {
    let (store, _, _dir) = seeded(Backend::Memory);
    let registry = Arc::new(DuplicateGroupRegistry::new(store));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.merge_group(1, 10, &[11, 12]))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert!(
            matches!(err, Error::MergeConflict(_) | Error::NotFound { .. }),
            "{err}"
        );
    }
}
