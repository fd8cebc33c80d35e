//! Benchmarks for similarity scoring and detection scans.
//!
//! Benchmark targets:
//! - Single uncached comparison: <20µs
//! - Cached comparison: <2µs
//! - Batch of 1,000 pairs: <10ms
//! - Detection over 500 records with blocking: <500ms

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_possible_wrap)]

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use dupscan::services::similarity::{normalize, score_normalized};
use dupscan::services::{SimilarityConfig, SimilarityScorer, StringPair};
use dupscan::{
    AdmissionGate, DetectionConfig, DetectionRequest, DetectionTaskManager, EntityType,
    MemoryStore, Record, SimilarityWeights,
};

// ============================================================================
// Test Data
// ============================================================================

const PREFIXES: [&str; 4] = ["ООО", "АО", "ИП", "ЗАО"];
const STEMS: [&str; 8] = [
    "Ромашка",
    "Василёк",
    "Северный ветер",
    "Техснаб",
    "Альфа Трейд",
    "Стройинвест",
    "Горизонт",
    "Медторг",
];

/// Generates `n` company names; roughly every fourth is a near-duplicate.
fn names(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let prefix = PREFIXES[i % PREFIXES.len()];
            let stem = STEMS[(i / 4) % STEMS.len()];
            match i % 4 {
                0 => format!("{prefix} {stem} {}", i / 32),
                1 => format!("{stem} {prefix} {}", i / 32),
                2 => format!("{prefix} \"{stem}\" филиал {i}"),
                _ => format!("{stem}{i} {prefix}"),
            }
        })
        .collect()
}

fn scorer() -> SimilarityScorer {
    SimilarityScorer::new(SimilarityConfig::default()).unwrap()
}

// ============================================================================
// Single Comparison
// ============================================================================

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity_compare");
    let weights = SimilarityWeights::default();
    let a = normalize("ООО \"Северный ветер\" филиал 12");
    let b = normalize("Северный ветер ООО");

    group.bench_function("uncached", |bench| {
        bench.iter(|| score_normalized(black_box(&a), black_box(&b), &weights));
    });

    let scorer = scorer();
    scorer.compare(&a, &b, &weights).unwrap();
    group.bench_function("cached", |bench| {
        bench.iter(|| scorer.compare(black_box(&a), black_box(&b), &weights).unwrap());
    });

    let advanced = SimilarityWeights::advanced();
    group.bench_function("uncached_advanced", |bench| {
        bench.iter(|| score_normalized(black_box(&a), black_box(&b), &advanced));
    });

    group.finish();
}

// ============================================================================
// Batch Comparison
// ============================================================================

fn bench_batch_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity_batch");
    group.measurement_time(Duration::from_secs(10));
    let weights = SimilarityWeights::default();

    for size in [10usize, 100, 1000] {
        let names = names(size + 1);
        let pairs: Vec<StringPair> = names
            .windows(2)
            .map(|w| StringPair::new(w[0].clone(), w[1].clone()))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("pairs", size), &pairs, |bench, pairs| {
            // Fresh scorer per iteration so every pair misses the cache.
            bench.iter_batched(
                scorer,
                |scorer| black_box(scorer.batch_compare(pairs, &weights).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

// ============================================================================
// Detection Scan
// ============================================================================

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection_scan");
    group.measurement_time(Duration::from_secs(15));
    group.sample_size(10);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for (size, advanced) in [(100usize, false), (500, true)] {
        let records: Vec<Record> = names(size)
            .into_iter()
            .enumerate()
            .map(|(i, name)| Record::new(i as i64 + 1, 1, EntityType::Counterparty, name))
            .collect();
        let label = if advanced { "blocking" } else { "exhaustive" };

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new(label, size), &records, |bench, records| {
            bench.iter(|| {
                let store = Arc::new(MemoryStore::with_records(records.clone()));
                let manager = DetectionTaskManager::new(
                    store.clone(),
                    store,
                    scorer(),
                    AdmissionGate::disabled(),
                    DetectionConfig::default(),
                );
                let request = DetectionRequest::new(1, EntityType::Counterparty, 0.85)
                    .with_batch_size(100)
                    .with_advanced_weights(advanced);
                runtime.block_on(async {
                    let started = manager.start_detection(request).await.unwrap();
                    black_box(manager.wait_for(&started.task_id).await.unwrap())
                })
            });
        });
    }

    group.finish();
}

// ============================================================================
// Combined benchmark groups
// ============================================================================

criterion_group!(benches, bench_compare, bench_batch_compare, bench_detection);

criterion_main!(benches);
