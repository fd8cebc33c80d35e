//! Property-based tests for the similarity scorer.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Scores stay within `[0.0, 1.0]`, even for weights near `f64::MAX`
//! - Comparison is symmetric
//! - Non-empty text is fully similar to itself
//! - Normalization is idempotent
//! - The comparison cache never exceeds its capacity

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use dupscan::services::similarity::{normalize, token_sorted};
use dupscan::services::{SimilarityConfig, SimilarityScorer, StringPair};
use dupscan::{Algorithm, SimilarityWeights};
use proptest::prelude::*;

const EPS: f64 = 1e-9;

/// Latin, Cyrillic, digits, punctuation and irregular whitespace.
fn business_name() -> impl Strategy<Value = String> {
    "[a-zA-Zа-яА-ЯёЁ0-9 .,\"-]{0,40}"
}

/// A single weight anywhere from tiny to `f64::MAX`, or zero.
fn weight() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        0.0f64..1.0,
        (0.0f64..1.0, -300i32..=308).prop_map(|(m, e)| m * 10f64.powi(e)),
        Just(f64::MAX),
    ]
}

fn weights() -> impl Strategy<Value = SimilarityWeights> {
    prop::array::uniform5(weight())
        .prop_filter("at least one positive weight", |w| w.iter().any(|x| *x > 0.0))
        .prop_map(|w| {
            Algorithm::ALL
                .iter()
                .zip(w)
                .fold(SimilarityWeights::zero(), |acc, (algorithm, weight)| {
                    acc.with(*algorithm, weight)
                })
        })
}

fn scorer(capacity: usize) -> SimilarityScorer {
    SimilarityScorer::new(SimilarityConfig::default().with_cache_capacity(capacity)).unwrap()
}

// ============================================================================
// Scorer Properties
// ============================================================================

proptest! {
    /// Property: the combined score and every sub-score lie in `[0, 1]`.
    #[test]
    fn prop_score_bounded(a in business_name(), b in business_name(), w in weights()) {
        let result = scorer(64).compare(&a, &b, &w).unwrap();
        prop_assert!(result.score.is_finite());
        prop_assert!((0.0..=1.0).contains(&result.score), "score {}", result.score);
        for sub in result.breakdown.values() {
            prop_assert!((0.0..=1.0).contains(sub));
        }
    }

    /// Property: `compare(a, b) == compare(b, a)`.
    #[test]
    fn prop_compare_symmetric(a in business_name(), b in business_name(), w in weights()) {
        // Separate scorers so the second call cannot be a cache hit.
        let forward = scorer(64).compare(&a, &b, &w).unwrap();
        let backward = scorer(64).compare(&b, &a, &w).unwrap();
        prop_assert!((forward.score - backward.score).abs() < EPS);
        prop_assert_eq!(forward.breakdown.len(), backward.breakdown.len());
    }

    /// Property: non-empty text compared with itself scores 1.0.
    #[test]
    fn prop_self_similarity(a in "[a-zа-я0-9]{1,10}( [a-zа-я0-9]{1,10}){0,3}", w in weights()) {
        let result = scorer(64).compare(&a, &a, &w).unwrap();
        prop_assert!((result.score - 1.0).abs() < EPS, "score {}", result.score);
        prop_assert!(!result.identical_empty);
    }

    /// Property: case and whitespace do not change the score.
    #[test]
    fn prop_case_and_spacing_insensitive(a in "[a-z]{1,8}( [a-z]{1,8}){0,3}", b in business_name()) {
        let noisy = format!("  {}  ", a.to_uppercase().replace(' ', "   "));
        let w = SimilarityWeights::default();
        let clean = scorer(64).compare(&a, &b, &w).unwrap();
        let dirty = scorer(64).compare(&noisy, &b, &w).unwrap();
        prop_assert!((clean.score - dirty.score).abs() < EPS);
    }

    /// Property: batch results match single comparisons in input order.
    #[test]
    fn prop_batch_matches_single(names in prop::collection::vec(business_name(), 2..12)) {
        let scorer = scorer(256);
        let w = SimilarityWeights::advanced();
        let pairs: Vec<StringPair> = names
            .windows(2)
            .map(|p| StringPair::new(p[0].clone(), p[1].clone()))
            .collect();

        let (results, _) = scorer.batch_compare(&pairs, &w).unwrap();
        prop_assert_eq!(results.len(), pairs.len());
        for (pair, result) in pairs.iter().zip(&results) {
            let single = scorer.compare(&pair.left, &pair.right, &w).unwrap();
            prop_assert!((single.score - result.score).abs() < EPS);
        }
    }
}

// ============================================================================
// Normalization and Cache Properties
// ============================================================================

proptest! {
    /// Property: normalizing twice equals normalizing once.
    #[test]
    fn prop_normalize_idempotent(s in "\\PC{0,60}") {
        let once = normalize(&s);
        prop_assert_eq!(normalize(&once), once.clone());
        prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        prop_assert!(!once.contains("  "));
    }

    /// Property: token sorting is order-insensitive.
    #[test]
    fn prop_token_sorted_order_insensitive(tokens in prop::collection::vec("[a-z]{1,6}", 1..6)) {
        let forward = tokens.join(" ");
        let reversed: Vec<_> = tokens.iter().rev().cloned().collect();
        prop_assert_eq!(token_sorted(&forward), token_sorted(&reversed.join(" ")));
    }

    /// Property: the cache never holds more than its capacity.
    #[test]
    fn prop_cache_bounded(
        capacity in 1usize..16,
        names in prop::collection::vec("[a-z]{1,6}", 2..40),
    ) {
        let scorer = scorer(capacity);
        let w = SimilarityWeights::default();
        let pairs: Vec<StringPair> = names
            .windows(2)
            .map(|p| StringPair::new(p[0].clone(), p[1].clone()))
            .collect();

        let (_, cache_size) = scorer.batch_compare(&pairs, &w).unwrap();
        prop_assert!(cache_size <= capacity);
        prop_assert!(scorer.cache().len() <= capacity);
    }
}
