//! Weighted hybrid similarity scorer.

use super::algorithms::{
    jaro_winkler, lcs_ratio, ngram_similarity, phonetic_similarity, token_jaccard,
};
use super::normalize::{normalize, token_sorted};
use super::{CacheKey, CacheStats, ComparisonCache, SimilarityConfig};
use crate::models::{Algorithm, SimilarityResult, SimilarityWeights};
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Two strings to compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringPair {
    /// Left-hand string.
    pub left: String,
    /// Right-hand string.
    pub right: String,
}

impl StringPair {
    /// Creates a pair.
    #[must_use]
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

impl<A: Into<String>, B: Into<String>> From<(A, B)> for StringPair {
    fn from((left, right): (A, B)) -> Self {
        Self::new(left, right)
    }
}

/// Computes combined similarity scores, memoized through a shared cache.
///
/// # Scoring
///
/// Both inputs are normalized, then put in lexicographic order so the result
/// is symmetric. Every algorithm with a positive weight yields a sub-score
/// in `[0, 1]`; the combined score is `Σ(weight · sub) / Σ(weight)`.
///
/// Character-level algorithms (Jaro-Winkler, LCS, n-gram) also score the
/// token-sorted forms and keep the better result, so word order in business
/// names ("ООО Ромашка" / "Ромашка ООО") does not count as a difference.
///
/// # Example
///
/// ```rust
/// use dupscan::services::similarity::{SimilarityConfig, SimilarityScorer};
/// use dupscan::SimilarityWeights;
///
/// let scorer = SimilarityScorer::new(SimilarityConfig::default()).unwrap();
/// let result = scorer
///     .compare("ООО Ромашка", "Ромашка ООО", &SimilarityWeights::default())
///     .unwrap();
/// assert!(result.score > 0.8);
/// ```
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    cache: Arc<ComparisonCache>,
    config: SimilarityConfig,
}

impl SimilarityScorer {
    /// Creates a scorer with its own cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the cache capacity is 0.
    pub fn new(config: SimilarityConfig) -> Result<Self> {
        let cache = Arc::new(ComparisonCache::new(config.cache_capacity)?);
        Ok(Self { cache, config })
    }

    /// Creates a scorer over an existing shared cache.
    #[must_use]
    pub const fn with_cache(cache: Arc<ComparisonCache>, config: SimilarityConfig) -> Self {
        Self { cache, config }
    }

    /// Returns the shared cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ComparisonCache> {
        &self.cache
    }

    /// Weights applied when a caller supplies none.
    #[must_use]
    pub const fn default_weights(&self) -> SimilarityWeights {
        self.config.default_weights
    }

    /// Largest pair list accepted by [`Self::batch_compare`].
    #[must_use]
    pub const fn max_batch_pairs(&self) -> usize {
        self.config.max_batch_pairs
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Empties the cache, returning the number of dropped entries.
    pub fn clear_cache(&self) -> usize {
        let cleared = self.cache.clear();
        tracing::info!(cleared, "Comparison cache cleared");
        cleared
    }

    /// Compares two strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWeights`] if no weight is positive.
    #[instrument(skip_all, fields(a_len = a.len(), b_len = b.len()))]
    pub fn compare(
        &self,
        a: &str,
        b: &str,
        weights: &SimilarityWeights,
    ) -> Result<SimilarityResult> {
        weights.validate()?;
        Ok(self.compare_validated(a, b, weights))
    }

    /// Compares many pairs in parallel with the same weights.
    ///
    /// Returns the results in input order and the cache size afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty list or one longer than
    /// the configured maximum, and [`Error::InvalidWeights`] if no weight is
    /// positive.
    #[instrument(skip_all, fields(pairs = pairs.len()))]
    pub fn batch_compare(
        &self,
        pairs: &[StringPair],
        weights: &SimilarityWeights,
    ) -> Result<(Vec<SimilarityResult>, usize)> {
        if pairs.is_empty() {
            return Err(Error::InvalidInput("pair list is empty".to_string()));
        }
        if pairs.len() > self.config.max_batch_pairs {
            return Err(Error::InvalidInput(format!(
                "too many pairs: {} (max {})",
                pairs.len(),
                self.config.max_batch_pairs
            )));
        }
        weights.validate()?;

        let start = Instant::now();
        let results: Vec<SimilarityResult> = pairs
            .par_iter()
            .map(|pair| self.compare_validated(&pair.left, &pair.right, weights))
            .collect();

        metrics::histogram!("similarity_batch_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok((results, self.cache.len()))
    }

    fn compare_validated(&self, a: &str, b: &str, weights: &SimilarityWeights) -> SimilarityResult {
        let a = normalize(a);
        let b = normalize(b);
        let (first, second) = if a <= b { (&a, &b) } else { (&b, &a) };

        let key = CacheKey::new(first, second, weights);
        if let Some(hit) = self.cache.get(&key) {
            metrics::counter!("similarity_comparisons_total", "cached" => "true").increment(1);
            return hit;
        }

        let result = score_normalized(first, second, weights);
        metrics::counter!("similarity_comparisons_total", "cached" => "false").increment(1);
        self.cache.put(key, result.clone());
        result
    }
}

/// Scores two already-normalized strings without caching.
///
/// Callers must pass validated weights; the pair should already be in
/// canonical order when symmetry matters.
#[must_use]
pub fn score_normalized(a: &str, b: &str, weights: &SimilarityWeights) -> SimilarityResult {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return SimilarityResult::identical_empty(weights),
        (true, false) | (false, true) => return SimilarityResult::one_empty(weights),
        (false, false) => {},
    }

    let a_sorted = token_sorted(a);
    let b_sorted = token_sorted(b);
    let best_of = |f: fn(&str, &str) -> f64| f(a, b).max(f(&a_sorted, &b_sorted));

    let mut breakdown = BTreeMap::new();
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (algorithm, weight) in weights.normalized() {
        let sub = match algorithm {
            Algorithm::JaroWinkler => best_of(jaro_winkler),
            Algorithm::Lcs => best_of(lcs_ratio),
            Algorithm::Ngram => best_of(|x, y| ngram_similarity(x, y, 2)),
            Algorithm::Phonetic => phonetic_similarity(a, b),
            Algorithm::Jaccard => token_jaccard(a, b),
        }
        .clamp(0.0, 1.0);
        breakdown.insert(algorithm, sub);
        weighted += weight * sub;
        total += weight;
    }

    let score = if total > 0.0 {
        (weighted / total).clamp(0.0, 1.0)
    } else {
        0.0
    };
    SimilarityResult {
        score,
        breakdown,
        identical_empty: false,
    }
}
