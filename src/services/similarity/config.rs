//! Similarity scorer configuration.

use super::ComparisonCache;
use crate::models::SimilarityWeights;
use serde::{Deserialize, Serialize};

/// Configuration for the similarity scorer.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `DUPSCAN_CACHE_CAPACITY` | usize | `10000` | Comparison cache entries |
/// | `DUPSCAN_MAX_BATCH_PAIRS` | usize | `1000` | Pair limit per batch compare |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Maximum number of cached comparison results.
    pub cache_capacity: usize,

    /// Maximum number of pairs accepted by one batch compare call.
    pub max_batch_pairs: usize,

    /// Weights used when a caller does not supply any.
    pub default_weights: SimilarityWeights,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            cache_capacity: ComparisonCache::DEFAULT_CAPACITY,
            max_batch_pairs: 1000,
            default_weights: SimilarityWeights::default(),
        }
    }
}

impl SimilarityConfig {
    /// Creates a configuration from environment variables over defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DUPSCAN_CACHE_CAPACITY")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.cache_capacity = parsed.max(1);
        }
        if let Ok(v) = std::env::var("DUPSCAN_MAX_BATCH_PAIRS")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_batch_pairs = parsed.max(1);
        }
        self
    }

    /// Builder method to set the cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Builder method to set the batch pair limit.
    #[must_use]
    pub const fn with_max_batch_pairs(mut self, max: usize) -> Self {
        self.max_batch_pairs = max;
        self
    }

    /// Builder method to set the default weights.
    #[must_use]
    pub const fn with_default_weights(mut self, weights: SimilarityWeights) -> Self {
        self.default_weights = weights;
        self
    }
}
