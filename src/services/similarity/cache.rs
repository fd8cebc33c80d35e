//! Pairwise comparison cache.
//!
//! Memoizes scorer results keyed by a fingerprint of the canonical (ordered)
//! pair of normalized strings plus the weights signature. The cache is a pure
//! performance optimization: it is never persisted and an unusable cache
//! (poisoned lock) behaves as empty.

use crate::models::{SimilarityResult, SimilarityWeights};
use crate::{Error, Result};
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Order-independent fingerprint of `(a, b, weights)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for two normalized strings and a weight set.
    ///
    /// `CacheKey::new(a, b, w) == CacheKey::new(b, a, w)`.
    #[must_use]
    pub fn new(a: &str, b: &str, weights: &SimilarityWeights) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut hasher = Sha256::new();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for part in [first, second, weights.signature().as_str()] {
            hasher.update(part.len().to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Returns the hex fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries currently stored.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

/// Bounded LRU cache of similarity results.
///
/// Safe to share between concurrent batch comparisons.
#[derive(Debug)]
pub struct ComparisonCache {
    entries: Mutex<LruCache<CacheKey, SimilarityResult>>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ComparisonCache {
    /// Default number of entries.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::InvalidInput("cache capacity must be > 0".to_string()))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Looks up a result, refreshing its recency on hit.
    pub fn get(&self, key: &CacheKey) -> Option<SimilarityResult> {
        let found = self
            .entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.get(key).cloned());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("comparison_cache_hits_total").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("comparison_cache_misses_total").increment(1);
        }
        found
    }

    /// Stores a result, evicting the least recently used entry when full.
    #[allow(clippy::cast_precision_loss)]
    pub fn put(&self, key: CacheKey, result: SimilarityResult) {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::warn!("Comparison cache lock poisoned, skipping insert");
            return;
        };
        let evicts = !entries.contains(&key) && entries.len() == self.capacity.get();
        entries.push(key, result);
        if evicts {
            metrics::counter!("comparison_cache_evictions_total").increment(1);
        }
        metrics::gauge!("comparison_cache_size").set(entries.len() as f64);
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity(),
        }
    }

    /// Drops every entry and returns how many there were.
    ///
    /// Hit/miss counters are kept.
    pub fn clear(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let previous = entries.len();
        entries.clear();
        metrics::gauge!("comparison_cache_size").set(0.0);
        previous
    }
}
