//! Fuzzy string similarity.
//!
//! Scores two business names with a weighted blend of independent
//! algorithms and memoizes results in a bounded LRU cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SimilarityScorer                        │
//! │  normalize ─► canonical order ─► CacheKey (sha256)           │
//! │                                     │                        │
//! │                     hit ◄── ComparisonCache (LRU) ──► miss   │
//! │                                                      │       │
//! │  ┌────────────┐ ┌─────┐ ┌──────────┐ ┌───────┐ ┌─────────┐   │
//! │  │ Jaro-      │ │ LCS │ │ Phonetic │ │ Ngram │ │ Jaccard │   │
//! │  │ Winkler    │ │     │ │ Soundex  │ │       │ │ tokens  │   │
//! │  └────────────┘ └─────┘ └──────────┘ └───────┘ └─────────┘   │
//! │                 Σ(weight · sub) / Σ(weight)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod algorithms;
mod cache;
mod config;
mod normalize;
mod phonetic;
mod scorer;

pub use algorithms::{
    jaro_winkler, lcs_ratio, ngram_similarity, phonetic_codes, phonetic_similarity, token_jaccard,
};
pub use cache::{CacheKey, CacheStats, ComparisonCache};
pub use config::SimilarityConfig;
pub use normalize::{normalize, token_sorted, tokens};
pub use phonetic::soundex;
pub use scorer::{SimilarityScorer, StringPair, score_normalized};
