//! Similarity weights and scoring results.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A string similarity algorithm recognised by the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Jaro-Winkler edit similarity.
    JaroWinkler,
    /// Longest common subsequence ratio.
    Lcs,
    /// Phonetic code match.
    Phonetic,
    /// Character bigram overlap.
    Ngram,
    /// Token-set Jaccard index.
    Jaccard,
}

impl Algorithm {
    /// All algorithms in evaluation order.
    pub const ALL: [Self; 5] = [
        Self::JaroWinkler,
        Self::Lcs,
        Self::Phonetic,
        Self::Ngram,
        Self::Jaccard,
    ];

    /// Returns the algorithm name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::JaroWinkler => "jaro_winkler",
            Self::Lcs => "lcs",
            Self::Phonetic => "phonetic",
            Self::Ngram => "ngram",
            Self::Jaccard => "jaccard",
        }
    }

    /// Parses an algorithm name. Accepts short aliases (`jw`, `levenshtein`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jaro_winkler" | "jaro-winkler" | "jw" | "levenshtein" | "edit" => {
                Some(Self::JaroWinkler)
            },
            "lcs" => Some(Self::Lcs),
            "phonetic" | "soundex" => Some(Self::Phonetic),
            "ngram" | "n-gram" | "bigram" => Some(Self::Ngram),
            "jaccard" | "token_set" => Some(Self::Jaccard),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-negative weight per similarity algorithm.
///
/// Weights need not sum to 1: the combined score is normalised by the sum of
/// the weights actually applied. At least one weight must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    /// Weight for Jaro-Winkler.
    pub jaro_winkler: f64,
    /// Weight for the LCS ratio.
    pub lcs: f64,
    /// Weight for phonetic code match.
    pub phonetic: f64,
    /// Weight for bigram overlap.
    pub ngram: f64,
    /// Weight for token-set Jaccard.
    pub jaccard: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            jaro_winkler: 0.3,
            lcs: 0.2,
            phonetic: 0.2,
            ngram: 0.2,
            jaccard: 0.1,
        }
    }
}

impl SimilarityWeights {
    /// Weights with every algorithm disabled. Use the builder to enable some.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            jaro_winkler: 0.0,
            lcs: 0.0,
            phonetic: 0.0,
            ngram: 0.0,
            jaccard: 0.0,
        }
    }

    /// Weight set tuned for large nomenclature scans.
    ///
    /// Leans on token overlap, which tolerates reordered descriptions.
    #[must_use]
    pub const fn advanced() -> Self {
        Self {
            jaro_winkler: 0.35,
            lcs: 0.15,
            phonetic: 0.15,
            ngram: 0.2,
            jaccard: 0.15,
        }
    }

    /// Returns the weight for an algorithm.
    #[must_use]
    pub const fn get(&self, algorithm: Algorithm) -> f64 {
        match algorithm {
            Algorithm::JaroWinkler => self.jaro_winkler,
            Algorithm::Lcs => self.lcs,
            Algorithm::Phonetic => self.phonetic,
            Algorithm::Ngram => self.ngram,
            Algorithm::Jaccard => self.jaccard,
        }
    }

    /// Sets the weight for an algorithm.
    #[must_use]
    pub const fn with(mut self, algorithm: Algorithm, weight: f64) -> Self {
        match algorithm {
            Algorithm::JaroWinkler => self.jaro_winkler = weight,
            Algorithm::Lcs => self.lcs = weight,
            Algorithm::Phonetic => self.phonetic = weight,
            Algorithm::Ngram => self.ngram = weight,
            Algorithm::Jaccard => self.jaccard = weight,
        }
        self
    }

    /// Iterates over algorithms with a positive weight.
    pub fn active(&self) -> impl Iterator<Item = (Algorithm, f64)> + '_ {
        Algorithm::ALL
            .into_iter()
            .map(|a| (a, self.get(a)))
            .filter(|&(_, w)| w > 0.0)
    }

    /// Sum of the positive weights.
    ///
    /// May overflow to infinity for very large weights; use
    /// [`Self::normalized`] when combining scores.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.active().map(|(_, w)| w).sum()
    }

    /// Largest weight.
    #[must_use]
    pub fn max_weight(&self) -> f64 {
        self.active().map(|(_, w)| w).fold(0.0, f64::max)
    }

    /// Active weights divided by the largest one, so each lies in `(0, 1]`.
    ///
    /// Relative proportions are unchanged and the sum stays finite
    /// whatever the input magnitudes.
    pub fn normalized(&self) -> impl Iterator<Item = (Algorithm, f64)> + '_ {
        let max = self.max_weight();
        self.active().map(move |(a, w)| (a, w / max))
    }

    /// Checks that every weight is finite and non-negative, and at least one is positive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWeights`] otherwise.
    pub fn validate(&self) -> Result<()> {
        for algorithm in Algorithm::ALL {
            let weight = self.get(algorithm);
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::InvalidWeights(format!(
                    "{algorithm} weight must be a finite non-negative number, got {weight}"
                )));
            }
        }
        if self.active().next().is_none() {
            return Err(Error::InvalidWeights(
                "at least one algorithm weight must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Stable textual signature, part of the comparison cache key.
    ///
    /// Encodes the exact bit pattern of every weight, so two weight sets
    /// share a signature only when they are identical.
    #[must_use]
    pub fn signature(&self) -> String {
        Algorithm::ALL
            .iter()
            .map(|a| format!("{}={:016x}", a.as_str(), self.get(*a).to_bits()))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Parses `name=value` pairs separated by commas, e.g. `jw=0.5,jaccard=0.5`.
    ///
    /// Algorithms not mentioned get weight 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown names or unparsable numbers.
    pub fn parse_pairs(text: &str) -> Result<Self> {
        let mut weights = Self::zero();
        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidInput(format!("expected name=value, got '{pair}'")))?;
            let algorithm = Algorithm::parse(name)
                .ok_or_else(|| Error::InvalidInput(format!("unknown algorithm '{name}'")))?;
            let weight: f64 = value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidInput(format!("invalid weight '{value}'")))?;
            weights = weights.with(algorithm, weight);
        }
        Ok(weights)
    }
}

/// Outcome of comparing two strings. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Combined score in `[0.0, 1.0]`.
    pub score: f64,
    /// Raw sub-score per applied algorithm.
    pub breakdown: BTreeMap<Algorithm, f64>,
    /// Both inputs were empty after normalisation.
    pub identical_empty: bool,
}

impl SimilarityResult {
    /// Result for two empty inputs: score 1.0, flagged.
    #[must_use]
    pub fn identical_empty(weights: &SimilarityWeights) -> Self {
        Self {
            score: 1.0,
            breakdown: weights.active().map(|(a, _)| (a, 1.0)).collect(),
            identical_empty: true,
        }
    }

    /// Result when exactly one input is empty: score 0.0 for every algorithm.
    #[must_use]
    pub fn one_empty(weights: &SimilarityWeights) -> Self {
        Self {
            score: 0.0,
            breakdown: weights.active().map(|(a, _)| (a, 0.0)).collect(),
            identical_empty: false,
        }
    }

    /// Sub-score for an algorithm, if it was applied.
    #[must_use]
    pub fn sub_score(&self, algorithm: Algorithm) -> Option<f64> {
        self.breakdown.get(&algorithm).copied()
    }
}
