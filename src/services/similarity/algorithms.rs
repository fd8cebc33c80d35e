//! Individual similarity algorithms.
//!
//! Every function takes normalized text and returns a score in `[0.0, 1.0]`,
//! where 1.0 means identical. Two empty inputs score 1.0.

use super::normalize::tokens;
use super::phonetic::soundex;
use std::collections::HashSet;
use std::hash::Hash;

/// Jaro-Winkler similarity (prefix scale 0.1, prefix length up to 4).
#[must_use]
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(a, b)
}

/// Length of the longest common subsequence divided by the longer length.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()] as f64 / longest as f64
}

/// Jaccard index over character n-gram sets.
///
/// A string shorter than `n` contributes itself as a single gram.
#[must_use]
pub fn ngram_similarity(a: &str, b: &str, n: usize) -> f64 {
    jaccard(&char_ngrams(a, n.max(1)), &char_ngrams(b, n.max(1)))
}

/// Jaccard index over whitespace token sets.
#[must_use]
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = tokens(a).collect();
    let right: HashSet<&str> = tokens(b).collect();
    jaccard(&left, &right)
}

/// Jaccard index over the sets of per-token phonetic codes.
///
/// Text without letters has no codes; it then matches only identical text.
#[must_use]
pub fn phonetic_similarity(a: &str, b: &str) -> f64 {
    let left = phonetic_codes(a);
    let right = phonetic_codes(b);
    if left.is_empty() && right.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    jaccard(&left, &right)
}

/// Phonetic codes of every token with at least one letter.
#[must_use]
pub fn phonetic_codes(text: &str) -> HashSet<String> {
    tokens(text).filter_map(soundex).collect()
}

fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return HashSet::new();
    }
    if chars.len() < n {
        return HashSet::from([text.to_string()]);
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

#[allow(clippy::cast_precision_loss)]
fn jaccard<T: Eq + Hash>(left: &HashSet<T>, right: &HashSet<T>) -> f64 {
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(right).count();
    let union = left.len() + right.len() - intersection;
    intersection as f64 / union as f64
}
