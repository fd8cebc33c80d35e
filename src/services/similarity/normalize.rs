//! Text normalization shared by the scorer and its callers.
//!
//! Scores are only reproducible when both sides normalize the same way, so
//! every comparison goes through [`normalize`] first.

/// Normalizes text for comparison.
///
/// - Trims leading/trailing whitespace
/// - Lower-cases (Unicode aware)
/// - Collapses whitespace runs into a single space
///
/// # Example
///
/// ```rust
/// use dupscan::services::similarity::normalize;
///
/// assert_eq!(normalize("  ООО   Ромашка "), "ооо ромашка");
/// ```
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits normalized text into tokens.
pub fn tokens(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split(' ').filter(|t| !t.is_empty())
}

/// Rebuilds normalized text with its tokens in lexicographic order.
///
/// `"ромашка ооо"` and `"ооо ромашка"` both become `"ооо ромашка"`.
#[must_use]
pub fn token_sorted(normalized: &str) -> String {
    let mut parts: Vec<&str> = tokens(normalized).collect();
    parts.sort_unstable();
    parts.join(" ")
}
