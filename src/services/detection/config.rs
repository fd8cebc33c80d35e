//! Detection task defaults.

use serde::{Deserialize, Serialize};

/// Defaults applied to detection requests that leave fields unset.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `DUPSCAN_DEFAULT_BATCH_SIZE` | usize | `100` | Candidate page size |
/// | `DUPSCAN_DEFAULT_THRESHOLD` | f64 | `0.85` | Threshold used by the CLI |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Page size used when a request does not set one.
    pub default_batch_size: usize,

    /// Threshold offered to callers that do not choose one.
    pub default_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 100,
            default_threshold: 0.85,
        }
    }
}

impl DetectionConfig {
    /// Creates a configuration from environment variables over defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// Out-of-range values are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DUPSCAN_DEFAULT_BATCH_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
            && parsed > 0
        {
            self.default_batch_size = parsed;
        }
        if let Ok(v) = std::env::var("DUPSCAN_DEFAULT_THRESHOLD")
            && let Ok(parsed) = v.parse::<f64>()
            && parsed > 0.0
            && parsed <= 1.0
        {
            self.default_threshold = parsed;
        }
        self
    }

    /// Builder method to set the default batch size.
    #[must_use]
    pub const fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size;
        self
    }
}
