//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `DUPSCAN_*` environment variables.
//!
//! ```toml
//! [similarity]
//! cache_capacity = 10000
//! max_batch_pairs = 1000
//!
//! [admission]
//! max_concurrent = 2
//! acquire_timeout_ms = 45000
//!
//! [detection]
//! default_batch_size = 100
//! default_threshold = 0.85
//!
//! [storage]
//! db_path = "/var/lib/dupscan/dupscan.db"
//!
//! [logging]
//! format = "json"
//! level = "info"
//!
//! [metrics]
//! enabled = true
//! port = 9090
//! ```

use crate::services::{AdmissionConfig, DetectionConfig, SimilarityConfig};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for dupscan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DupscanConfig {
    /// Similarity scorer and cache.
    pub similarity: SimilarityConfig,
    /// Admission gate.
    pub admission: AdmissionConfig,
    /// Detection task defaults.
    pub detection: DetectionConfig,
    /// Storage location.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Metrics exporter.
    pub metrics: MetricsSettings,
}

/// Storage section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// `SQLite` database path. The platform data directory is used when unset.
    pub db_path: Option<PathBuf>,
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `"pretty"` or `"json"`.
    pub format: String,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Metrics section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Install the Prometheus exporter.
    pub enabled: bool,
    /// Exporter HTTP port.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl DupscanConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// Sections missing from the file keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })
    }

    /// Loads configuration from the default location, or defaults if the
    /// file is absent or unreadable.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable config file"
                );
                Self::default()
            },
        }
    }

    /// Loads the given file (or the default location) and applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Platform config file path: `<config dir>/dupscan/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("dupscan").join("config.toml"))
    }

    /// Applies `DUPSCAN_*` environment variable overrides to every section.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.similarity = self.similarity.with_env_overrides();
        self.admission = self.admission.with_env_overrides();
        self.detection = self.detection.with_env_overrides();

        if let Some(path) = parse_string_env("DUPSCAN_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
        if let Some(format) = parse_string_env("DUPSCAN_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(file) = parse_string_env("DUPSCAN_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        if let Some(enabled) = parse_bool_env("DUPSCAN_METRICS_ENABLED") {
            self.metrics.enabled = enabled;
        }
        if let Some(port) = std::env::var("DUPSCAN_METRICS_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            self.metrics.port = port;
        }
        self
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.db_path = Some(path.into());
        self
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_config".to_string(),
            cause: e.to_string(),
        })
    }
}

fn parse_bool_env(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        let value = value.to_lowercase();
        value == "true" || value == "1" || value == "yes"
    })
}

fn parse_string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DupscanConfig::default();
        assert_eq!(config.similarity.cache_capacity, 10_000);
        assert_eq!(config.similarity.max_batch_pairs, 1000);
        assert_eq!(config.admission.max_concurrent, 2);
        assert_eq!(config.admission.acquire_timeout_ms, 45_000);
        assert_eq!(config.detection.default_batch_size, 100);
        assert!((config.detection.default_threshold - 0.85).abs() < f64::EPSILON);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = DupscanConfig::from_toml(
            "[admission]\nmax_concurrent = 4\n\n[logging]\nformat = \"json\"\n",
        )
        .unwrap();
        assert_eq!(config.admission.max_concurrent, 4);
        assert_eq!(config.admission.acquire_timeout_ms, 45_000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.similarity.cache_capacity, 10_000);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(DupscanConfig::from_toml("[admission\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\ndb_path = \"/tmp/x.db\"\n").unwrap();
        let config = DupscanConfig::load_from_file(&path).unwrap();
        assert_eq!(config.storage.db_path, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = DupscanConfig::default().with_db_path("/tmp/d.db");
        let text = config.to_toml().unwrap();
        assert_eq!(DupscanConfig::from_toml(&text).unwrap(), config);
    }
}
