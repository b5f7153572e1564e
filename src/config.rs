//! Executor configuration
//!
//! Loaded from a JSON file. Every field is optional and falls back to its
//! default.
//!
//! ```json
//! {
//!   "sort_max_bytes": 33554432,
//!   "oplog_backwards_scan_time_ms": 5000,
//!   "yield_iterations": 128,
//!   "log_level": "INFO"
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{Logger, Severity};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "AERO_CONFIG_READ",
            ConfigError::Parse(_) => "AERO_CONFIG_PARSE",
            ConfigError::Invalid { .. } => "AERO_CONFIG_INVALID",
        }
    }
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Bytes a sort may buffer before failing
    #[serde(default = "default_sort_max_bytes")]
    pub sort_max_bytes: usize,

    /// Time OplogStart scans backwards before hopping extents
    #[serde(default = "default_oplog_backwards_scan_time_ms")]
    pub oplog_backwards_scan_time_ms: u64,

    /// Works between cooperative yields; 0 disables
    #[serde(default = "default_yield_iterations")]
    pub yield_iterations: u64,

    /// Minimum logged severity
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_sort_max_bytes() -> usize {
    32 * 1024 * 1024
}
fn default_oplog_backwards_scan_time_ms() -> u64 {
    5000
}
fn default_yield_iterations() -> u64 {
    128
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            sort_max_bytes: default_sort_max_bytes(),
            oplog_backwards_scan_time_ms: default_oplog_backwards_scan_time_ms(),
            yield_iterations: default_yield_iterations(),
            log_level: default_log_level(),
        }
    }
}

impl ExecConfig {
    /// Loads and validates a config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Parses and validates a JSON document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: ExecConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the executor cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sort_max_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "sort_max_bytes",
                reason: "must be > 0".into(),
            });
        }
        if Severity::parse(&self.log_level).is_none() {
            return Err(ConfigError::Invalid {
                field: "log_level",
                reason: format!("unknown level '{}'", self.log_level),
            });
        }
        Ok(())
    }

    /// OplogStart backward scan budget
    pub fn oplog_backwards_scan_time(&self) -> Duration {
        Duration::from_millis(self.oplog_backwards_scan_time_ms)
    }

    /// Parsed log level; INFO if the name is unknown
    pub fn severity(&self) -> Severity {
        Severity::parse(&self.log_level).unwrap_or(Severity::Info)
    }

    /// Applies the log level to the process-wide logger
    pub fn apply_logging(&self) {
        Logger::set_min_severity(self.severity());
    }
}
