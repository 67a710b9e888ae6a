// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Observability configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Log format for file output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Text,
    Json,
}

/// Resolved logging settings handed to [`crate::init_logging`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base level (trace, debug, info, warn, error)
    pub level: String,
    /// Write per-run log files in addition to the console
    pub file_logging: bool,
    /// Base directory for run folders
    pub log_dir: PathBuf,
    pub file_format: LogFormat,
    /// Keep logs for N days
    pub retention_days: u64,
    /// Keep N most recent runs
    pub retention_runs: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        ObservabilityConfig {
            level: "info".to_string(),
            file_logging: false,
            log_dir: PathBuf::from("./logs"),
            file_format: LogFormat::Json,
            retention_days: 30,
            retention_runs: 10,
        }
    }
}

impl From<&gazelab_config::LoggingConfig> for ObservabilityConfig {
    fn from(logging: &gazelab_config::LoggingConfig) -> Self {
        let defaults = ObservabilityConfig::default();
        ObservabilityConfig {
            level: logging.level.clone(),
            file_logging: logging.file_logging,
            log_dir: logging.log_dir.clone().unwrap_or(defaults.log_dir.clone()),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_logging_section() {
        let mut logging = gazelab_config::LoggingConfig::default();
        logging.level = "debug".to_string();
        logging.log_dir = Some(PathBuf::from("/tmp/gazelab-logs"));

        let config = ObservabilityConfig::from(&logging);
        assert_eq!(config.level, "debug");
        assert_eq!(config.log_dir, PathBuf::from("/tmp/gazelab-logs"));
        assert_eq!(config.retention_runs, 10);
        assert!(!config.file_logging);
    }
}
