// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # gazelab Configuration System
//!
//! Type-safe configuration for the gazelab station with support for:
//! - TOML file parsing
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gazelab_config::{load_config, GazelabConfig};
//!
//! // Load configuration with automatic file discovery and overrides
//! let config = load_config(None, None).expect("Failed to load config");
//!
//! println!("Tracker: {}:{}", config.tracker.host, config.tracker.port);
//! println!("Calibration method: {:?}", config.calibration.method());
//! ```
//!
//! The loaded value is immutable after startup: every component receives a
//! reference to its own section in its constructor.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name searched for by [`find_config_file`].
pub const CONFIG_FILE_NAME: &str = "gazelab.toml";

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{apply_cli_overrides, apply_environment_overrides, find_config_file, load_config};
pub use types::*;
pub use validation::{validate_config, ConfigValidationError};

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found. Searched: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    ParseError(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl ConfigError {
    /// A missing file can be recovered from by falling back to defaults;
    /// parse and validation errors need the operator to fix the file.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, ConfigError::FileNotFound(_))
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = GazelabConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: GazelabConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.tracker.port, config.tracker.port);
        assert_eq!(parsed.calibration.led_order, config.calibration.led_order);
    }

    #[test]
    fn test_missing_file_classification() {
        assert!(ConfigError::FileNotFound("x".into()).is_missing_file());
        assert!(!ConfigError::ParseError("x".into()).is_missing_file());
    }
}
