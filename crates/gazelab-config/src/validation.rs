// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Checks that values are within the ranges the device links and the FLOW
//! can actually work with, reporting every problem in one pass.

use crate::{ConfigError, ConfigResult, GazelabConfig};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
    InvalidRange { field: String, low: f64, high: f64 },
    InvalidLedOrder { order: Vec<u8>, pixel_count: u8 },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::InvalidRange { field, low, high } => {
                write!(
                    f,
                    "Invalid range for {}: lower bound {} must be below upper bound {}",
                    field, low, high
                )
            }
            Self::InvalidLedOrder { order, pixel_count } => {
                write!(
                    f,
                    "calibration.led_order {:?} must list 4 indices below pixel_count {}",
                    order, pixel_count
                )
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - Required fields (tracker host, stream fields)
/// - Threshold and distance band ordering
/// - LED order against the configured pixel count
/// - Value ranges (brightness, timeouts)
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every failed check
pub fn validate_config(config: &GazelabConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_required_fields(config, &mut errors);
    validate_ordering(config, &mut errors);
    validate_led_order(config, &mut errors);
    validate_value_ranges(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_required_fields(config: &GazelabConfig, errors: &mut Vec<ConfigValidationError>) {
    if !config.tracker.simulate && config.tracker.host.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "tracker.host".to_string(),
        });
    }
    if config.tracker.stream_fields.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "tracker.stream_fields".to_string(),
        });
    }
}

fn validate_ordering(config: &GazelabConfig, errors: &mut Vec<ConfigValidationError>) {
    let cal = &config.calibration;
    if cal.ok_threshold >= cal.low_threshold {
        errors.push(ConfigValidationError::InvalidRange {
            field: "calibration.ok_threshold/low_threshold".to_string(),
            low: cal.ok_threshold,
            high: cal.low_threshold,
        });
    }

    let session = &config.session;
    if session.near_cm >= session.far_cm {
        errors.push(ConfigValidationError::InvalidRange {
            field: "session.near_cm/far_cm".to_string(),
            low: session.near_cm,
            high: session.far_cm,
        });
    }
}

fn validate_led_order(config: &GazelabConfig, errors: &mut Vec<ConfigValidationError>) {
    let order = &config.calibration.led_order;
    let pixel_count = config.coprocessor.pixel_count;
    if order.len() != 4 || order.iter().any(|&idx| idx >= pixel_count) {
        errors.push(ConfigValidationError::InvalidLedOrder {
            order: order.clone(),
            pixel_count,
        });
    }
}

fn validate_value_ranges(config: &GazelabConfig, errors: &mut Vec<ConfigValidationError>) {
    let brightness = config.coprocessor.brightness;
    if !(0.0..=1.0).contains(&brightness) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "coprocessor.brightness".to_string(),
            reason: format!("{} is outside 0.0-1.0", brightness),
        });
    }

    if config.coprocessor.baud == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "coprocessor.baud".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    if config.tracker.sample_queue_capacity == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "tracker.sample_queue_capacity".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    let cal = &config.calibration;
    let positive = [
        ("calibration.ok_threshold", cal.ok_threshold),
        ("calibration.low_threshold", cal.low_threshold),
        ("calibration.point_duration_s", cal.point_duration_s),
        ("calibration.overlay_point_duration_s", cal.overlay_point_duration_s),
        ("calibration.attempt_timeout_s", cal.attempt_timeout_s),
        ("calibration.summary_poll_interval_s", cal.summary_poll_interval_s),
    ];
    for (field, value) in positive {
        if value <= 0.0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: field.to_string(),
                reason: format!("{} must be positive", value),
            });
        }
    }

    let non_negative = [
        ("calibration.point_delay_s", cal.point_delay_s),
        ("calibration.overlay_point_delay_s", cal.overlay_point_delay_s),
    ];
    for (field, value) in non_negative {
        if value < 0.0 {
            errors.push(ConfigValidationError::InvalidValue {
                field: field.to_string(),
                reason: format!("{} must not be negative", value),
            });
        }
    }

    if cal.blink_duty <= 0.0 || cal.blink_duty >= 1.0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "calibration.blink_duty".to_string(),
            reason: format!("{} is outside (0, 1)", cal.blink_duty),
        });
    }

    if config.tracker.ack_timeout_ms == 0 || config.tracker.read_timeout_ms == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "tracker.ack_timeout_ms/read_timeout_ms".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    if !(0.0..0.5).contains(&config.calibration.center_tolerance) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "calibration.center_tolerance".to_string(),
            reason: "must be within 0.0-0.5".to_string(),
        });
    }

    if config.session.tick_ms == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "session.tick_ms".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GazelabConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_threshold_ordering() {
        let mut config = GazelabConfig::default();
        config.calibration.ok_threshold = 2.5;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("ok_threshold"));
    }

    #[test]
    fn test_led_order_out_of_range() {
        let mut config = GazelabConfig::default();
        config.calibration.led_order = vec![0, 1, 2, 7];
        assert!(validate_config(&config).is_err());

        config.calibration.led_order = vec![0, 1, 2];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_all_errors_reported_together() {
        let mut config = GazelabConfig::default();
        config.coprocessor.brightness = 1.5;
        config.session.near_cm = 90.0;
        config.tracker.stream_fields.clear();

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("brightness"));
        assert!(message.contains("near_cm"));
        assert!(message.contains("stream_fields"));
    }
}
