// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `gazelab.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GazelabConfig {
    pub tracker: TrackerConfig,
    pub coprocessor: CoprocessorConfig,
    pub calibration: CalibrationConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Tracker TCP link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub host: String,
    pub port: u16,
    /// Replace the socket with the in-process simulated tracker
    pub simulate: bool,
    pub connect_timeout_ms: u64,
    /// Read timeout; also bounds how quickly a stop request is observed
    pub read_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub ack_timeout_ms: u64,
    pub field_ack_timeout_ms: u64,
    pub field_enable_spacing_ms: u64,
    pub stream_enable_settle_ms: u64,
    pub sample_queue_capacity: usize,
    /// Field categories enabled after every (re)connect, in order
    pub stream_fields: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4242,
            simulate: false,
            connect_timeout_ms: 1000,
            read_timeout_ms: 1000,
            reconnect_backoff_ms: 1000,
            ack_timeout_ms: 2000,
            field_ack_timeout_ms: 1000,
            field_enable_spacing_ms: 50,
            stream_enable_settle_ms: 200,
            sample_queue_capacity: 1024,
            stream_fields: default_stream_fields(),
        }
    }
}

fn default_stream_fields() -> Vec<String> {
    [
        "ENABLE_SEND_COUNTER",
        "ENABLE_SEND_TIME",
        "ENABLE_SEND_POG_BEST",
        "ENABLE_SEND_POG_LEFT",
        "ENABLE_SEND_POG_RIGHT",
        "ENABLE_SEND_POG_FIX",
        "ENABLE_SEND_PUPIL_LEFT",
        "ENABLE_SEND_PUPIL_RIGHT",
        "ENABLE_SEND_EYE_LEFT",
        "ENABLE_SEND_EYE_RIGHT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl TrackerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn field_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.field_ack_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Co-processor serial link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoprocessorConfig {
    pub enabled: bool,
    /// Run over the in-memory loopback transport with a firmware-like responder
    pub simulate: bool,
    /// Empty string means auto-discover
    pub serial_port: String,
    pub baud: u32,
    pub pixel_count: u8,
    /// Global brightness 0.0-1.0, applied host-side to colors and sent with INIT
    pub brightness: f64,
    pub ack_timeout_ms: u64,
    pub init_ack_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub serial_log_capacity: usize,
    pub open_settle_ms: u64,
    /// Also reset the session to BOOT when the device reboots unannounced
    pub reinit_app_state_on_boot: bool,
}

impl Default for CoprocessorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            simulate: false,
            serial_port: String::new(),
            baud: 115_200,
            pixel_count: 4,
            brightness: 0.3,
            ack_timeout_ms: 250,
            init_ack_timeout_ms: 500,
            heartbeat_timeout_ms: 3000,
            serial_log_capacity: 500,
            open_settle_ms: 500,
            reinit_app_state_on_boot: true,
        }
    }
}

impl CoprocessorConfig {
    pub fn configured_port(&self) -> Option<&str> {
        let port = self.serial_port.trim();
        if port.is_empty() {
            None
        } else {
            Some(port)
        }
    }

    /// Brightness as the 0-255 byte the firmware expects
    pub fn brightness_byte(&self) -> u8 {
        (255.0 * self.brightness.clamp(0.0, 1.0)) as u8
    }
}

/// Which calibration stimulus path(s) an attempt drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationMethod {
    /// External LEDs, tracker overlay hidden
    Led,
    /// Tracker's own on-screen overlay
    Overlay,
    /// Both paths configured; either may complete the attempt
    Both,
}

impl CalibrationMethod {
    /// Parse a configured method name; unknown names fall back to `Led`.
    pub fn from_config_str(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "OVERLAY" => CalibrationMethod::Overlay,
            "BOTH" => CalibrationMethod::Both,
            _ => CalibrationMethod::Led,
        }
    }

    pub fn uses_led(self) -> bool {
        matches!(self, CalibrationMethod::Led | CalibrationMethod::Both)
    }

    pub fn uses_overlay(self) -> bool {
        matches!(self, CalibrationMethod::Overlay | CalibrationMethod::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationMethod::Led => "LED",
            CalibrationMethod::Overlay => "OVERLAY",
            CalibrationMethod::Both => "BOTH",
        }
    }
}

/// Calibration orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// "LED", "OVERLAY" or "BOTH"
    pub method: String,
    pub ok_threshold: f64,
    pub low_threshold: f64,
    /// Tracker pre-point delay (animation phase) for the LED path, seconds
    pub point_delay_s: f64,
    /// Tracker per-point sampling duration for the LED path, seconds
    pub point_duration_s: f64,
    pub overlay_point_delay_s: f64,
    pub overlay_point_duration_s: f64,
    /// Physical LED index for [low_right, low_left, high_left, high_right]
    pub led_order: Vec<u8>,
    pub led_color: [u8; 3],
    pub blink_during_delay: bool,
    pub blink_period_s: f64,
    pub blink_duty: f64,
    /// Half-width of the band around (0.5, 0.5) treated as the center point
    pub center_tolerance: f64,
    pub attempt_timeout_s: f64,
    pub summary_poll_after_s: f64,
    pub summary_poll_interval_s: f64,
    pub field_reenable_delay_ms: u64,
    pub command_spacing_ms: u64,
    pub add_point_spacing_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            method: "LED".to_string(),
            ok_threshold: 1.0,
            low_threshold: 2.0,
            point_delay_s: 4.5,
            point_duration_s: 1.5,
            overlay_point_delay_s: 0.2,
            overlay_point_duration_s: 1.0,
            led_order: vec![0, 1, 2, 3],
            led_color: [255, 255, 255],
            blink_during_delay: true,
            blink_period_s: 0.6,
            blink_duty: 0.5,
            center_tolerance: 0.15,
            attempt_timeout_s: 60.0,
            summary_poll_after_s: 15.0,
            summary_poll_interval_s: 3.0,
            field_reenable_delay_ms: 200,
            command_spacing_ms: 100,
            add_point_spacing_ms: 50,
        }
    }
}

impl CalibrationConfig {
    pub fn method(&self) -> CalibrationMethod {
        CalibrationMethod::from_config_str(&self.method)
    }

    /// Blink period with the 0.2s floor applied
    pub fn effective_blink_period_s(&self) -> f64 {
        self.blink_period_s.max(0.2)
    }

    /// Duty cycle clamped to 0.01..0.99
    pub fn effective_blink_duty(&self) -> f64 {
        self.blink_duty.clamp(0.01, 0.99)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.attempt_timeout_s.max(0.0))
    }

    pub fn summary_poll_after(&self) -> Duration {
        Duration::from_secs_f64(self.summary_poll_after_s.max(0.0))
    }

    pub fn summary_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.summary_poll_interval_s.max(0.0))
    }

    pub fn point_delay(&self) -> Duration {
        Duration::from_secs_f64(self.point_delay_s.max(0.0))
    }
}

/// Session FLOW configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Main loop period
    pub tick_ms: u64,
    /// Positioning hint re-evaluation interval
    pub ui_refresh_ms: u64,
    pub near_cm: f64,
    pub far_cm: f64,
    /// Eye distance readings older than this count as absent
    pub eye_data_timeout_ms: u64,
    pub max_samples_per_tick: usize,
    pub info_message_ms: u64,
    /// Root folder for session recordings
    pub output_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 16,
            ui_refresh_ms: 100,
            near_cm: 55.0,
            far_cm: 75.0,
            eye_data_timeout_ms: 800,
            max_samples_per_tick: 100,
            info_message_ms: 2000,
            output_dir: PathBuf::from("logs"),
        }
    }
}

impl SessionConfig {
    /// Refresh interval with the 10ms floor applied
    pub fn effective_ui_refresh_ms(&self) -> u64 {
        self.ui_refresh_ms.max(10)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: Option<PathBuf>,
    pub file_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_logging: false,
        }
    }
}
