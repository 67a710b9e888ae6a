// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # gazelab-calibration
//!
//! Runs calibration attempts against the tracker and keeps the external
//! LEDs in step with the point the tracker is actually sampling.
//!
//! The orchestrator talks to devices only through [`CalibrationTracker`]
//! and [`CalibrationLeds`], implemented here for the real links. With the
//! `BOTH` method the LED and overlay paths are configured one after the
//! other and the first final result completes the attempt.

pub mod debug_log;
pub mod devices;
pub mod error;
pub mod led_sync;
pub mod orchestrator;
pub mod quality;

pub use debug_log::{CalibrationLog, CalibrationLogEntry, CalibrationPath};
pub use devices::{CalibrationLeds, CalibrationTracker};
pub use error::{CalibrationError, Result};
pub use led_sync::{led_command, target_for, LedCommand, LedTarget, CORNER_POINTS};
pub use orchestrator::{
    CalibrationOrchestrator, CalibrationOutcome, CalibrationPhase, CalibrationReport,
    CompletionReason,
};
pub use quality::{score, score_override, Quality, QualityOverride, Score, Thresholds};
