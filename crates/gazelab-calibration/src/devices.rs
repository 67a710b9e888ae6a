// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Device seams used by the orchestrator, implemented by the real links

use std::time::Duration;

use gazelab_coprocessor::CoprocessorLink;
use gazelab_tracker::{CalibrationPointProgress, CalibrationResult, TrackerLink};

/// Tracker operations a calibration attempt needs.
///
/// Command methods block for at most the link's acknowledgement timeout and
/// return whether the command was acknowledged.
pub trait CalibrationTracker: Send + Sync {
    fn is_connected(&self) -> bool;
    fn enable_send_data(&self) -> bool;
    fn calibrate_stop(&self) -> bool;
    fn calibrate_clear(&self) -> bool;
    fn calibrate_add_point(&self, x: f64, y: f64) -> bool;
    /// Per-point sampling duration
    fn calibrate_timeout(&self, seconds: f64) -> bool;
    /// Pre-point delay
    fn calibrate_delay(&self, seconds: f64) -> bool;
    fn calibrate_show(&self, show: bool) -> bool;
    fn calibrate_start(&self) -> bool;
    fn request_result_summary(&self) -> bool;

    fn point_progress(&self) -> Option<CalibrationPointProgress>;
    fn calibration_result(&self) -> Option<CalibrationResult>;
    fn reset_calibration_progress(&self);
    fn clear_calibration_results(&self);
    /// Must not block the caller
    fn reenable_fields_after(&self, delay: Duration);
}

/// LED outputs driven during an attempt
pub trait CalibrationLeds: Send + Sync {
    fn set_led(&self, index: u8, rgb: [u8; 3]) -> bool;
    fn all_on(&self, rgb: [u8; 3]) -> bool;
    fn all_off(&self) -> bool;
}

impl CalibrationTracker for TrackerLink {
    fn is_connected(&self) -> bool {
        TrackerLink::is_connected(self)
    }

    fn enable_send_data(&self) -> bool {
        TrackerLink::enable_send_data(self)
    }

    fn calibrate_stop(&self) -> bool {
        TrackerLink::calibrate_stop(self)
    }

    fn calibrate_clear(&self) -> bool {
        TrackerLink::calibrate_clear(self)
    }

    fn calibrate_add_point(&self, x: f64, y: f64) -> bool {
        TrackerLink::calibrate_add_point(self, x, y)
    }

    fn calibrate_timeout(&self, seconds: f64) -> bool {
        TrackerLink::calibrate_timeout(self, seconds)
    }

    fn calibrate_delay(&self, seconds: f64) -> bool {
        TrackerLink::calibrate_delay(self, seconds)
    }

    fn calibrate_show(&self, show: bool) -> bool {
        TrackerLink::calibrate_show(self, show)
    }

    fn calibrate_start(&self) -> bool {
        TrackerLink::calibrate_start(self)
    }

    fn request_result_summary(&self) -> bool {
        TrackerLink::request_result_summary(self)
    }

    fn point_progress(&self) -> Option<CalibrationPointProgress> {
        TrackerLink::point_progress(self)
    }

    fn calibration_result(&self) -> Option<CalibrationResult> {
        TrackerLink::calibration_result(self)
    }

    fn reset_calibration_progress(&self) {
        TrackerLink::reset_calibration_progress(self)
    }

    fn clear_calibration_results(&self) {
        TrackerLink::clear_calibration_results(self)
    }

    fn reenable_fields_after(&self, delay: Duration) {
        TrackerLink::reenable_fields_after(self, delay)
    }
}

impl CalibrationLeds for CoprocessorLink {
    fn set_led(&self, index: u8, rgb: [u8; 3]) -> bool {
        CoprocessorLink::set_led(self, index, rgb)
    }

    fn all_on(&self, rgb: [u8; 3]) -> bool {
        CoprocessorLink::all_on(self, rgb)
    }

    fn all_off(&self) -> bool {
        CoprocessorLink::all_off(self)
    }
}
