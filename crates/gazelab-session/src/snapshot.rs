// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only views handed to renderers once per tick

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

use gazelab_calibration::{LedTarget, Quality};

use crate::flow::FlowState;
use crate::position::{EyeView, PositionStatus};
use crate::results::ResultsPage;

/// Link status as seen by the loop this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    pub tracker_connected: bool,
    pub tracker_receiving: bool,
    /// A co-processor link exists
    pub coprocessor_present: bool,
    /// ...and has been heard from recently
    pub coprocessor_alive: bool,
}

/// Inputs gathered by the loop before each machine step
#[derive(Debug, Clone)]
pub struct StepContext {
    pub now: Instant,
    pub wall: DateTime<Local>,
    pub devices: DeviceStatus,
    pub calibration_running: bool,
    /// Point the running calibration is sampling
    pub led_target: Option<LedTarget>,
}

impl StepContext {
    /// Context with nothing connected and no calibration running
    pub fn at(now: Instant) -> Self {
        Self {
            now,
            wall: Local::now(),
            devices: DeviceStatus::default(),
            calibration_running: false,
            led_target: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationView {
    pub running: bool,
    /// `None` until an attempt finishes
    pub quality: Option<Quality>,
    pub average_error: Option<f64>,
    pub message: Option<String>,
    pub led_target: Option<LedTarget>,
}

impl CalibrationView {
    pub fn is_done(&self) -> bool {
        !self.running && self.quality.is_some()
    }

    pub fn is_usable(&self) -> bool {
        self.is_done() && self.quality.map(|q| q.is_usable()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingView {
    pub elapsed: Duration,
    pub event_open: bool,
    /// Time since the open marker started
    pub event_elapsed: Option<Duration>,
    /// Marker the next edge opens or closes
    pub event_index: u32,
    pub samples: usize,
    /// Timers stop once recording ends
    pub frozen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceView {
    pub done: usize,
    pub total: usize,
    /// `None` while no estimate is possible
    pub remaining: Option<Duration>,
}

impl InferenceView {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.done * 100) / self.total).min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsPageView {
    pub page: ResultsPage,
    pub index: usize,
    pub count: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: FlowState,
    pub devices: DeviceStatus,
    pub position: PositionStatus,
    pub eyes: EyeView,
    pub calibration: CalibrationView,
    pub recording: Option<RecordingView>,
    pub inference: Option<InferenceView>,
    pub results: Option<ResultsPageView>,
    /// Transient operator message
    pub info: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_percent() {
        let view = InferenceView {
            done: 3,
            total: 8,
            remaining: None,
        };
        assert_eq!(view.percent(), 37);
        let empty = InferenceView {
            done: 0,
            total: 0,
            remaining: None,
        };
        assert_eq!(empty.percent(), 0);
    }

    #[test]
    fn test_calibration_view_done_and_usable() {
        let mut view = CalibrationView {
            running: true,
            quality: Some(Quality::Low),
            average_error: Some(1.5),
            message: None,
            led_target: None,
        };
        assert!(!view.is_done());
        view.running = false;
        assert!(view.is_usable());
        view.quality = Some(Quality::Failed);
        assert!(view.is_done());
        assert!(!view.is_usable());
    }
}
