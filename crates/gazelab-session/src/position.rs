// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Participant positioning from the freshest eye-distance reading

use serde::Serialize;
use std::time::{Duration, Instant};

use gazelab_config::SessionConfig;
use gazelab_tracker::GazeSample;

use crate::flow::FlowState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionStatus {
    Near,
    Far,
    Good,
}

impl PositionStatus {
    /// Text shown on the monitoring screen
    pub fn label(&self) -> &'static str {
        match self {
            PositionStatus::Near => "Near",
            PositionStatus::Far => "Far",
            PositionStatus::Good => "Good",
        }
    }

    /// Hint screen for this classification
    pub fn hint_state(&self) -> FlowState {
        match self {
            PositionStatus::Near => FlowState::MoveFarther,
            PositionStatus::Far => FlowState::MoveCloser,
            PositionStatus::Good => FlowState::InPosition,
        }
    }
}

/// Eye flags and gaze as last reported, for the monitoring view
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EyeView {
    /// Mirrored: the display faces the participant, so "left" is their right eye
    pub left_open: bool,
    pub right_open: bool,
    pub gaze: Option<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct EyeMonitor {
    near_cm: f64,
    far_cm: f64,
    timeout: Duration,
    distance: Option<(f64, Instant)>,
    view: Option<EyeView>,
}

impl EyeMonitor {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            near_cm: config.near_cm,
            far_cm: config.far_cm,
            timeout: Duration::from_millis(config.eye_data_timeout_ms),
            distance: None,
            view: None,
        }
    }

    pub fn ingest(&mut self, sample: &GazeSample, now: Instant) {
        // A frame without distance leaves the previous reading to age out
        if let Some(cm) = sample.eye_distance_cm() {
            self.distance = Some((cm, now));
        }
        let left_open = sample.rpupild.is_some() || sample.rpv;
        let right_open = sample.lpupild.is_some() || sample.lpv;
        self.view = Some(EyeView {
            left_open,
            right_open,
            gaze: sample.valid.then_some((sample.gx, sample.gy)),
        });
    }

    /// Distance in centimeters, or `None` once the reading is stale
    pub fn distance_cm(&self, now: Instant) -> Option<f64> {
        self.distance
            .filter(|(_, at)| now.saturating_duration_since(*at) <= self.timeout)
            .map(|(cm, _)| cm)
    }

    /// Missing or stale data counts as too far
    pub fn classify(&self, now: Instant) -> PositionStatus {
        match self.distance_cm(now) {
            None => PositionStatus::Far,
            Some(cm) if cm < self.near_cm => PositionStatus::Near,
            Some(cm) if cm > self.far_cm => PositionStatus::Far,
            Some(_) => PositionStatus::Good,
        }
    }

    pub fn view(&self) -> EyeView {
        self.view.unwrap_or_default()
    }
}
