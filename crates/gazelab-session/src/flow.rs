// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! FLOW states and the display screen each one selects

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Boot,
    /// Waiting for the participant to sit down; the first positioning step
    FindPosition,
    MoveCloser,
    MoveFarther,
    InPosition,
    Calibration,
    RecordConfirmation,
    Recording,
    StopRecord,
    InferenceLoading,
    Results,
    /// Modal diagnostics view, held while BTN_B is down
    Monitoring,
}

impl FlowState {
    /// Screen name understood by the co-processor firmware
    pub fn screen_name(&self) -> &'static str {
        match self {
            FlowState::Boot => "BOOT",
            FlowState::FindPosition => "FIND_POSITION",
            FlowState::MoveCloser => "MOVE_CLOSER",
            FlowState::MoveFarther => "MOVE_FARTHER",
            FlowState::InPosition => "IN_POSITION",
            FlowState::Calibration => "CALIBRATION",
            FlowState::RecordConfirmation => "RECORD_CONFIRMATION",
            FlowState::Recording => "RECORDING",
            FlowState::StopRecord => "STOP_RECORD",
            FlowState::InferenceLoading => "INFERENCE_LOADING",
            FlowState::Results => "RESULTS",
            FlowState::Monitoring => "MONITORING",
        }
    }

    /// The three hint screens that re-classify position on a timer
    pub fn is_position_hint(&self) -> bool {
        matches!(
            self,
            FlowState::MoveCloser | FlowState::MoveFarther | FlowState::InPosition
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.screen_name())
    }
}
