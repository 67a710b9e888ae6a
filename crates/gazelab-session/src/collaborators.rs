// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Seams to the outside: display, analysis and persistence

use gazelab_calibration::CalibrationReport;

use crate::error::Result;
use crate::machine::RecordingData;
use crate::results::ResultsPage;
use crate::snapshot::SessionSnapshot;

/// Consumes a read-only snapshot every tick; feeds nothing back
pub trait Renderer: Send {
    fn render(&mut self, snapshot: &SessionSnapshot);

    /// The display lost its state (device reboot); redraw everything
    fn invalidate(&mut self) {}
}

/// Turns one recording into `4 + 4 * intervals` raw values
pub trait InferenceEngine: Send + Sync {
    /// `progress` receives the number of values produced so far
    fn infer(&self, recording: &RecordingData, progress: &dyn Fn(usize)) -> Result<Vec<f64>>;

    /// Expected time per value, for the remaining-time estimate
    fn seconds_per_value(&self) -> Option<f64> {
        None
    }
}

/// Write-once persistence of immutable session copies
pub trait SessionRecorder: Send {
    /// Subsequent writes belong to a new session
    fn begin_session(&mut self) {}

    fn record_recording(&mut self, recording: &RecordingData) -> Result<()>;

    fn record_results(&mut self, pages: &[ResultsPage]) -> Result<()>;

    fn record_calibration(&mut self, report: &CalibrationReport) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl SessionRecorder for NullRecorder {
    fn record_recording(&mut self, _recording: &RecordingData) -> Result<()> {
        Ok(())
    }

    fn record_results(&mut self, _pages: &[ResultsPage]) -> Result<()> {
        Ok(())
    }

    fn record_calibration(&mut self, _report: &CalibrationReport) -> Result<()> {
        Ok(())
    }
}
