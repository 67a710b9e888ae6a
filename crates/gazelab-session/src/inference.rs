// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic stand-in for the analysis model

use std::thread;
use std::time::Duration;

use crate::collaborators::InferenceEngine;
use crate::error::Result;
use crate::machine::RecordingData;
use crate::results::{expected_values, VALUES_PER_PAGE};

/// Produces `0.25 + 0.15 * value + 0.05 * (page % 5)` for every slot,
/// pausing between values to exercise the progress display
#[derive(Debug, Clone, Copy)]
pub struct MockInference {
    pub seconds_per_value: f64,
}

impl MockInference {
    pub fn new(seconds_per_value: f64) -> Self {
        Self {
            seconds_per_value: seconds_per_value.max(0.0),
        }
    }

    /// Value for slot `value` of page `page`
    pub fn value_at(page: usize, value: usize) -> f64 {
        (0.25 + 0.15 * value as f64 + 0.05 * (page % 5) as f64).clamp(0.0, 1.0)
    }
}

impl Default for MockInference {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl InferenceEngine for MockInference {
    fn infer(&self, recording: &RecordingData, progress: &dyn Fn(usize)) -> Result<Vec<f64>> {
        let total = expected_values(recording.intervals);
        let mut values = Vec::with_capacity(total);
        for slot in 0..total {
            if self.seconds_per_value > 0.0 {
                thread::sleep(Duration::from_secs_f64(self.seconds_per_value));
            }
            values.push(Self::value_at(slot / VALUES_PER_PAGE, slot % VALUES_PER_PAGE));
            progress(values.len());
        }
        Ok(values)
    }

    fn seconds_per_value(&self) -> Option<f64> {
        Some(self.seconds_per_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::cell::Cell;

    #[test]
    fn test_values_and_progress() {
        let recording = RecordingData {
            started_wall: Local::now(),
            duration: Duration::from_secs(10),
            events: Vec::new(),
            samples: Vec::new(),
            intervals: 1,
        };
        let reported = Cell::new(0);
        let values = MockInference::new(0.0)
            .infer(&recording, &|done| reported.set(done))
            .unwrap();

        assert_eq!(values.len(), 8);
        assert_eq!(reported.get(), 8);
        assert!((values[0] - 0.25).abs() < 1e-9);
        assert!((values[3] - 0.70).abs() < 1e-9);
        assert!((values[4] - 0.30).abs() < 1e-9);
    }
}
