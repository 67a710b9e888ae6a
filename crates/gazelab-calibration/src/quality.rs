// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Calibration quality scoring

use serde::Serialize;
use std::fmt;

use gazelab_tracker::{CalibrationResult, MIN_VALID_POINTS};

/// Tri-state attempt quality. `Failed` is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Ok,
    Low,
    Failed,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Ok => "ok",
            Quality::Low => "low",
            Quality::Failed => "failed",
        }
    }

    /// Good enough to record with
    pub fn is_usable(&self) -> bool {
        matches!(self, Quality::Ok | Quality::Low)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Development override forcing an attempt's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityOverride {
    Failed,
    Low,
}

/// Thresholds applied to a final result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub ok: f64,
    pub low: f64,
}

/// Scored attempt: quality plus the error reported with it (none on failure)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub quality: Quality,
    pub average_error: Option<f64>,
}

/// Fewer than [`MIN_VALID_POINTS`] validated points always fails
pub fn score(result: &CalibrationResult, thresholds: &Thresholds) -> Score {
    if result.valid_points < MIN_VALID_POINTS {
        return Score {
            quality: Quality::Failed,
            average_error: None,
        };
    }
    let error = result.average_error;
    let quality = if error < thresholds.ok {
        Quality::Ok
    } else if error < thresholds.low {
        Quality::Low
    } else {
        Quality::Failed
    };
    Score {
        quality,
        average_error: (quality != Quality::Failed).then_some(error),
    }
}

/// Outcome forced by an override; `Low` reports an error just under the
/// low threshold
pub fn score_override(forced: QualityOverride, thresholds: &Thresholds) -> Score {
    match forced {
        QualityOverride::Failed => Score {
            quality: Quality::Failed,
            average_error: None,
        },
        QualityOverride::Low => Score {
            quality: Quality::Low,
            average_error: Some(thresholds.low - 0.1),
        },
    }
}
