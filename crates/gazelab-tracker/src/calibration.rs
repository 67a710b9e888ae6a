// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Calibration progress and result records read from the stream

use serde::Serialize;
use std::time::Instant;

use crate::protocol::Attributes;

/// Points that must validate for a final result to count as a success
pub const MIN_VALID_POINTS: usize = 4;

/// Latest point announcement from the device
///
/// `started_at` is the instant the reader saw `CALIB_START_PT`; it is the
/// only timing origin the LED sync uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPointProgress {
    pub pt: u32,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
    pub calx: Option<f64>,
    pub caly: Option<f64>,
}

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultSource {
    /// Interim `CALIBRATE_RESULT_SUMMARY` acknowledgement; never completion
    Summary,
    /// `CALIB_RESULT` emitted when the device finishes the sequence
    Final,
}

/// Per-point detail of a final result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub index: u32,
    pub calx: f64,
    pub caly: f64,
    pub lx: Option<f64>,
    pub ly: Option<f64>,
    pub lv: bool,
    pub rx: Option<f64>,
    pub ry: Option<f64>,
    pub rv: bool,
}

impl CalibrationPoint {
    pub fn is_valid(&self) -> bool {
        self.lv || self.rv
    }

    /// Euclidean deviation for each valid eye with observed coordinates
    pub fn eye_errors(&self) -> Vec<f64> {
        let mut errors = Vec::with_capacity(2);
        if self.lv {
            if let (Some(x), Some(y)) = (self.lx, self.ly) {
                errors.push((x - self.calx).hypot(y - self.caly));
            }
        }
        if self.rv {
            if let (Some(x), Some(y)) = (self.rx, self.ry) {
                errors.push((x - self.calx).hypot(y - self.caly));
            }
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationResult {
    pub average_error: f64,
    pub valid_points: usize,
    pub success: bool,
    pub source: ResultSource,
    pub points: Vec<CalibrationPoint>,
}

impl CalibrationResult {
    /// Compute a final result from a `CALIB_RESULT` message.
    ///
    /// Points are numbered from 1; a point without both target coordinates
    /// is ignored. Error is averaged over every valid eye's deviation.
    pub fn from_final(attrs: &Attributes) -> Self {
        let mut indices: Vec<u32> = attrs
            .keys()
            .filter_map(|k| k.strip_prefix("CALX"))
            .filter_map(|n| n.parse::<u32>().ok())
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let points: Vec<CalibrationPoint> = indices
            .into_iter()
            .filter_map(|n| {
                let calx = attrs.f64(&format!("CALX{}", n))?;
                let caly = attrs.f64(&format!("CALY{}", n))?;
                Some(CalibrationPoint {
                    index: n,
                    calx,
                    caly,
                    lx: attrs.f64(&format!("LX{}", n)),
                    ly: attrs.f64(&format!("LY{}", n)),
                    lv: attrs.i64(&format!("LV{}", n)) == Some(1),
                    rx: attrs.f64(&format!("RX{}", n)),
                    ry: attrs.f64(&format!("RY{}", n)),
                    rv: attrs.i64(&format!("RV{}", n)) == Some(1),
                })
            })
            .collect();

        let valid_points = points.iter().filter(|p| p.is_valid()).count();
        let errors: Vec<f64> = points
            .iter()
            .filter(|p| p.is_valid())
            .flat_map(|p| p.eye_errors())
            .collect();
        let average_error = if errors.is_empty() {
            0.0
        } else {
            errors.iter().sum::<f64>() / errors.len() as f64
        };

        CalibrationResult {
            average_error,
            valid_points,
            success: valid_points >= MIN_VALID_POINTS,
            source: ResultSource::Final,
            points,
        }
    }

    /// Interim summary from the acknowledgement of a summary request.
    /// Returns `None` when the acknowledgement carried neither field.
    pub fn from_summary(attrs: &Attributes) -> Option<Self> {
        let average_error = attrs.f64("AVE_ERROR");
        let valid_points = attrs.i64("VALID_POINTS");
        if average_error.is_none() && valid_points.is_none() {
            return None;
        }
        let valid_points = valid_points.unwrap_or(0).max(0) as usize;
        Some(CalibrationResult {
            average_error: average_error.unwrap_or(0.0),
            valid_points,
            success: valid_points >= MIN_VALID_POINTS,
            source: ResultSource::Summary,
            points: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_attributes;

    fn point(n: u32, err: f64, lv: u8, rv: u8) -> String {
        format!(
            r#"CALX{n}="0.5" CALY{n}="0.5" LX{n}="{x}" LY{n}="0.5" LV{n}="{lv}" RX{n}="{x}" RY{n}="0.5" RV{n}="{rv}""#,
            n = n,
            x = 0.5 + err,
            lv = lv,
            rv = rv
        )
    }

    #[test]
    fn test_five_valid_points() {
        let body: Vec<String> = (1..=5).map(|n| point(n, 0.6, 1, 1)).collect();
        let line = format!(r#"<CAL ID="CALIB_RESULT" {} />"#, body.join(" "));
        let result = CalibrationResult::from_final(&parse_attributes(&line));

        assert_eq!(result.valid_points, 5);
        assert!(result.success);
        assert!((result.average_error - 0.6).abs() < 1e-9);
        assert_eq!(result.source, ResultSource::Final);
    }

    #[test]
    fn test_three_valid_points_is_not_success() {
        let body = vec![
            point(1, 0.1, 1, 0),
            point(2, 0.1, 0, 1),
            point(3, 0.1, 1, 1),
            point(4, 0.1, 0, 0),
            point(5, 0.1, 0, 0),
        ];
        let line = format!(r#"<CAL ID="CALIB_RESULT" {} />"#, body.join(" "));
        let result = CalibrationResult::from_final(&parse_attributes(&line));
        assert_eq!(result.valid_points, 3);
        assert!(!result.success);
    }

    #[test]
    fn test_point_without_target_is_ignored() {
        let line = r#"<CAL ID="CALIB_RESULT" CALX1="0.5" LV1="1" LX1="0.5" LY1="0.5" />"#;
        let result = CalibrationResult::from_final(&parse_attributes(line));
        assert!(result.points.is_empty());
        assert_eq!(result.average_error, 0.0);
    }

    #[test]
    fn test_summary_requires_fields() {
        let attrs = parse_attributes(r#"<ACK ID="CALIBRATE_RESULT_SUMMARY" AVE_ERROR="0.8" VALID_POINTS="5" />"#);
        let summary = CalibrationResult::from_summary(&attrs).unwrap();
        assert_eq!(summary.source, ResultSource::Summary);
        assert_eq!(summary.valid_points, 5);

        let empty = parse_attributes(r#"<ACK ID="CALIBRATE_RESULT_SUMMARY" />"#);
        assert!(CalibrationResult::from_summary(&empty).is_none());
    }
}
