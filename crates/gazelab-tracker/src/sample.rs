// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Gaze sample construction from data records

use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::Attributes;

/// Fallback pupil value when neither eye reports a diameter
pub const DEFAULT_PUPIL: f64 = 2.5;

/// One gaze-position estimator with its coordinate and validity attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PogSource {
    pub name: &'static str,
    pub x: &'static str,
    pub y: &'static str,
    pub valid: &'static str,
}

/// Gaze position preference order: best, fixation, left eye, right eye.
/// A record with none of these yields a centered, invalid sample.
pub const POG_PREFERENCE: [PogSource; 4] = [
    PogSource { name: "best", x: "BPOGX", y: "BPOGY", valid: "BPOGV" },
    PogSource { name: "fixation", x: "FPOGX", y: "FPOGY", valid: "FPOGV" },
    PogSource { name: "left", x: "LPOGX", y: "LPOGY", valid: "LPOGV" },
    PogSource { name: "right", x: "RPOGX", y: "RPOGY", valid: "RPOGV" },
];

/// One parsed data record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GazeSample {
    /// Host receive time, seconds since the Unix epoch
    pub t: f64,
    /// Normalized gaze, always within [0, 1]
    pub gx: f64,
    pub gy: f64,
    pub pupil: f64,
    pub valid: bool,
    /// Which estimator supplied gx/gy ("center" when none did)
    pub source: &'static str,
    /// Eye distances in meters, present only while the eye's validity flag holds
    pub leyez: Option<f64>,
    pub reyez: Option<f64>,
    pub lpv: bool,
    pub rpv: bool,
    pub lpupild: Option<f64>,
    pub rpupild: Option<f64>,
    pub lpd: Option<f64>,
    pub rpd: Option<f64>,
    pub lpupilv: bool,
    pub rpupilv: bool,
    pub bpogv: bool,
    pub fpogv: bool,
    pub lpogv: bool,
    pub rpogv: bool,
    pub raw: HashMap<String, String>,
}

impl GazeSample {
    /// Build a sample stamped with the current wall time
    pub fn from_record(attrs: &Attributes) -> Self {
        Self::from_record_at(attrs, now_epoch_secs())
    }

    /// Build a sample from a record's attributes
    pub fn from_record_at(attrs: &Attributes, t: f64) -> Self {
        let (gx, gy, valid, source) = select_position(attrs);

        let lpd = attrs.f64("LPD");
        let rpd = attrs.f64("RPD");
        let pupil = match (lpd, rpd) {
            (Some(l), Some(r)) => (l + r) / 2.0,
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => DEFAULT_PUPIL,
        };

        let lpv = attrs.flag("LPV").unwrap_or(false);
        let rpv = attrs.flag("RPV").unwrap_or(false);
        let lpupilv_raw = attrs.flag("LPUPILV");
        let rpupilv_raw = attrs.flag("RPUPILV");

        // The 3D validity flag decides when present; otherwise the 2D pupil flag.
        let left_ok = lpupilv_raw.unwrap_or(lpv);
        let right_ok = rpupilv_raw.unwrap_or(rpv);

        let leyez = attrs.f64("LEYEZ").filter(|_| left_ok);
        let reyez = attrs.f64("REYEZ").filter(|_| right_ok);

        GazeSample {
            t,
            gx,
            gy,
            pupil,
            valid,
            source,
            leyez,
            reyez,
            lpv,
            rpv,
            lpupild: attrs.f64("LPUPILD"),
            rpupild: attrs.f64("RPUPILD"),
            lpd,
            rpd,
            lpupilv: lpupilv_raw.unwrap_or(false),
            rpupilv: rpupilv_raw.unwrap_or(false),
            bpogv: attrs.flag("BPOGV").unwrap_or(false),
            fpogv: attrs.flag("FPOGV").unwrap_or(false),
            lpogv: attrs.flag("LPOGV").unwrap_or(false),
            rpogv: attrs.flag("RPOGV").unwrap_or(false),
            raw: attrs.raw_map(),
        }
    }

    /// Freshest eye distance in centimeters, left eye preferred
    pub fn eye_distance_cm(&self) -> Option<f64> {
        self.leyez.or(self.reyez).map(|z| z * 100.0)
    }
}

/// Walk the preference list; a source needs both coordinates to be chosen
fn select_position(attrs: &Attributes) -> (f64, f64, bool, &'static str) {
    for source in POG_PREFERENCE.iter() {
        if let (Some(x), Some(y)) = (attrs.f64(source.x), attrs.f64(source.y)) {
            let valid = attrs.flag(source.valid).unwrap_or(false);
            return (clamp_unit(x), clamp_unit(y), valid, source.name);
        }
    }
    (0.5, 0.5, false, "center")
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.5
    } else {
        v.clamp(0.0, 1.0)
    }
}

pub(crate) fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
