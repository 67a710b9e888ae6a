// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Timestamped record of one calibration attempt

use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Which stimulus path an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationPath {
    Led,
    Overlay,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationLogEntry {
    /// Milliseconds since the attempt started
    pub elapsed_ms: u64,
    /// Local wall clock, `HH:MM:SS.mmm`
    pub wall_time: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<CalibrationPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Shared between the orchestrator and its configuring thread
#[derive(Clone)]
pub struct CalibrationLog {
    t0: Instant,
    entries: Arc<Mutex<Vec<CalibrationLogEntry>>>,
}

impl CalibrationLog {
    pub fn new() -> Self {
        Self {
            t0: Instant::now(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn step(&self, event: &str, path: Option<CalibrationPath>, ok: bool) {
        self.push(event, path, Some(ok), None, None);
    }

    pub fn step_with_detail(
        &self,
        event: &str,
        path: Option<CalibrationPath>,
        ok: bool,
        detail: impl Into<String>,
    ) {
        self.push(event, path, Some(ok), None, Some(detail.into()));
    }

    pub fn note(&self, event: &str, path: Option<CalibrationPath>, detail: impl Into<String>) {
        self.push(event, path, None, None, Some(detail.into()));
    }

    pub fn point(&self, event: &str, pt: u32, detail: impl Into<String>) {
        self.push(event, Some(CalibrationPath::Led), None, Some(pt), Some(detail.into()));
    }

    fn push(
        &self,
        event: &str,
        path: Option<CalibrationPath>,
        ok: Option<bool>,
        pt: Option<u32>,
        detail: Option<String>,
    ) {
        let entry = CalibrationLogEntry {
            elapsed_ms: self.t0.elapsed().as_millis() as u64,
            wall_time: Local::now().format("%H:%M:%S%.3f").to_string(),
            event: event.to_string(),
            path,
            ok,
            pt,
            detail,
        };
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<CalibrationLogEntry> {
        self.entries.lock().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.event.clone()).collect()
    }
}

impl Default for CalibrationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_serialize_without_empty_fields() {
        let log = CalibrationLog::new();
        log.step("calibrate_clear", Some(CalibrationPath::Led), true);
        log.point("point_start", 2, "calx=0.00 caly=1.00");

        let entries = log.entries();
        assert_eq!(log.events(), vec!["calibrate_clear", "point_start"]);
        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["path"], "led");
        assert_eq!(json["ok"], true);
        assert!(json.get("pt").is_none());
        assert_eq!(serde_json::to_value(&entries[1]).unwrap()["pt"], 2);
    }
}
