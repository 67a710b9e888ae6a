// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! JSON-lines session recorder.
//!
//! Each session gets `<output_dir>/<YYYYmmdd_HHMMSS>/` holding
//! `events.jsonl`, `samples.jsonl` (every 10th sample), `results.jsonl`
//! and `calibration.jsonl`.

use chrono::Local;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use gazelab_calibration::{CalibrationOutcome, CalibrationReport};

use crate::collaborators::SessionRecorder;
use crate::error::Result;
use crate::machine::RecordingData;
use crate::markers::{format_elapsed, SessionEvent};
use crate::results::ResultsPage;

/// Keep one sample in this many
pub const SAMPLE_STRIDE: usize = 10;

#[derive(Serialize)]
struct SampleLine {
    t: f64,
    gx: f64,
    gy: f64,
    pupil: f64,
    valid: bool,
}

#[derive(Serialize)]
struct OutcomeLine<'a> {
    outcome: &'a CalibrationOutcome,
}

pub struct JsonLinesRecorder {
    root: PathBuf,
    session_dir: Option<PathBuf>,
}

impl JsonLinesRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            session_dir: None,
        }
    }

    /// Folder of the current session, once something was written
    pub fn session_dir(&self) -> Option<&Path> {
        self.session_dir.as_deref()
    }

    fn ensure_session_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.session_dir {
            return Ok(dir.clone());
        }
        let dir = self.root.join(Local::now().format("%Y%m%d_%H%M%S").to_string());
        fs::create_dir_all(&dir)?;
        info!("[SESSION] Recording to {}", dir.display());
        self.session_dir = Some(dir.clone());
        Ok(dir)
    }

    fn write_lines<T, I>(&mut self, file_name: &str, lines: I) -> Result<()>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let path = self.ensure_session_dir()?.join(file_name);
        let mut writer = BufWriter::new(File::create(&path)?);
        for line in lines {
            serde_json::to_writer(&mut writer, &line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl SessionRecorder for JsonLinesRecorder {
    fn begin_session(&mut self) {
        self.session_dir = None;
    }

    fn record_recording(&mut self, recording: &RecordingData) -> Result<()> {
        let end_wall = recording.started_wall
            + chrono::Duration::milliseconds(recording.duration.as_millis() as i64);
        let end_ms = recording.duration.as_millis() as u64;
        let mut events = Vec::with_capacity(recording.events.len() + 2);
        events.push(SessionEvent {
            elapsed_ms: 0,
            elapsed: format_elapsed(0),
            wall_time: recording.started_wall.format("%H:%M:%S%.3f").to_string(),
            label: "SESSION_START".to_string(),
        });
        events.extend(recording.events.iter().cloned());
        events.push(SessionEvent {
            elapsed_ms: end_ms,
            elapsed: format_elapsed(end_ms),
            wall_time: end_wall.format("%H:%M:%S%.3f").to_string(),
            label: "SESSION_END".to_string(),
        });
        self.write_lines("events.jsonl", events)?;

        let samples = recording
            .samples
            .iter()
            .step_by(SAMPLE_STRIDE)
            .map(|s| SampleLine {
                t: s.t,
                gx: s.gx,
                gy: s.gy,
                pupil: s.pupil,
                valid: s.valid,
            });
        self.write_lines("samples.jsonl", samples)
    }

    fn record_results(&mut self, pages: &[ResultsPage]) -> Result<()> {
        self.write_lines("results.jsonl", pages.iter())
    }

    fn record_calibration(&mut self, report: &CalibrationReport) -> Result<()> {
        let path = self.ensure_session_dir()?.join("calibration.jsonl");
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &OutcomeLine { outcome: &report.outcome })?;
        writer.write_all(b"\n")?;
        for entry in &report.log {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}
