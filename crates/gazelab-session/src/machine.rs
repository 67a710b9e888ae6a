// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The operator FLOW.
//!
//! [`SessionMachine`] owns all session data and never touches a device.
//! Each call consumes one input (a button edge, a tick, a batch of samples,
//! a collaborator result) and returns the [`SessionAction`]s the caller
//! must carry out. Clocks arrive through [`StepContext`], so tests step it
//! with synthetic instants.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use gazelab_calibration::{CalibrationOutcome, Quality};
use gazelab_config::SessionConfig;
use gazelab_coprocessor::ButtonEdge;
use gazelab_tracker::GazeSample;

use crate::flow::FlowState;
use crate::input::{BTN_A, BTN_B, BTN_CENTER, BTN_LEFT, BTN_RIGHT};
use crate::markers::{MarkerLog, SessionEvent};
use crate::position::{EyeMonitor, PositionStatus};
use crate::results::{build_pages, expected_values, ResultsPage, ResultsView};
use crate::snapshot::{
    CalibrationView, InferenceView, RecordingView, ResultsPageView, SessionSnapshot, StepContext,
};

/// Work the caller performs on the machine's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// The visible screen changed
    Screen(FlowState),
    /// Session data was discarded; abandon calibration and inference
    Reset,
    StartCalibration,
    RecordingStarted,
    /// Recording stopped; hand the data to the inference collaborator
    BeginInference(RecordingData),
    /// Inference output is paged and ready to persist
    ResultsReady(Vec<ResultsPage>),
}

/// Immutable copy of one recording, markers already closed
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingData {
    pub started_wall: DateTime<Local>,
    pub duration: Duration,
    pub events: Vec<SessionEvent>,
    pub samples: Vec<GazeSample>,
    /// Completed marker intervals
    pub intervals: usize,
}

struct Recording {
    t0: Instant,
    started_wall: DateTime<Local>,
    markers: MarkerLog,
    samples: Vec<GazeSample>,
}

struct InferenceProgress {
    intervals: usize,
    done: usize,
    total: usize,
    started: Instant,
    seconds_per_value: Option<f64>,
}

#[derive(Default)]
struct CalibrationState {
    quality: Option<Quality>,
    average_error: Option<f64>,
    message: Option<String>,
}

pub struct SessionMachine {
    refresh: Duration,
    info_for: Duration,
    state: FlowState,
    /// State to return to when the monitoring modal is released
    prev_state: Option<FlowState>,
    eyes: EyeMonitor,
    next_hint_eval: Option<Instant>,
    calibration: CalibrationState,
    recording: Option<Recording>,
    frozen: Option<RecordingView>,
    inference: Option<InferenceProgress>,
    results: ResultsView,
    info: Option<(String, Instant)>,
}

impl SessionMachine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            refresh: Duration::from_millis(config.effective_ui_refresh_ms()),
            info_for: Duration::from_millis(config.info_message_ms),
            state: FlowState::Boot,
            prev_state: None,
            eyes: EyeMonitor::new(config),
            next_hint_eval: None,
            calibration: CalibrationState::default(),
            recording: None,
            frozen: None,
            inference: None,
            results: ResultsView::default(),
            info: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn prev_state(&self) -> Option<FlowState> {
        self.prev_state
    }

    /// The FLOW state beneath the monitoring modal
    pub fn underlying_state(&self) -> FlowState {
        match self.state {
            FlowState::Monitoring => self.prev_state.unwrap_or(FlowState::Boot),
            state => state,
        }
    }

    /// Markers of the recording in progress
    pub fn events(&self) -> &[SessionEvent] {
        self.recording.as_ref().map(|r| r.markers.events()).unwrap_or(&[])
    }

    pub fn marker_open(&self) -> bool {
        self.recording.as_ref().map(|r| r.markers.is_open()).unwrap_or(false)
    }

    pub fn recorded_samples(&self) -> usize {
        self.recording.as_ref().map(|r| r.samples.len()).unwrap_or(0)
    }

    pub fn calibration_quality(&self) -> Option<Quality> {
        self.calibration.quality
    }

    pub fn results(&self) -> &ResultsView {
        &self.results
    }

    pub fn position(&self, now: Instant) -> PositionStatus {
        self.eyes.classify(now)
    }

    /// Show a transient operator message
    pub fn notify(&mut self, message: impl Into<String>, now: Instant) {
        let message = message.into();
        info!("[SESSION] {}", message);
        self.info = Some((message, now + self.info_for));
    }

    pub fn info(&self, now: Instant) -> Option<&str> {
        match &self.info {
            Some((message, until)) if now < *until => Some(message.as_str()),
            _ => None,
        }
    }

    /// Apply one button edge
    pub fn handle_button(&mut self, edge: &ButtonEdge, ctx: &StepContext) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        debug!("[SESSION] {} in {}", edge, self.state);

        // Reset wins over everything, monitoring included
        if edge.is_press() && edge.button == BTN_CENTER {
            return self.reset(ctx);
        }

        if edge.button == BTN_B {
            if edge.is_press() && self.state != FlowState::Monitoring {
                self.prev_state = Some(self.state);
                self.enter(FlowState::Monitoring, ctx, &mut actions);
            } else if !edge.is_press() && self.state == FlowState::Monitoring {
                let back = self.prev_state.take().unwrap_or(FlowState::Boot);
                self.enter(back, ctx, &mut actions);
            }
            return actions;
        }

        if self.state == FlowState::Monitoring || !edge.is_press() {
            return actions;
        }

        let button = edge.button.as_str();
        match self.state {
            FlowState::Boot => {
                if button == BTN_RIGHT {
                    self.enter(FlowState::FindPosition, ctx, &mut actions);
                }
            }
            FlowState::FindPosition => {
                if button == BTN_RIGHT {
                    let hint = self.eyes.classify(ctx.now).hint_state();
                    self.enter(hint, ctx, &mut actions);
                }
            }
            FlowState::MoveCloser | FlowState::MoveFarther | FlowState::InPosition => {
                if button == BTN_RIGHT {
                    if self.eyes.classify(ctx.now) == PositionStatus::Good {
                        self.enter(FlowState::Calibration, ctx, &mut actions);
                    } else {
                        self.notify("Not in position yet", ctx.now);
                    }
                }
            }
            FlowState::Calibration => {
                let done = !ctx.calibration_running && self.calibration.quality.is_some();
                if button == BTN_RIGHT {
                    if !ctx.calibration_running && self.calibration.quality.is_none() {
                        self.request_calibration(&mut actions);
                    } else if done && self.calibration.quality.map(|q| q.is_usable()).unwrap_or(false) {
                        self.enter(FlowState::RecordConfirmation, ctx, &mut actions);
                    }
                } else if button == BTN_LEFT && done {
                    self.request_calibration(&mut actions);
                }
            }
            FlowState::RecordConfirmation => {
                if button == BTN_RIGHT {
                    self.start_recording(ctx, &mut actions);
                }
            }
            FlowState::Recording => {
                if button == BTN_A {
                    self.toggle_marker(ctx);
                } else if button == BTN_RIGHT {
                    self.enter(FlowState::StopRecord, ctx, &mut actions);
                }
            }
            FlowState::StopRecord => {
                if button == BTN_LEFT {
                    self.enter(FlowState::Recording, ctx, &mut actions);
                } else if button == BTN_RIGHT {
                    self.stop_recording(ctx, &mut actions);
                }
            }
            FlowState::Results => {
                if button == BTN_RIGHT {
                    self.results.next();
                } else if button == BTN_LEFT {
                    self.results.prev();
                }
            }
            FlowState::InferenceLoading | FlowState::Monitoring => {}
        }
        actions
    }

    /// Return to BOOT and drop all session data. An open marker is
    /// discarded, never closed.
    pub fn reset(&mut self, ctx: &StepContext) -> Vec<SessionAction> {
        if let Some(recording) = self.recording.take() {
            info!(
                "[SESSION] Discarding recording ({} events, {} samples, marker open: {})",
                recording.markers.events().len(),
                recording.samples.len(),
                recording.markers.is_open()
            );
        }
        self.frozen = None;
        self.inference = None;
        self.results = ResultsView::default();
        self.calibration = CalibrationState::default();
        self.prev_state = None;
        self.info = None;
        self.next_hint_eval = None;

        let mut actions = vec![SessionAction::Reset];
        self.enter(FlowState::Boot, ctx, &mut actions);
        info!("[SESSION] Reset to BOOT");
        actions
    }

    /// Timed work: positioning hints re-classify every refresh interval
    pub fn tick(&mut self, ctx: &StepContext) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if matches!(&self.info, Some((_, until)) if ctx.now >= *until) {
            self.info = None;
        }
        if !self.state.is_position_hint() {
            return actions;
        }
        let due = self.next_hint_eval.map(|at| ctx.now >= at).unwrap_or(true);
        if due {
            self.next_hint_eval = Some(ctx.now + self.refresh);
            let hint = self.eyes.classify(ctx.now).hint_state();
            self.enter(hint, ctx, &mut actions);
        }
        actions
    }

    /// Feed drained tracker samples; kept only while recording
    pub fn ingest_samples(&mut self, samples: Vec<GazeSample>, now: Instant) {
        for sample in &samples {
            self.eyes.ingest(sample, now);
        }
        // Samples keep flowing into the recording under the monitoring modal
        if self.underlying_state() == FlowState::Recording {
            if let Some(recording) = self.recording.as_mut() {
                recording.samples.extend(samples);
            }
        }
    }

    pub fn on_calibration_finished(&mut self, outcome: &CalibrationOutcome, now: Instant) {
        self.calibration = CalibrationState {
            quality: Some(outcome.quality),
            average_error: outcome.average_error,
            message: Some(outcome.message.clone()),
        };
        self.notify(outcome.message.clone(), now);
    }

    /// Calibration could not be started (tracker missing, for instance)
    pub fn on_calibration_rejected(&mut self, message: impl Into<String>, now: Instant) {
        self.calibration = CalibrationState::default();
        self.notify(message, now);
    }

    pub fn on_inference_progress(&mut self, done: usize, seconds_per_value: Option<f64>) {
        if let Some(progress) = self.inference.as_mut() {
            progress.done = done.min(progress.total);
            progress.seconds_per_value = seconds_per_value;
        }
    }

    /// Page the raw output and show the results
    pub fn on_inference_complete(&mut self, raw: &[f64], ctx: &StepContext) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        let Some(progress) = self.inference.take() else {
            debug!("[SESSION] Ignoring inference output with no analysis pending");
            return actions;
        };
        if raw.len() != progress.total {
            debug!(
                "[SESSION] Inference returned {} values, expected {}",
                raw.len(),
                progress.total
            );
        }
        let pages = build_pages(raw, progress.intervals);
        self.results = ResultsView::new(pages.clone());
        actions.push(SessionAction::ResultsReady(pages));

        if self.state == FlowState::Monitoring {
            self.prev_state = Some(FlowState::Results);
        } else {
            self.enter(FlowState::Results, ctx, &mut actions);
        }
        actions
    }

    /// Results fall back to zeros so the operator can still leave the screen
    pub fn on_inference_failed(&mut self, message: &str, ctx: &StepContext) -> Vec<SessionAction> {
        if self.inference.is_none() {
            return Vec::new();
        }
        self.notify(format!("Analysis failed: {}", message), ctx.now);
        self.on_inference_complete(&[], ctx)
    }

    pub fn snapshot(&self, ctx: &StepContext) -> SessionSnapshot {
        let recording = match &self.recording {
            Some(recording) => {
                let elapsed = ctx.now.saturating_duration_since(recording.t0);
                Some(RecordingView {
                    elapsed,
                    event_open: recording.markers.is_open(),
                    event_elapsed: recording
                        .markers
                        .open_since()
                        .map(|since| elapsed.saturating_sub(since)),
                    event_index: recording.markers.current_index(),
                    samples: recording.samples.len(),
                    frozen: false,
                })
            }
            None => self.frozen,
        };
        let inference = self.inference.as_ref().map(|p| {
            let left = p.total.saturating_sub(p.done);
            let remaining = match p.seconds_per_value {
                Some(rate) => Some(Duration::from_secs_f64((left as f64 * rate).max(0.0))),
                None if p.done > 0 => {
                    let per_value = ctx.now.saturating_duration_since(p.started) / p.done as u32;
                    Some(per_value * left as u32)
                }
                None => None,
            };
            InferenceView {
                done: p.done,
                total: p.total,
                remaining,
            }
        });
        let results = self.results.current().map(|page| ResultsPageView {
            page: page.clone(),
            index: self.results.index(),
            count: self.results.pages().len(),
            has_prev: self.results.has_prev(),
            has_next: self.results.has_next(),
        });

        SessionSnapshot {
            state: self.state,
            devices: ctx.devices,
            position: self.eyes.classify(ctx.now),
            eyes: self.eyes.view(),
            calibration: CalibrationView {
                running: ctx.calibration_running,
                quality: self.calibration.quality,
                average_error: self.calibration.average_error,
                message: self.calibration.message.clone(),
                led_target: ctx.led_target,
            },
            recording,
            inference,
            results,
            info: self.info(ctx.now).map(str::to_string),
        }
    }

    fn enter(&mut self, state: FlowState, ctx: &StepContext, actions: &mut Vec<SessionAction>) {
        if state.is_position_hint() && !self.state.is_position_hint() {
            self.next_hint_eval = Some(ctx.now + self.refresh);
        }
        if self.state == state {
            return;
        }
        info!("[SESSION] {} -> {}", self.state, state);
        self.state = state;
        actions.push(SessionAction::Screen(state));
    }

    fn request_calibration(&mut self, actions: &mut Vec<SessionAction>) {
        self.calibration = CalibrationState::default();
        actions.push(SessionAction::StartCalibration);
    }

    fn start_recording(&mut self, ctx: &StepContext, actions: &mut Vec<SessionAction>) {
        if !ctx.devices.tracker_connected {
            self.notify("Tracker not connected", ctx.now);
            return;
        }
        self.recording = Some(Recording {
            t0: ctx.now,
            started_wall: ctx.wall,
            markers: MarkerLog::new(),
            samples: Vec::new(),
        });
        self.frozen = None;
        actions.push(SessionAction::RecordingStarted);
        self.enter(FlowState::Recording, ctx, actions);
    }

    fn toggle_marker(&mut self, ctx: &StepContext) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        let elapsed = ctx.now.saturating_duration_since(recording.t0);
        let event = recording.markers.toggle(elapsed, &ctx.wall);
        info!("[SESSION] Marker {} at {}", event.label, event.elapsed);
    }

    /// Stop recording, close any open marker and hand everything over
    fn stop_recording(&mut self, ctx: &StepContext, actions: &mut Vec<SessionAction>) {
        let Some(mut recording) = self.recording.take() else {
            return;
        };
        let elapsed = ctx.now.saturating_duration_since(recording.t0);
        self.frozen = Some(RecordingView {
            elapsed,
            event_open: recording.markers.is_open(),
            event_elapsed: recording
                .markers
                .open_since()
                .map(|since| elapsed.saturating_sub(since)),
            event_index: recording.markers.current_index(),
            samples: recording.samples.len(),
            frozen: true,
        });
        if let Some(event) = recording.markers.close_open(elapsed, &ctx.wall) {
            info!("[SESSION] Auto-closed marker with {}", event.label);
        }

        let intervals = recording.markers.interval_count();
        self.inference = Some(InferenceProgress {
            intervals,
            done: 0,
            total: expected_values(intervals),
            started: ctx.now,
            seconds_per_value: None,
        });
        self.enter(FlowState::InferenceLoading, ctx, actions);
        actions.push(SessionAction::BeginInference(RecordingData {
            started_wall: recording.started_wall,
            duration: elapsed,
            events: recording.markers.into_events(),
            samples: recording.samples,
            intervals,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazelab_coprocessor::InputSource;

    fn press(name: &str) -> ButtonEdge {
        ButtonEdge::press(name, InputSource::Local)
    }

    #[test]
    fn test_boot_advances_to_find_position_only_on_right() {
        let mut m = SessionMachine::new(&SessionConfig::default());
        let ctx = StepContext::at(Instant::now());
        assert!(m.handle_button(&press(BTN_LEFT), &ctx).is_empty());
        assert_eq!(
            m.handle_button(&press(BTN_RIGHT), &ctx),
            vec![SessionAction::Screen(FlowState::FindPosition)]
        );
        // Without eye data the participant counts as too far
        m.handle_button(&press(BTN_RIGHT), &ctx);
        assert_eq!(m.state(), FlowState::MoveCloser);
    }

    #[test]
    fn test_releases_are_ignored_outside_monitoring() {
        let mut m = SessionMachine::new(&SessionConfig::default());
        let ctx = StepContext::at(Instant::now());
        let release = ButtonEdge::release(BTN_RIGHT, InputSource::Coprocessor);
        assert!(m.handle_button(&release, &ctx).is_empty());
        assert_eq!(m.state(), FlowState::Boot);
    }

    #[test]
    fn test_info_message_expires() {
        let mut m = SessionMachine::new(&SessionConfig::default());
        let now = Instant::now();
        m.notify("hello", now);
        assert_eq!(m.info(now), Some("hello"));
        assert_eq!(m.info(now + Duration::from_millis(2001)), None);
    }

    #[test]
    fn test_reset_keeps_live_eye_reading() {
        let mut m = SessionMachine::new(&SessionConfig::default());
        let now = Instant::now();
        let ctx = StepContext::at(now);
        let record = gazelab_tracker::parse_attributes(r#"<REC LEYEZ="0.65" LPV="1" />"#);
        m.ingest_samples(vec![GazeSample::from_record_at(&record, 0.0)], now);
        m.handle_button(&press(BTN_RIGHT), &ctx);

        m.reset(&ctx);
        assert_eq!(m.state(), FlowState::Boot);
        assert_eq!(m.position(now), PositionStatus::Good);
        m.handle_button(&press(BTN_RIGHT), &ctx);
        m.handle_button(&press(BTN_RIGHT), &ctx);
        assert_eq!(m.state(), FlowState::InPosition);
    }
}
