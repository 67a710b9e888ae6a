// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! One calibration attempt, `Idle -> Configuring -> Running -> Finished`.
//!
//! Configuring issues the acknowledged tracker command sequence on its own
//! thread so the caller's loop keeps ticking. While running, each
//! [`CalibrationOrchestrator::tick`] re-derives the LED state from the
//! tracker's latest point snapshot, polls for an interim summary, and
//! finishes on a final result or on the overall timeout.

use crossbeam::channel::{bounded, Receiver};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use gazelab_config::{CalibrationConfig, CalibrationMethod};
use gazelab_tracker::{CalibrationResult, ResultSource, MIN_VALID_POINTS};

use crate::debug_log::{CalibrationLog, CalibrationLogEntry, CalibrationPath};
use crate::devices::{CalibrationLeds, CalibrationTracker};
use crate::error::{CalibrationError, Result};
use crate::led_sync::{led_command, target_for, LedCommand, LedTarget, CORNER_POINTS};
use crate::quality::{score, score_override, Quality, QualityOverride, Score, Thresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    Configuring,
    Running,
    Finished,
}

/// Why an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The tracker reported a final result
    Result,
    /// A development override was injected while running
    Override,
    Timeout,
    /// Every configured path failed to configure or start
    ConfigureFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationOutcome {
    pub quality: Quality,
    pub average_error: Option<f64>,
    pub valid_points: usize,
    pub reason: CompletionReason,
    pub method: &'static str,
    /// Operator-facing one-liner
    pub message: String,
}

/// Handed to the caller once per attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub outcome: CalibrationOutcome,
    pub log: Vec<CalibrationLogEntry>,
}

/// Paths that survived configuration
#[derive(Debug, Clone, Copy)]
struct ConfigureReport {
    led: bool,
    overlay: bool,
    started_at: Instant,
}

struct Attempt {
    method: CalibrationMethod,
    forced: Option<QualityOverride>,
    log: CalibrationLog,
    cancel: Arc<AtomicBool>,
    configured: Option<Receiver<ConfigureReport>>,
    led_active: bool,
    overlay_active: bool,
    started_at: Option<Instant>,
    last_summary_poll: Option<Instant>,
    last_point: Option<(u32, Instant)>,
    last_point_end: Option<(u32, Instant)>,
    led: LedCommand,
    target: Option<LedTarget>,
}

pub struct CalibrationOrchestrator {
    config: CalibrationConfig,
    tracker: Arc<dyn CalibrationTracker>,
    leds: Option<Arc<dyn CalibrationLeds>>,
    phase: CalibrationPhase,
    attempt: Option<Attempt>,
    last_outcome: Option<CalibrationOutcome>,
}

impl CalibrationOrchestrator {
    pub fn new(
        config: &CalibrationConfig,
        tracker: Arc<dyn CalibrationTracker>,
        leds: Option<Arc<dyn CalibrationLeds>>,
    ) -> Self {
        Self {
            config: config.clone(),
            tracker,
            leds,
            phase: CalibrationPhase::Idle,
            attempt: None,
            last_outcome: None,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Configuring or running
    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            CalibrationPhase::Configuring | CalibrationPhase::Running
        )
    }

    pub fn last_outcome(&self) -> Option<&CalibrationOutcome> {
        self.last_outcome.as_ref()
    }

    /// (led, overlay) paths running in the current attempt
    pub fn active_paths(&self) -> (bool, bool) {
        match &self.attempt {
            Some(attempt) if self.phase == CalibrationPhase::Running => {
                (attempt.led_active, attempt.overlay_active)
            }
            _ => (false, false),
        }
    }

    /// LED state most recently applied by the running attempt
    pub fn current_led(&self) -> LedCommand {
        match &self.attempt {
            Some(attempt) if self.phase == CalibrationPhase::Running => attempt.led,
            _ => LedCommand::Off,
        }
    }

    /// Logical point the tracker is currently sampling
    pub fn current_target(&self) -> Option<LedTarget> {
        match &self.attempt {
            Some(attempt) if self.phase == CalibrationPhase::Running => attempt.target,
            _ => None,
        }
    }

    /// Begin an attempt. `forced` replaces the scored quality once the
    /// tracker reports its result.
    pub fn start(&mut self, forced: Option<QualityOverride>) -> Result<()> {
        if self.is_active() {
            return Err(CalibrationError::AlreadyRunning);
        }
        if !self.tracker.is_connected() {
            return Err(CalibrationError::NotConnected);
        }

        let method = self.config.method();
        let log = CalibrationLog::new();
        log.note(
            "calibration_start",
            None,
            format!("method={} override={:?}", method.as_str(), forced),
        );
        self.tracker.reset_calibration_progress();
        self.tracker.clear_calibration_results();

        let (tx, rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let job = ConfigureJob {
            config: self.config.clone(),
            method,
            tracker: Arc::clone(&self.tracker),
            log: log.clone(),
            cancel: Arc::clone(&cancel),
        };
        thread::Builder::new()
            .name("gazelab-calib-config".to_string())
            .spawn(move || {
                let report = job.run();
                let _ = tx.send(report);
            })
            .map_err(|e| CalibrationError::ThreadError(e.to_string()))?;

        info!("[CALIB] Attempt started (method {})", method.as_str());
        self.attempt = Some(Attempt {
            method,
            forced,
            log,
            cancel,
            configured: Some(rx),
            led_active: false,
            overlay_active: false,
            started_at: None,
            last_summary_poll: None,
            last_point: None,
            last_point_end: None,
            led: LedCommand::Off,
            target: None,
        });
        self.phase = CalibrationPhase::Configuring;
        Ok(())
    }

    /// Complete the running attempt immediately with a forced outcome
    pub fn inject_override(&mut self, forced: QualityOverride) -> Option<CalibrationReport> {
        if !self.is_active() {
            return None;
        }
        let score = score_override(forced, &self.thresholds());
        let outcome = self.outcome(score, 0, CompletionReason::Override);
        Some(self.finish(outcome, false))
    }

    /// Abandon the attempt without an outcome and leave the tracker clean
    pub fn cancel(&mut self) {
        let Some(attempt) = self.attempt.take() else {
            self.phase = CalibrationPhase::Idle;
            return;
        };
        attempt.cancel.store(true, Ordering::SeqCst);
        if self.phase != CalibrationPhase::Finished {
            if let Some(leds) = &self.leds {
                leds.all_off();
            }
            self.spawn_cleanup(true);
            info!("[CALIB] Attempt cancelled");
        }
        self.phase = CalibrationPhase::Idle;
    }

    /// Advance the attempt; returns the report once it finishes
    pub fn tick(&mut self, now: Instant) -> Option<CalibrationReport> {
        match self.phase {
            CalibrationPhase::Configuring => self.poll_configured(),
            CalibrationPhase::Running => self.tick_running(now),
            CalibrationPhase::Idle | CalibrationPhase::Finished => None,
        }
    }

    fn poll_configured(&mut self) -> Option<CalibrationReport> {
        let attempt = self.attempt.as_mut()?;
        let report = attempt.configured.as_ref()?.try_recv().ok()?;
        attempt.configured = None;

        if !report.led && !report.overlay {
            warn!("[CALIB] No calibration path could be started");
            let outcome = CalibrationOutcome {
                quality: Quality::Failed,
                average_error: None,
                valid_points: 0,
                reason: CompletionReason::ConfigureFailed,
                method: attempt.method.as_str(),
                message: "Failed to configure calibration".to_string(),
            };
            attempt.log.note("calibration_abort", None, "no path started");
            return Some(self.finish(outcome, false));
        }

        attempt.led_active = report.led;
        attempt.overlay_active = report.overlay;
        attempt.started_at = Some(report.started_at);
        self.phase = CalibrationPhase::Running;
        info!(
            "[CALIB] Running (led={}, overlay={})",
            report.led, report.overlay
        );
        None
    }

    fn tick_running(&mut self, now: Instant) -> Option<CalibrationReport> {
        let progress = self.tracker.point_progress();
        let result = self.tracker.calibration_result();
        let attempt = self.attempt.as_mut()?;

        if attempt.led_active {
            if let Some(p) = &progress {
                let key = (p.pt, p.started_at);
                if attempt.last_point != Some(key) {
                    attempt.last_point = Some(key);
                    attempt
                        .log
                        .point("point_start", p.pt, format!("calx={:?} caly={:?}", p.calx, p.caly));
                }
                if let Some(ended_at) = p.ended_at {
                    if attempt.last_point_end != Some((p.pt, ended_at)) {
                        attempt.last_point_end = Some((p.pt, ended_at));
                        attempt.log.point(
                            "point_end",
                            p.pt,
                            format!("after {:.3}s", ended_at.saturating_duration_since(p.started_at).as_secs_f64()),
                        );
                    }
                }
            }
            attempt.target = progress
                .as_ref()
                .and_then(|p| target_for(p, self.config.center_tolerance));
            let command = led_command(progress.as_ref(), now, &self.config);
            attempt.led = command;
            if let Some(leds) = &self.leds {
                let color = self.config.led_color;
                match command {
                    LedCommand::Off => leds.all_off(),
                    LedCommand::Single(index) => leds.set_led(index, color),
                    LedCommand::All => leds.all_on(color),
                };
            }
        }

        if let Some(result) = result.filter(|r| r.source == ResultSource::Final) {
            attempt.log.note(
                "result_seen",
                None,
                format!(
                    "valid_points={} avg_error={:.4} success={}",
                    result.valid_points, result.average_error, result.success
                ),
            );
            let outcome = self.score_result(&result);
            return Some(self.finish(outcome, false));
        }

        let started_at = attempt.started_at?;
        let elapsed = now.saturating_duration_since(started_at);

        if elapsed > self.config.attempt_timeout() {
            warn!("[CALIB] No result after {:.1}s, aborting", elapsed.as_secs_f64());
            attempt
                .log
                .note("calibration_timeout", None, format!("elapsed={:.3}s", elapsed.as_secs_f64()));
            let outcome = CalibrationOutcome {
                quality: Quality::Failed,
                average_error: None,
                valid_points: 0,
                reason: CompletionReason::Timeout,
                method: attempt.method.as_str(),
                message: "Calibration timeout, please try again".to_string(),
            };
            return Some(self.finish(outcome, true));
        }

        if elapsed > self.config.summary_poll_after() {
            let due = attempt
                .last_summary_poll
                .map(|last| now.saturating_duration_since(last) >= self.config.summary_poll_interval())
                .unwrap_or(true);
            if due {
                attempt.last_summary_poll = Some(now);
                self.spawn_summary_poll(elapsed);
            }
        }
        None
    }

    fn score_result(&self, result: &CalibrationResult) -> CalibrationOutcome {
        let forced = self.attempt.as_ref().and_then(|a| a.forced);
        let score = match forced {
            Some(forced) => score_override(forced, &self.thresholds()),
            None => score(result, &self.thresholds()),
        };
        let reason = if forced.is_some() {
            CompletionReason::Override
        } else {
            CompletionReason::Result
        };
        let mut outcome = self.outcome(score, result.valid_points, reason);
        if forced.is_none() && score.quality == Quality::Failed {
            outcome.message = if result.valid_points < MIN_VALID_POINTS {
                format!(
                    "Calibration failed ({} of {} points valid), try again",
                    result.valid_points,
                    result.points.len().max(result.valid_points)
                )
            } else {
                format!("Calibration failed (error: {:.2}), try again", result.average_error)
            };
        }
        outcome
    }

    fn outcome(&self, score: Score, valid_points: usize, reason: CompletionReason) -> CalibrationOutcome {
        let method = self
            .attempt
            .as_ref()
            .map(|a| a.method)
            .unwrap_or_else(|| self.config.method());
        let message = match score.quality {
            Quality::Ok => "Calibration complete",
            Quality::Low => "Ready, low quality calibration",
            Quality::Failed => "Calibration failed, try again",
        };
        CalibrationOutcome {
            quality: score.quality,
            average_error: score.average_error,
            valid_points,
            reason,
            method: method.as_str(),
            message: message.to_string(),
        }
    }

    fn finish(&mut self, outcome: CalibrationOutcome, stop_tracker: bool) -> CalibrationReport {
        if let Some(leds) = &self.leds {
            leds.all_off();
        }
        self.spawn_cleanup(stop_tracker);

        let log = match self.attempt.as_mut() {
            Some(attempt) => {
                attempt.cancel.store(true, Ordering::SeqCst);
                attempt.led = LedCommand::Off;
                attempt.target = None;
                attempt.log.note(
                    "calibration_end",
                    None,
                    format!("quality={} reason={:?}", outcome.quality, outcome.reason),
                );
                attempt.log.entries()
            }
            None => Vec::new(),
        };
        info!(
            "[CALIB] Attempt finished: {} ({:?}, avg_error={:?})",
            outcome.quality, outcome.reason, outcome.average_error
        );
        self.phase = CalibrationPhase::Finished;
        self.last_outcome = Some(outcome.clone());
        CalibrationReport { outcome, log }
    }

    /// Hide (and optionally stop) the tracker's calibration UI, then
    /// re-enable streaming fields, without blocking the caller
    fn spawn_cleanup(&self, stop_tracker: bool) {
        let tracker = Arc::clone(&self.tracker);
        let reenable_after = Duration::from_millis(self.config.field_reenable_delay_ms);
        let spawned = thread::Builder::new()
            .name("gazelab-calib-cleanup".to_string())
            .spawn(move || {
                if stop_tracker {
                    tracker.calibrate_stop();
                }
                tracker.calibrate_show(false);
                tracker.reenable_fields_after(reenable_after);
            });
        if let Err(e) = spawned {
            warn!("[CALIB] Could not spawn cleanup thread: {}", e);
        }
    }

    fn spawn_summary_poll(&self, elapsed: Duration) {
        let Some(attempt) = &self.attempt else {
            return;
        };
        let tracker = Arc::clone(&self.tracker);
        let log = attempt.log.clone();
        let spawned = thread::Builder::new()
            .name("gazelab-calib-summary".to_string())
            .spawn(move || {
                let ok = tracker.request_result_summary();
                log.note(
                    "poll_result_summary",
                    None,
                    format!("ok={} elapsed={:.3}s", ok, elapsed.as_secs_f64()),
                );
            });
        if let Err(e) = spawned {
            warn!("[CALIB] Could not spawn summary poll: {}", e);
        }
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            ok: self.config.ok_threshold,
            low: self.config.low_threshold,
        }
    }
}

/// Command sequence run on the configuring thread
struct ConfigureJob {
    config: CalibrationConfig,
    method: CalibrationMethod,
    tracker: Arc<dyn CalibrationTracker>,
    log: CalibrationLog,
    cancel: Arc<AtomicBool>,
}

impl ConfigureJob {
    fn run(self) -> ConfigureReport {
        let ok = self.tracker.enable_send_data();
        self.log.step("enable_send_data", None, ok);
        self.pause(self.config.command_spacing_ms);

        let led = self.method.uses_led() && self.configure_path(CalibrationPath::Led);
        let overlay = self.method.uses_overlay() && self.configure_path(CalibrationPath::Overlay);
        ConfigureReport {
            led,
            overlay,
            started_at: Instant::now(),
        }
    }

    /// Stop, clear, add points, set timing, show/hide overlay, start.
    /// Only the show and start steps abort the path.
    fn configure_path(&self, path: CalibrationPath) -> bool {
        let (delay_s, duration_s) = match path {
            CalibrationPath::Led => (self.config.point_delay_s, self.config.point_duration_s),
            CalibrationPath::Overlay => (
                self.config.overlay_point_delay_s,
                self.config.overlay_point_duration_s,
            ),
        };
        let spacing = self.config.command_spacing_ms;

        if self.cancelled() {
            return false;
        }
        self.log.step("calibrate_stop", Some(path), self.tracker.calibrate_stop());
        self.pause(spacing);
        self.tracker.clear_calibration_results();
        self.log.step("calibrate_clear", Some(path), self.tracker.calibrate_clear());
        self.pause(spacing);

        let mut all_added = true;
        for (x, y) in CORNER_POINTS {
            let ok = self.tracker.calibrate_add_point(x, y);
            all_added &= ok;
            self.log
                .step_with_detail("calibrate_addpoint", Some(path), ok, format!("x={} y={}", x, y));
            self.pause(self.config.add_point_spacing_ms);
        }
        if !all_added {
            self.log
                .note("calibrate_addpoint_failed", Some(path), "one or more points not acknowledged");
        }

        self.log
            .step("calibrate_timeout", Some(path), self.tracker.calibrate_timeout(duration_s));
        self.pause(spacing);
        self.log
            .step("calibrate_delay", Some(path), self.tracker.calibrate_delay(delay_s));
        self.pause(spacing);

        if self.cancelled() {
            return false;
        }
        let show = path == CalibrationPath::Overlay;
        let shown = self.tracker.calibrate_show(show);
        self.log.step("calibrate_show", Some(path), shown);
        if !shown {
            warn!("[CALIB] {:?} path: CALIBRATE_SHOW not acknowledged", path);
            self.log.note("path_abort", Some(path), "CALIBRATE_SHOW failed");
            return false;
        }

        let started = self.tracker.calibrate_start();
        self.log.step("calibrate_start", Some(path), started);
        if !started {
            warn!("[CALIB] {:?} path: CALIBRATE_START not acknowledged", path);
            self.tracker.calibrate_show(false);
            self.log.note("path_abort", Some(path), "CALIBRATE_START failed");
            return false;
        }
        debug!("[CALIB] {:?} path started", path);
        true
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn pause(&self, ms: u64) {
        if ms > 0 && !self.cancelled() {
            thread::sleep(Duration::from_millis(ms));
        }
    }
}
