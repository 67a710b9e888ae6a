// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! The single-threaded cooperative loop.
//!
//! Every tick drains the tracker's sample queue and the ordered input
//! queue without blocking, steps the machine once per input, advances the
//! calibration attempt and any running analysis, then renders.

use chrono::Local;
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use gazelab_calibration::{CalibrationError, CalibrationLeds, CalibrationOrchestrator, QualityOverride};
use gazelab_config::{GazelabConfig, SessionConfig};
use gazelab_coprocessor::{CoprocessorLink, InputEvent};
use gazelab_tracker::{GazeSample, TrackerLink};

use crate::collaborators::{InferenceEngine, Renderer, SessionRecorder};
use crate::display::{LogRenderer, OledRenderer};
use crate::error::{Result, SessionError};
use crate::inference::MockInference;
use crate::machine::{RecordingData, SessionAction, SessionMachine};
use crate::recorder::JsonLinesRecorder;
use crate::snapshot::{DeviceStatus, SessionSnapshot, StepContext};

/// Where gaze samples and tracker status come from
pub trait GazeSource: Send + Sync {
    fn is_connected(&self) -> bool;
    fn is_receiving(&self) -> bool;
    fn drain_samples(&self, max: usize) -> Vec<GazeSample>;
}

impl GazeSource for TrackerLink {
    fn is_connected(&self) -> bool {
        TrackerLink::is_connected(self)
    }

    fn is_receiving(&self) -> bool {
        TrackerLink::is_receiving(self)
    }

    fn drain_samples(&self, max: usize) -> Vec<GazeSample> {
        TrackerLink::drain_samples(self, max)
    }
}

/// Device-facing halves the runner drives
pub struct SessionDevices {
    pub gaze: Arc<dyn GazeSource>,
    pub calibration: CalibrationOrchestrator,
    pub coprocessor: Option<Arc<CoprocessorLink>>,
    /// Button edges and boot notices from every source, in arrival order
    pub events: Receiver<InputEvent>,
}

impl SessionDevices {
    /// Wire a tracker and an optional co-processor into an orchestrator
    pub fn new(
        config: &GazelabConfig,
        tracker: Arc<TrackerLink>,
        coprocessor: Option<Arc<CoprocessorLink>>,
        events: Receiver<InputEvent>,
    ) -> Self {
        let leds = coprocessor
            .clone()
            .map(|link| link as Arc<dyn CalibrationLeds>);
        let calibration = CalibrationOrchestrator::new(&config.calibration, tracker.clone(), leds);
        Self {
            gaze: tracker,
            calibration,
            coprocessor,
            events,
        }
    }
}

struct InferenceJob {
    progress: Arc<AtomicUsize>,
    result: Receiver<Result<Vec<f64>>>,
}

pub struct SessionRunner {
    config: SessionConfig,
    reinit_on_boot: bool,
    devices: SessionDevices,
    machine: SessionMachine,
    forced_quality: Option<QualityOverride>,
    renderers: Vec<Box<dyn Renderer>>,
    recorder: Box<dyn SessionRecorder>,
    inference: Arc<dyn InferenceEngine>,
    job: Option<InferenceJob>,
    running: Arc<AtomicBool>,
}

impl SessionRunner {
    /// Runner with the log renderer, the display mirror when a co-processor
    /// is present, the JSON-lines recorder and the mock analysis
    pub fn new(config: &GazelabConfig, devices: SessionDevices) -> Self {
        let mut renderers: Vec<Box<dyn Renderer>> = vec![Box::new(LogRenderer::new())];
        if let Some(link) = &devices.coprocessor {
            renderers.push(Box::new(OledRenderer::new(link.clone())));
        }
        Self {
            config: config.session.clone(),
            reinit_on_boot: config.coprocessor.reinit_app_state_on_boot,
            machine: SessionMachine::new(&config.session),
            devices,
            forced_quality: None,
            renderers,
            recorder: Box::new(JsonLinesRecorder::new(config.session.output_dir.clone())),
            inference: Arc::new(MockInference::default()),
            job: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_recorder(mut self, recorder: Box<dyn SessionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_inference(mut self, engine: Arc<dyn InferenceEngine>) -> Self {
        self.inference = engine;
        self
    }

    /// Replace the default renderers
    pub fn with_renderers(mut self, renderers: Vec<Box<dyn Renderer>>) -> Self {
        self.renderers = renderers;
        self
    }

    /// Force every calibration attempt's outcome (development only)
    pub fn with_calibration_override(mut self, forced: Option<QualityOverride>) -> Self {
        self.forced_quality = forced;
        self
    }

    /// Clearing the flag ends [`SessionRunner::run`] after the current tick
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn calibration(&self) -> &CalibrationOrchestrator {
        &self.devices.calibration
    }

    /// Complete the running calibration attempt immediately
    pub fn inject_calibration_override(&mut self, forced: QualityOverride) {
        if let Some(report) = self.devices.calibration.inject_override(forced) {
            self.finish_calibration(report, Instant::now());
        }
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        self.machine.snapshot(&self.context(now))
    }

    /// Loop until the running flag clears, then leave the devices dark
    pub fn run(&mut self) {
        let period = Duration::from_millis(self.config.tick_ms.max(1));
        info!("[SESSION] Loop running ({}ms tick)", period.as_millis());
        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.tick(started);
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
        self.shutdown();
    }

    /// One cooperative step
    pub fn tick(&mut self, now: Instant) {
        let samples = self.devices.gaze.drain_samples(self.config.max_samples_per_tick);
        if !samples.is_empty() {
            self.machine.ingest_samples(samples, now);
        }

        loop {
            match self.devices.events.try_recv() {
                Ok(event) => self.handle_event(event, now),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let actions = self.machine.tick(&self.context(now));
        self.apply(actions, now);

        if let Some(report) = self.devices.calibration.tick(now) {
            self.finish_calibration(report, now);
        }
        self.poll_inference(now);
        self.render(now);
    }

    pub fn shutdown(&mut self) {
        self.devices.calibration.cancel();
        self.job = None;
        if let Some(link) = &self.devices.coprocessor {
            link.all_off();
        }
        info!("[SESSION] Loop stopped in {}", self.machine.state());
    }

    fn handle_event(&mut self, event: InputEvent, now: Instant) {
        match event {
            InputEvent::Button(edge) => {
                let actions = self.machine.handle_button(&edge, &self.context(now));
                self.apply(actions, now);
            }
            InputEvent::Boot { epoch, uptime_s } => self.handle_boot(epoch, uptime_s, now),
        }
    }

    /// The co-processor lost its state: optionally restart the session,
    /// push everything back, then acknowledge the epoch
    fn handle_boot(&mut self, epoch: u32, uptime_s: u64, now: Instant) {
        info!("[SESSION] Co-processor boot epoch {} (uptime {}s)", epoch, uptime_s);
        if self.reinit_on_boot {
            let actions = self.machine.reset(&self.context(now));
            self.apply(actions, now);
        }
        let Some(link) = self.devices.coprocessor.clone() else {
            return;
        };
        if !link.reassert(Some(self.machine.state().screen_name())) {
            warn!("[SESSION] Co-processor state only partially restored");
        }
        for renderer in &mut self.renderers {
            renderer.invalidate();
        }
        self.render(now);
        if !link.ack_boot(epoch) {
            warn!("[SESSION] ACK:BOOT:{} not delivered", epoch);
        }
    }

    fn apply(&mut self, actions: Vec<SessionAction>, now: Instant) {
        for action in actions {
            match action {
                SessionAction::Screen(state) => debug!("[SESSION] Screen {}", state),
                SessionAction::Reset => {
                    self.devices.calibration.cancel();
                    if self.job.take().is_some() {
                        info!("[SESSION] Abandoning running analysis");
                    }
                    self.recorder.begin_session();
                }
                SessionAction::StartCalibration => self.start_calibration(now),
                SessionAction::RecordingStarted => info!("[SESSION] Recording started"),
                SessionAction::BeginInference(recording) => self.begin_inference(recording, now),
                SessionAction::ResultsReady(pages) => {
                    if let Err(e) = self.recorder.record_results(&pages) {
                        warn!("[SESSION] Could not save results: {}", e);
                    }
                }
            }
        }
    }

    fn start_calibration(&mut self, now: Instant) {
        match self.devices.calibration.start(self.forced_quality) {
            Ok(()) => {}
            Err(CalibrationError::AlreadyRunning) => debug!("[SESSION] Calibration already running"),
            Err(CalibrationError::NotConnected) => {
                self.machine
                    .on_calibration_rejected("Connect the eye tracker first", now);
            }
            Err(e) => {
                error!("[SESSION] Calibration could not start: {}", e);
                self.machine
                    .on_calibration_rejected(format!("Calibration error: {}", e), now);
            }
        }
    }

    fn finish_calibration(&mut self, report: gazelab_calibration::CalibrationReport, now: Instant) {
        if let Err(e) = self.recorder.record_calibration(&report) {
            warn!("[SESSION] Could not save calibration log: {}", e);
        }
        self.machine.on_calibration_finished(&report.outcome, now);
    }

    fn begin_inference(&mut self, recording: RecordingData, now: Instant) {
        info!(
            "[SESSION] Recording stopped: {} events, {} samples, {} intervals",
            recording.events.len(),
            recording.samples.len(),
            recording.intervals
        );
        if let Err(e) = self.recorder.record_recording(&recording) {
            warn!("[SESSION] Could not save recording: {}", e);
        }

        let progress = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = bounded(1);
        let engine = Arc::clone(&self.inference);
        let worker_progress = Arc::clone(&progress);
        let spawned = thread::Builder::new()
            .name("gazelab-inference".to_string())
            .spawn(move || {
                let result = engine.infer(&recording, &|done| worker_progress.store(done, Ordering::SeqCst));
                let _ = tx.send(result);
            });
        match spawned {
            Ok(_) => {
                self.job = Some(InferenceJob {
                    progress,
                    result: rx,
                })
            }
            Err(e) => {
                let error = SessionError::ThreadError(e.to_string());
                let actions = self.machine.on_inference_failed(&error.to_string(), &self.context(now));
                self.apply(actions, now);
            }
        }
    }

    fn poll_inference(&mut self, now: Instant) {
        let Some(job) = &self.job else {
            return;
        };
        self.machine.on_inference_progress(
            job.progress.load(Ordering::SeqCst),
            self.inference.seconds_per_value(),
        );
        let outcome = match job.result.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                Err(SessionError::Inference("analysis worker exited".to_string()))
            }
        };
        self.job = None;
        let ctx = self.context(now);
        let actions = match outcome {
            Ok(values) => {
                info!("[SESSION] Analysis produced {} values", values.len());
                self.machine.on_inference_complete(&values, &ctx)
            }
            Err(e) => {
                error!("[SESSION] Analysis failed: {}", e);
                self.machine.on_inference_failed(&e.to_string(), &ctx)
            }
        };
        self.apply(actions, now);
    }

    fn render(&mut self, now: Instant) {
        let snapshot = self.machine.snapshot(&self.context(now));
        for renderer in &mut self.renderers {
            renderer.render(&snapshot);
        }
    }

    fn context(&self, now: Instant) -> StepContext {
        let coprocessor = self.devices.coprocessor.as_ref();
        StepContext {
            now,
            wall: Local::now(),
            devices: DeviceStatus {
                tracker_connected: self.devices.gaze.is_connected(),
                tracker_receiving: self.devices.gaze.is_receiving(),
                coprocessor_present: coprocessor.is_some(),
                coprocessor_alive: coprocessor.map(|c| c.is_alive()).unwrap_or(false),
            },
            calibration_running: self.devices.calibration.is_active(),
            led_target: self.devices.calibration.current_target(),
        }
    }
}
