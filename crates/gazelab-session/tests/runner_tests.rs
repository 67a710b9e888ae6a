// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! SessionRunner against a fake tracker and the loopback co-processor

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gazelab_calibration::{CalibrationLeds, CalibrationOrchestrator, CalibrationTracker};
use gazelab_config::{CalibrationConfig, CoprocessorConfig, GazelabConfig};
use gazelab_coprocessor::{ButtonEdge, CoprocessorLink, InputEvent, InputSource, LoopbackDevice, LoopbackSerial};
use gazelab_session::input::{BTN_A, BTN_RIGHT};
use gazelab_session::{
    FlowState, GazeSource, JsonLinesRecorder, MockInference, SessionDevices, SessionRunner,
};
use gazelab_tracker::{
    parse_attributes, CalibrationPointProgress, CalibrationResult, GazeSample, ResultSource,
};

#[derive(Default)]
struct FakeState {
    samples: Vec<GazeSample>,
    progress: Option<CalibrationPointProgress>,
    result: Option<CalibrationResult>,
    commands: Vec<String>,
}

#[derive(Default)]
struct FakeTracker {
    state: Mutex<FakeState>,
}

impl FakeTracker {
    fn push_good_samples(&self, count: usize) {
        let line = r#"<REC BPOGX="0.5" BPOGY="0.5" BPOGV="1" LEYEZ="0.65" LPV="1" RPV="1" />"#;
        let sample = GazeSample::from_record_at(&parse_attributes(line), 0.0);
        self.state.lock().samples.extend(vec![sample; count]);
    }

    fn command(&self, text: &str) -> bool {
        self.state.lock().commands.push(text.to_string());
        true
    }
}

impl GazeSource for FakeTracker {
    fn is_connected(&self) -> bool {
        true
    }
    fn is_receiving(&self) -> bool {
        true
    }
    fn drain_samples(&self, max: usize) -> Vec<GazeSample> {
        let mut state = self.state.lock();
        let n = max.min(state.samples.len());
        state.samples.drain(..n).collect()
    }
}

impl CalibrationTracker for FakeTracker {
    fn is_connected(&self) -> bool {
        true
    }
    fn enable_send_data(&self) -> bool {
        self.command("enable_send_data")
    }
    fn calibrate_stop(&self) -> bool {
        self.command("stop")
    }
    fn calibrate_clear(&self) -> bool {
        self.command("clear")
    }
    fn calibrate_add_point(&self, _x: f64, _y: f64) -> bool {
        self.command("add")
    }
    fn calibrate_timeout(&self, _seconds: f64) -> bool {
        self.command("timeout")
    }
    fn calibrate_delay(&self, _seconds: f64) -> bool {
        self.command("delay")
    }
    fn calibrate_show(&self, _show: bool) -> bool {
        self.command("show")
    }
    fn calibrate_start(&self) -> bool {
        self.command("start")
    }
    fn request_result_summary(&self) -> bool {
        self.command("summary")
    }
    fn point_progress(&self) -> Option<CalibrationPointProgress> {
        self.state.lock().progress
    }
    fn calibration_result(&self) -> Option<CalibrationResult> {
        self.state.lock().result.clone()
    }
    fn reset_calibration_progress(&self) {
        self.state.lock().progress = None;
    }
    fn clear_calibration_results(&self) {
        self.state.lock().result = None;
    }
    fn reenable_fields_after(&self, _delay: Duration) {
        self.command("reenable");
    }
}

struct Harness {
    runner: SessionRunner,
    tracker: Arc<FakeTracker>,
    device: LoopbackDevice,
    input: Sender<InputEvent>,
    output: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let output = tempfile::tempdir().unwrap();
        let mut config = GazelabConfig::default();
        config.coprocessor = CoprocessorConfig {
            open_settle_ms: 0,
            ack_timeout_ms: 150,
            init_ack_timeout_ms: 150,
            ..CoprocessorConfig::default()
        };
        config.calibration = CalibrationConfig {
            command_spacing_ms: 0,
            add_point_spacing_ms: 0,
            field_reenable_delay_ms: 0,
            ..CalibrationConfig::default()
        };
        config.session.output_dir = output.path().to_path_buf();

        let (tx, rx) = unbounded();
        let (host, device) = LoopbackSerial::pair(Duration::from_millis(10));
        let link = Arc::new(
            CoprocessorLink::start_with_transport(&config.coprocessor, Box::new(host), tx.clone())
                .unwrap(),
        );
        let tracker = Arc::new(FakeTracker::default());
        let calibration = CalibrationOrchestrator::new(
            &config.calibration,
            tracker.clone(),
            Some(link.clone() as Arc<dyn CalibrationLeds>),
        );
        let devices = SessionDevices {
            gaze: tracker.clone(),
            calibration,
            coprocessor: Some(link),
            events: rx,
        };
        let runner = SessionRunner::new(&config, devices)
            .with_recorder(Box::new(JsonLinesRecorder::new(output.path())))
            .with_inference(Arc::new(MockInference::new(0.0)));
        Self {
            runner,
            tracker,
            device,
            input: tx,
            output,
        }
    }

    fn press(&self, name: &str) {
        self.input
            .send(InputEvent::Button(ButtonEdge::press(name, InputSource::Local)))
            .unwrap();
        self.input
            .send(InputEvent::Button(ButtonEdge::release(name, InputSource::Local)))
            .unwrap();
    }

    fn tick_until(&mut self, timeout: Duration, mut cond: impl FnMut(&SessionRunner) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            self.runner.tick(Instant::now());
            if cond(&self.runner) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn session_dir(&self) -> PathBuf {
        let mut dirs: Vec<PathBuf> = fs::read_dir(self.output.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_dir())
            .collect();
        assert_eq!(dirs.len(), 1, "expected one session folder: {:?}", dirs);
        dirs.remove(0)
    }

    /// BOOT -> CALIBRATION with good samples flowing
    fn walk_to_calibration(&mut self) {
        self.tracker.push_good_samples(5);
        self.press(BTN_RIGHT);
        self.press(BTN_RIGHT);
        self.press(BTN_RIGHT);
        assert!(self.tick_until(Duration::from_secs(1), |r| r.machine().state() == FlowState::Calibration));
    }
}

#[test]
fn test_device_button_edges_reach_the_machine() {
    let mut h = Harness::new();
    h.device.press("BTN_RIGHT");
    assert!(h.tick_until(Duration::from_secs(2), |r| r.machine().state() == FlowState::FindPosition));
    assert!(h
        .device
        .written_lines()
        .contains(&"OLED:UI:SCREEN:FIND_POSITION".to_string()));
}

#[test]
fn test_reboot_resets_reasserts_then_acknowledges() {
    let mut h = Harness::new();
    h.press(BTN_RIGHT);
    assert!(h.tick_until(Duration::from_secs(1), |r| r.machine().state() == FlowState::FindPosition));
    h.device.take_written();

    h.device.emit_boot(8, 0);
    let deadline = Instant::now() + Duration::from_secs(2);
    while h.device.acked_boot() != Some(8) && Instant::now() < deadline {
        h.runner.tick(Instant::now());
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(h.device.acked_boot(), Some(8));
    assert_eq!(h.runner.machine().state(), FlowState::Boot);

    let lines = h.device.written_lines();
    let pos = |needle: &str| lines.iter().position(|l| l == needle);
    let init = pos("INIT:4:76").expect("INIT resent");
    let screen = pos("OLED:UI:SCREEN:BOOT").expect("screen resent");
    let ack = pos("ACK:BOOT:8").expect("boot acknowledged");
    assert!(init < screen && screen < ack, "order: {:?}", lines);
}

#[test]
fn test_calibration_recording_and_results_end_to_end() {
    let mut h = Harness::new();
    h.walk_to_calibration();

    h.press(BTN_RIGHT);
    assert!(h.tick_until(Duration::from_secs(2), |r| r.calibration().is_active()
        && r.calibration().active_paths().0));

    // The tracker announces the first corner; its LED lights
    h.tracker.state.lock().progress = Some(CalibrationPointProgress {
        pt: 1,
        started_at: Instant::now(),
        ended_at: None,
        calx: Some(1.0),
        caly: Some(1.0),
    });
    assert!(h.tick_until(Duration::from_secs(1), |_| true));
    assert!(h.device.written_lines().iter().any(|l| l.starts_with("PIXEL:0:")));

    h.tracker.state.lock().result = Some(CalibrationResult {
        average_error: 0.6,
        valid_points: 5,
        success: true,
        source: ResultSource::Final,
        points: Vec::new(),
    });
    assert!(h.tick_until(Duration::from_secs(1), |r| r.machine().calibration_quality().is_some()));
    assert!(h.device.written_lines().contains(&"OLED:UI:SET:STR:ui_calib_result:0.600".to_string()));

    h.press(BTN_RIGHT);
    h.press(BTN_RIGHT);
    assert!(h.tick_until(Duration::from_secs(1), |r| r.machine().state() == FlowState::Recording));
    h.tracker.push_good_samples(40);
    h.press(BTN_A);
    assert!(h.tick_until(Duration::from_secs(1), |r| r.machine().marker_open()));
    h.press(BTN_RIGHT);
    h.press(BTN_RIGHT);
    assert!(h.tick_until(Duration::from_secs(2), |r| r.machine().state() == FlowState::Results));

    let dir = h.session_dir();
    for file in ["calibration.jsonl", "events.jsonl", "samples.jsonl", "results.jsonl"] {
        assert!(dir.join(file).exists(), "missing {}", file);
    }
    let events = fs::read_to_string(dir.join("events.jsonl")).unwrap();
    assert!(events.contains("EVENT1_START"));
    assert!(events.contains("EVENT1_STOP"));
    let results = fs::read_to_string(dir.join("results.jsonl")).unwrap();
    assert_eq!(results.lines().count(), 2);
    assert!(h
        .device
        .written_lines()
        .contains(&"OLED:UI:SET:STR:ui_results_title:GLOBAL RESULTS".to_string()));
}
