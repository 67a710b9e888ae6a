// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Renderers: the co-processor display mirror and a log-only fallback.
//!
//! [`OledRenderer`] pushes the full variable set for the current screen on
//! every frame. Deduplication is left to the link's output cache, so an
//! unchanged frame costs no serial traffic.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use gazelab_calibration::LedTarget;
use gazelab_coprocessor::CoprocessorLink;

use crate::collaborators::Renderer;
use crate::flow::FlowState;
use crate::markers::format_clock;
use crate::snapshot::SessionSnapshot;

/// Screen and typed display variables
pub trait DisplaySink: Send + Sync {
    fn set_screen(&self, name: &str) -> bool;
    fn set_bool(&self, name: &str, value: bool) -> bool;
    fn set_u8(&self, name: &str, value: i64) -> bool;
    fn set_str(&self, name: &str, value: &str) -> bool;
}

impl DisplaySink for CoprocessorLink {
    fn set_screen(&self, name: &str) -> bool {
        CoprocessorLink::set_screen(self, name)
    }

    fn set_bool(&self, name: &str, value: bool) -> bool {
        CoprocessorLink::set_bool(self, name, value)
    }

    fn set_u8(&self, name: &str, value: i64) -> bool {
        CoprocessorLink::set_u8(self, name, value)
    }

    fn set_str(&self, name: &str, value: &str) -> bool {
        CoprocessorLink::set_str(self, name, value)
    }
}

pub struct OledRenderer {
    sink: Arc<dyn DisplaySink>,
}

impl OledRenderer {
    pub fn new(sink: Arc<dyn DisplaySink>) -> Self {
        Self { sink }
    }

    fn boot(&self, s: &SessionSnapshot) {
        self.sink.set_bool("ui_tracker_detected", s.devices.tracker_connected);
        self.sink.set_bool(
            "ui_led_detected",
            s.devices.coprocessor_present && s.devices.coprocessor_alive,
        );
        self.sink.set_bool("ui_connection", s.devices.tracker_receiving);
        self.sink.set_str("ui_loading_data", "");
    }

    fn calibration(&self, s: &SessionSnapshot) {
        let c = &s.calibration;
        let usable = c.is_usable();
        self.sink.set_str(
            "ui_calib_start_btn",
            if !c.running && c.quality.is_none() { "Start calibration>" } else { "" },
        );
        self.sink.set_str("ui_calib_redo_btn", if c.is_done() { "<Redo" } else { "" });
        self.sink.set_str("ui_calib_next_btn", if usable { "Next>" } else { "" });
        let result = match c.average_error {
            Some(error) if usable => format!("{:.3}", error),
            _ => String::new(),
        };
        self.sink.set_str("ui_calib_result", &result);

        // up-left, up-right, bottom-left, bottom-right
        let lit = match c.led_target.filter(|_| c.running) {
            Some(LedTarget::Center) => [true; 4],
            Some(LedTarget::Corner(0)) => [false, false, false, true],
            Some(LedTarget::Corner(1)) => [false, false, true, false],
            Some(LedTarget::Corner(2)) => [true, false, false, false],
            Some(LedTarget::Corner(3)) => [false, true, false, false],
            _ => [false; 4],
        };
        self.sink.set_bool("ui_led_up_left", lit[0]);
        self.sink.set_bool("ui_led_up_right", lit[1]);
        self.sink.set_bool("ui_led_bottom_left", lit[2]);
        self.sink.set_bool("ui_led_bottom_right", lit[3]);
    }

    fn recording(&self, s: &SessionSnapshot) {
        let Some(r) = &s.recording else {
            return;
        };
        self.sink.set_str("ui_recording_timer", &format_clock(r.elapsed));
        match r.event_elapsed.filter(|_| r.event_open) {
            Some(event) => {
                self.sink.set_str("ui_event_time", &format_clock(event));
                self.sink
                    .set_str("ui_event_name", &format!("STOP EVENT {}", r.event_index));
            }
            None => {
                self.sink.set_str("ui_event_time", "--:--");
                self.sink
                    .set_str("ui_event_name", &format!("START EVENT {}", r.event_index));
            }
        }
    }

    fn stop_record(&self, s: &SessionSnapshot) {
        let warning = match &s.recording {
            Some(r) if r.event_open => {
                format!("Event marker {} will be closed automatically", r.event_index)
            }
            _ => String::new(),
        };
        self.sink.set_str("ui_close_event_warning", &warning);
    }

    fn inference(&self, s: &SessionSnapshot) {
        let (percent, remaining) = match &s.inference {
            Some(i) => (i.percent(), i.remaining),
            None => (100, Some(Duration::ZERO)),
        };
        self.sink.set_u8("ui_inference_prog_bar", i64::from(percent));
        let timer = remaining.map(format_clock).unwrap_or_default();
        self.sink.set_str("ui_inference_timer", &timer);
        self.sink.set_str("ui_loading_data", "");
    }

    fn results(&self, s: &SessionSnapshot) {
        let Some(view) = &s.results else {
            self.sink.set_str("ui_results_title", "RESULTS");
            return;
        };
        self.sink.set_str("ui_results_title", &view.page.title);
        self.sink
            .set_str("ui_results_prev_btn", if view.has_prev { "<Previous" } else { "" });
        self.sink
            .set_str("ui_results_next_btn", if view.has_next { "Next>" } else { "" });
        for (i, line) in view.page.value_lines().iter().enumerate() {
            self.sink.set_str(&format!("ui_result_{}", i + 1), line);
        }
    }

    fn monitoring(&self, s: &SessionSnapshot) {
        self.sink.set_bool("ui_left_eye", s.eyes.left_open);
        self.sink.set_bool("ui_right_eye", s.eyes.right_open);
        self.sink.set_str("ui_text_el_269", s.position.label());
        let (x, y) = match s.eyes.gaze {
            Some((gx, gy)) => (gaze_byte(gx), gaze_byte(gy)),
            None => (128, 128),
        };
        self.sink.set_u8("ui_gaze_x", x);
        self.sink.set_u8("ui_gaze_y", y);
    }
}

fn gaze_byte(v: f64) -> i64 {
    (v.clamp(0.0, 1.0) * 255.0) as i64
}

impl Renderer for OledRenderer {
    fn render(&mut self, s: &SessionSnapshot) {
        self.sink.set_screen(s.state.screen_name());
        match s.state {
            FlowState::Boot => self.boot(s),
            FlowState::Calibration => self.calibration(s),
            FlowState::Recording => self.recording(s),
            FlowState::StopRecord => self.stop_record(s),
            FlowState::InferenceLoading => self.inference(s),
            FlowState::Results => self.results(s),
            FlowState::Monitoring => self.monitoring(s),
            _ => {}
        }
    }
}

/// Logs screen changes and operator messages
#[derive(Default)]
pub struct LogRenderer {
    screen: Option<FlowState>,
    info: Option<String>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, s: &SessionSnapshot) {
        if self.screen != Some(s.state) {
            self.screen = Some(s.state);
            info!("[SESSION] Screen: {}", s.state);
        }
        if s.info != self.info {
            if let Some(message) = &s.info {
                info!("[SESSION] Message: {}", message);
            }
            self.info = s.info.clone();
        }
    }

    fn invalidate(&mut self) {
        self.screen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazelab_calibration::Quality;
    use parking_lot::Mutex;

    use crate::position::{EyeView, PositionStatus};
    use crate::snapshot::{CalibrationView, DeviceStatus, RecordingView};

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn value(&self, name: &str) -> Option<String> {
            let prefix = format!("{}=", name);
            self.calls
                .lock()
                .iter()
                .rev()
                .find_map(|c| c.strip_prefix(&prefix).map(str::to_string))
        }
    }

    impl DisplaySink for RecordingSink {
        fn set_screen(&self, name: &str) -> bool {
            self.calls.lock().push(format!("screen={}", name));
            true
        }
        fn set_bool(&self, name: &str, value: bool) -> bool {
            self.calls.lock().push(format!("{}={}", name, value));
            true
        }
        fn set_u8(&self, name: &str, value: i64) -> bool {
            self.calls.lock().push(format!("{}={}", name, value));
            true
        }
        fn set_str(&self, name: &str, value: &str) -> bool {
            self.calls.lock().push(format!("{}={}", name, value));
            true
        }
    }

    fn snapshot(state: FlowState) -> SessionSnapshot {
        SessionSnapshot {
            state,
            devices: DeviceStatus::default(),
            position: PositionStatus::Far,
            eyes: EyeView::default(),
            calibration: CalibrationView {
                running: false,
                quality: None,
                average_error: None,
                message: None,
                led_target: None,
            },
            recording: None,
            inference: None,
            results: None,
            info: None,
        }
    }

    fn render(s: &SessionSnapshot) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::default());
        let mut renderer = OledRenderer::new(sink.clone());
        renderer.render(s);
        sink
    }

    #[test]
    fn test_calibration_prompts_and_indicators() {
        let mut s = snapshot(FlowState::Calibration);
        let sink = render(&s);
        assert_eq!(sink.value("screen").as_deref(), Some("CALIBRATION"));
        assert_eq!(sink.value("ui_calib_start_btn").as_deref(), Some("Start calibration>"));
        assert_eq!(sink.value("ui_calib_redo_btn").as_deref(), Some(""));

        s.calibration.running = true;
        s.calibration.led_target = Some(LedTarget::Corner(1));
        let sink = render(&s);
        assert_eq!(sink.value("ui_calib_start_btn").as_deref(), Some(""));
        assert_eq!(sink.value("ui_led_bottom_left").as_deref(), Some("true"));
        assert_eq!(sink.value("ui_led_up_right").as_deref(), Some("false"));

        s.calibration.running = false;
        s.calibration.quality = Some(Quality::Ok);
        s.calibration.average_error = Some(0.6123);
        let sink = render(&s);
        assert_eq!(sink.value("ui_calib_next_btn").as_deref(), Some("Next>"));
        assert_eq!(sink.value("ui_calib_result").as_deref(), Some("0.612"));
        assert_eq!(sink.value("ui_led_bottom_left").as_deref(), Some("false"));
    }

    #[test]
    fn test_recording_timers() {
        let mut s = snapshot(FlowState::Recording);
        s.recording = Some(RecordingView {
            elapsed: Duration::from_secs(75),
            event_open: true,
            event_elapsed: Some(Duration::from_secs(5)),
            event_index: 2,
            samples: 0,
            frozen: false,
        });
        let sink = render(&s);
        assert_eq!(sink.value("ui_recording_timer").as_deref(), Some("01:15"));
        assert_eq!(sink.value("ui_event_time").as_deref(), Some("00:05"));
        assert_eq!(sink.value("ui_event_name").as_deref(), Some("STOP EVENT 2"));

        s.state = FlowState::StopRecord;
        let sink = render(&s);
        assert_eq!(
            sink.value("ui_close_event_warning").as_deref(),
            Some("Event marker 2 will be closed automatically")
        );
    }

    #[test]
    fn test_monitoring_defaults_gaze_to_center() {
        let sink = render(&snapshot(FlowState::Monitoring));
        assert_eq!(sink.value("ui_gaze_x").as_deref(), Some("128"));
        assert_eq!(sink.value("ui_text_el_269").as_deref(), Some("Far"));
        assert_eq!(sink.value("ui_left_eye").as_deref(), Some("false"));
    }

    #[test]
    fn test_log_renderer_tracks_screen() {
        let mut renderer = LogRenderer::new();
        renderer.render(&snapshot(FlowState::Boot));
        assert_eq!(renderer.screen, Some(FlowState::Boot));
        renderer.invalidate();
        assert_eq!(renderer.screen, None);
    }
}
