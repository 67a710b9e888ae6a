// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process simulated tracker
//!
//! Speaks the same wire protocol as the device: commands written to it are
//! acknowledged, data records stream at ~60 Hz while sending is enabled, and a
//! started calibration plays out point start/result announcements followed by
//! a final result. Everything it emits is raw delimited bytes, so the link
//! parses it through the same framing and message handler as a socket.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::{
    MessageKind, TrackerMessage, CALIB_RESULT_ID, CALIB_RESULT_PT_ID, CALIB_START_PT_ID, DELIMITER,
    RESULT_SUMMARY_ID,
};

const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);
/// Frames emitted per poll at most, so a stalled poller does not burst
const MAX_CATCH_UP_FRAMES: u32 = 4;

/// Device default point set, used when a calibration starts with no points
const DEFAULT_POINTS: [(f64, f64); 5] = [(0.5, 0.5), (0.85, 0.15), (0.85, 0.85), (0.15, 0.85), (0.15, 0.15)];

struct RunningCalibration {
    started: Instant,
    points: Vec<(f64, f64)>,
    delay: Duration,
    duration: Duration,
    /// Announcements already emitted: 2 per point (start + result)
    emitted: usize,
}

impl RunningCalibration {
    fn point_start(&self, index: usize) -> Instant {
        self.started + (self.delay + self.duration) * index as u32
    }
}

#[derive(Debug, Clone, Copy)]
struct SummaryValues {
    average_error: f64,
    valid_points: usize,
}

pub struct SimulatedTracker {
    created: Instant,
    outbound: VecDeque<String>,
    streaming: bool,
    last_frame: Option<Instant>,
    frame_counter: u64,
    points: Vec<(f64, f64)>,
    delay: Duration,
    duration: Duration,
    calibration: Option<RunningCalibration>,
    last_summary: Option<SummaryValues>,
    /// Observed offset applied to each eye in the final result
    calibration_error: f64,
}

impl Default for SimulatedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTracker {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            outbound: VecDeque::new(),
            streaming: false,
            last_frame: None,
            frame_counter: 0,
            points: Vec::new(),
            delay: Duration::from_millis(200),
            duration: Duration::from_secs(1),
            calibration: None,
            last_summary: None,
            calibration_error: 0.02,
        }
    }

    /// Per-eye deviation reported in the final result
    pub fn with_calibration_error(mut self, error: f64) -> Self {
        self.calibration_error = error.abs();
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// Accept raw command bytes as written by the link
    pub fn write(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        for line in text.split("\r\n").filter(|l| !l.trim().is_empty()) {
            self.handle_command(line, Instant::now());
        }
    }

    fn handle_command(&mut self, line: &str, now: Instant) {
        let msg = match TrackerMessage::parse(line) {
            Ok(msg) if msg.kind == MessageKind::Other => msg,
            _ => return,
        };
        let id = match msg.id.as_deref() {
            Some(id) => id.to_string(),
            None => return,
        };
        let state = msg.attrs.i64("STATE");

        match id.as_str() {
            "ENABLE_SEND_DATA" => {
                self.streaming = state == Some(1);
                self.ack_state(&id, state);
            }
            "CALIBRATE_CLEAR" => {
                self.points.clear();
                self.ack_points(&id);
            }
            "CALIBRATE_RESET" => {
                self.points = DEFAULT_POINTS.to_vec();
                self.ack_points(&id);
            }
            "CALIBRATE_ADDPOINT" => {
                if let (Some(x), Some(y)) = (msg.attrs.f64("X"), msg.attrs.f64("Y")) {
                    self.points.push((x, y));
                }
                self.ack_points(&id);
            }
            "CALIBRATE_TIMEOUT" => {
                if let Some(v) = msg.attrs.f64("VALUE") {
                    self.duration = Duration::from_secs_f64(v.max(0.05));
                }
                self.push_line(format!(r#"<ACK ID="{}" VALUE="{:.2}" />"#, id, self.duration.as_secs_f64()));
            }
            "CALIBRATE_DELAY" => {
                if let Some(v) = msg.attrs.f64("VALUE") {
                    self.delay = Duration::from_secs_f64(v.max(0.0));
                }
                self.push_line(format!(r#"<ACK ID="{}" VALUE="{:.2}" />"#, id, self.delay.as_secs_f64()));
            }
            "CALIBRATE_START" => {
                if state == Some(1) {
                    let points = if self.points.is_empty() {
                        DEFAULT_POINTS.to_vec()
                    } else {
                        self.points.clone()
                    };
                    self.calibration = Some(RunningCalibration {
                        started: now,
                        points,
                        delay: self.delay,
                        duration: self.duration,
                        emitted: 0,
                    });
                } else {
                    self.calibration = None;
                }
                self.ack_state(&id, state);
            }
            RESULT_SUMMARY_ID => match self.last_summary {
                Some(summary) => self.push_line(format!(
                    r#"<ACK ID="{}" AVE_ERROR="{:.4}" VALID_POINTS="{}" />"#,
                    id, summary.average_error, summary.valid_points
                )),
                None => self.push_line(format!(r#"<ACK ID="{}" />"#, id)),
            },
            _ => self.ack_state(&id, state),
        }
    }

    fn ack_state(&mut self, id: &str, state: Option<i64>) {
        match state {
            Some(state) => self.push_line(format!(r#"<ACK ID="{}" STATE="{}" />"#, id, state)),
            None => self.push_line(format!(r#"<ACK ID="{}" />"#, id)),
        }
    }

    fn ack_points(&mut self, id: &str) {
        self.push_line(format!(r#"<ACK ID="{}" PTS="{}" />"#, id, self.points.len()));
    }

    fn push_line(&mut self, line: String) {
        self.outbound.push_back(line);
    }

    /// Advance the simulation to `now` and return every byte the device
    /// would have sent since the previous poll
    pub fn poll(&mut self, now: Instant) -> Vec<u8> {
        self.advance_calibration(now);
        self.advance_stream(now);

        let mut bytes = Vec::new();
        while let Some(line) = self.outbound.pop_front() {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(DELIMITER);
        }
        bytes
    }

    fn advance_calibration(&mut self, now: Instant) {
        let mut lines = Vec::new();
        let mut finished = None;

        if let Some(run) = self.calibration.as_mut() {
            let total = run.points.len() * 2;
            while run.emitted < total {
                let index = run.emitted / 2;
                let is_start = run.emitted % 2 == 0;
                let due = if is_start {
                    run.point_start(index)
                } else {
                    run.point_start(index) + run.delay + run.duration
                };
                if now < due {
                    break;
                }
                let (x, y) = run.points[index];
                let id = if is_start { CALIB_START_PT_ID } else { CALIB_RESULT_PT_ID };
                lines.push(format!(
                    r#"<CAL ID="{}" PT="{}" CALX="{:.5}" CALY="{:.5}" />"#,
                    id,
                    index + 1,
                    x,
                    y
                ));
                run.emitted += 1;
            }
            if run.emitted >= total {
                finished = Some(run.points.clone());
            }
        }

        for line in lines {
            self.push_line(line);
        }

        if let Some(points) = finished {
            self.calibration = None;
            let err = self.calibration_error;
            let body: Vec<String> = points
                .iter()
                .enumerate()
                .map(|(i, (x, y))| {
                    let n = i + 1;
                    format!(
                        r#"CALX{n}="{x:.5}" CALY{n}="{y:.5}" LX{n}="{lx:.5}" LY{n}="{y:.5}" LV{n}="1" RX{n}="{rx:.5}" RY{n}="{y:.5}" RV{n}="1""#,
                        n = n,
                        x = x,
                        y = y,
                        lx = x + err,
                        rx = x - err
                    )
                })
                .collect();
            self.push_line(format!(r#"<CAL ID="{}" {} />"#, CALIB_RESULT_ID, body.join(" ")));
            self.last_summary = Some(SummaryValues {
                average_error: err,
                valid_points: points.len(),
            });
        }
    }

    fn advance_stream(&mut self, now: Instant) {
        if !self.streaming {
            self.last_frame = None;
            return;
        }
        let mut frames = 0;
        loop {
            let due = match self.last_frame {
                None => true,
                Some(last) => now.duration_since(last) >= FRAME_INTERVAL,
            };
            if !due || frames >= MAX_CATCH_UP_FRAMES {
                break;
            }
            let line = self.record_line(now);
            self.push_line(line);
            self.last_frame = Some(match self.last_frame {
                Some(last) => last + FRAME_INTERVAL,
                None => now,
            });
            frames += 1;
        }
        // Drop the backlog rather than bursting after a long stall
        if frames >= MAX_CATCH_UP_FRAMES {
            self.last_frame = Some(now);
        }
    }

    fn record_line(&mut self, now: Instant) -> String {
        self.frame_counter += 1;
        let dt = now.duration_since(self.created).as_secs_f64();
        let ang = self.frame_counter as f64 * 0.05;

        let gx = 0.5 + 0.4 * ang.sin();
        let gy = 0.5 + 0.3 * (ang * 1.7).sin();
        let tick = (dt * 3.0) as u64;
        let valid = tick % 20 != 0;
        let lpv = tick % 25 != 0;
        let rpv = tick % 23 != 0;
        let leyez = 0.6 + 0.15 * (ang * 0.5).sin();
        let reyez = 0.6 + 0.15 * (ang * 0.5).cos();
        let lpupild = 0.004 + 0.001 * (ang * 0.6).sin();
        let rpupild = 0.004 + 0.001 * (ang * 0.6).cos();
        let lpd = 24.0 + 2.0 * (ang * 0.7).sin();
        let rpd = 24.0 + 2.0 * (ang * 0.7).cos();

        format!(
            concat!(
                r#"<REC CNT="{}" TIME="{:.3}" BPOGX="{:.5}" BPOGY="{:.5}" BPOGV="{}" "#,
                r#"FPOGX="{:.5}" FPOGY="{:.5}" FPOGV="{}" "#,
                r#"LPD="{:.3}" LPV="{}" RPD="{:.3}" RPV="{}" "#,
                r#"LEYEZ="{:.5}" LPUPILD="{:.5}" LPUPILV="{}" "#,
                r#"REYEZ="{:.5}" RPUPILD="{:.5}" RPUPILV="{}" />"#
            ),
            self.frame_counter,
            dt,
            gx,
            gy,
            valid as u8,
            gx,
            gy,
            valid as u8,
            lpd,
            lpv as u8,
            rpd,
            rpv as u8,
            leyez,
            lpupild,
            lpv as u8,
            reyez,
            rpupild,
            rpv as u8,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameBuffer, TrackerCommand};

    fn lines(sim: &mut SimulatedTracker, now: Instant) -> Vec<String> {
        FrameBuffer::new().push(&sim.poll(now))
    }

    #[test]
    fn test_commands_are_acknowledged() {
        let mut sim = SimulatedTracker::new();
        sim.write(&TrackerCommand::calibrate_show(false).to_wire());
        sim.write(&TrackerCommand::calibrate_add_point(1.0, 1.0).to_wire());
        let out = lines(&mut sim, Instant::now());
        assert_eq!(out[0], r#"<ACK ID="CALIBRATE_SHOW" STATE="0" />"#);
        assert_eq!(out[1], r#"<ACK ID="CALIBRATE_ADDPOINT" PTS="1" />"#);
    }

    #[test]
    fn test_stream_only_after_enable() {
        let mut sim = SimulatedTracker::new();
        let t0 = Instant::now();
        assert!(lines(&mut sim, t0).is_empty());

        sim.write(&TrackerCommand::enable_send_data().to_wire());
        let out = lines(&mut sim, t0);
        assert!(out.iter().any(|l| l.starts_with("<REC")));
    }

    #[test]
    fn test_calibration_playout() {
        let mut sim = SimulatedTracker::new();
        sim.write(&TrackerCommand::calibrate_clear().to_wire());
        sim.write(&TrackerCommand::calibrate_add_point(1.0, 1.0).to_wire());
        sim.write(&TrackerCommand::calibrate_add_point(0.0, 1.0).to_wire());
        sim.write(&TrackerCommand::calibrate_delay(0.1).to_wire());
        sim.write(&TrackerCommand::calibrate_timeout(0.1).to_wire());
        sim.write(&TrackerCommand::calibrate_start(true).to_wire());
        assert!(sim.is_calibrating());

        let out = lines(&mut sim, Instant::now() + Duration::from_secs(5));
        let cal: Vec<&String> = out.iter().filter(|l| l.starts_with("<CAL")).collect();
        assert_eq!(cal.len(), 5);
        assert!(cal[0].contains(r#"ID="CALIB_START_PT" PT="1""#));
        assert!(cal[4].contains(r#"ID="CALIB_RESULT""#));
        assert!(!sim.is_calibrating());
    }
}
