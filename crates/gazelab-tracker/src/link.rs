// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Reconnecting tracker link
//!
//! One background worker owns the connection: it connects, enables streaming,
//! reads delimited messages and dispatches them, and on any loss tears down
//! and retries after a fixed backoff. Callers on other threads send commands
//! through the shared writer and block only on their own acknowledgement.

use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use gazelab_config::TrackerConfig;

use crate::ack::PendingAcks;
use crate::calibration::{CalibrationPointProgress, CalibrationResult};
use crate::error::{Result, TrackerError};
use crate::protocol::{
    FrameBuffer, MessageKind, TrackerCommand, TrackerMessage, CALIB_RESULT_ID, CALIB_RESULT_PT_ID,
    CALIB_START_PT_ID, RESULT_SUMMARY_ID,
};
use crate::queue::SampleQueue;
use crate::sample::GazeSample;
use crate::sim::SimulatedTracker;

const READ_CHUNK: usize = 4096;
const SIM_POLL_INTERVAL: Duration = Duration::from_millis(4);
/// Granularity of interruptible sleeps in the worker
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Write side of the current connection
enum Wire {
    Tcp(TcpStream),
    Simulated(SimulatedTracker),
}

impl Wire {
    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Wire::Tcp(stream) => {
                stream.write_all(bytes)?;
                stream.flush()
            }
            Wire::Simulated(sim) => {
                sim.write(bytes);
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct CalibrationState {
    progress: Option<CalibrationPointProgress>,
    result: Option<CalibrationResult>,
    summary: Option<CalibrationResult>,
}

#[derive(Default)]
struct LinkCounters {
    connects: AtomicU64,
    records: AtomicU64,
    acks: AtomicU64,
    calibration_messages: AtomicU64,
    malformed: AtomicU64,
    commands_sent: AtomicU64,
    commands_failed: AtomicU64,
}

/// Point-in-time counters for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerStats {
    pub connects: u64,
    pub records: u64,
    pub acks: u64,
    pub calibration_messages: u64,
    pub malformed: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub samples_dropped: u64,
}

struct LinkCore {
    config: TrackerConfig,
    running: AtomicBool,
    connected: AtomicBool,
    receiving: AtomicBool,
    /// Send lock: guards the only write handle
    wire: Mutex<Option<Wire>>,
    pending: PendingAcks,
    calibration: Mutex<CalibrationState>,
    samples: SampleQueue,
    counters: LinkCounters,
}

/// Persistent tracker connection with command/acknowledgement correlation
pub struct TrackerLink {
    core: Arc<LinkCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TrackerLink {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            core: Arc::new(LinkCore::new(config.clone())),
            worker: Mutex::new(None),
        }
    }

    /// Start the connection worker
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if self.core.running.swap(true, Ordering::SeqCst) {
            return Err(TrackerError::AlreadyRunning);
        }

        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name("gazelab-tracker".to_string())
            .spawn(move || core.run_worker())
            .map_err(|e| {
                self.core.running.store(false, Ordering::SeqCst);
                TrackerError::ThreadError(e.to_string())
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Request the worker to stop and wait for it; bounded by the read timeout
    pub fn stop(&self) {
        self.core.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("[TRACKER] Worker thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::SeqCst)
    }

    /// True once a data record has arrived on the current connection
    pub fn is_receiving(&self) -> bool {
        self.core.receiving.load(Ordering::SeqCst)
    }

    pub fn is_simulated(&self) -> bool {
        self.core.config.simulate
    }

    /// Send a command; when it expects an acknowledgement, wait up to `timeout`.
    ///
    /// Returns true iff the write succeeded and (if required) the matching
    /// acknowledgement arrived in time.
    pub fn send_command(&self, command: &TrackerCommand, timeout: Duration) -> bool {
        self.core.send(command, timeout)
    }

    /// Send with the configured acknowledgement timeout
    pub fn send(&self, command: &TrackerCommand) -> bool {
        self.core.send(command, self.core.config.ack_timeout())
    }

    pub fn enable_send_data(&self) -> bool {
        self.send(&TrackerCommand::enable_send_data())
    }

    pub fn calibrate_show(&self, show: bool) -> bool {
        self.send(&TrackerCommand::calibrate_show(show))
    }

    pub fn calibrate_clear(&self) -> bool {
        self.send(&TrackerCommand::calibrate_clear())
    }

    pub fn calibrate_reset(&self) -> bool {
        self.send(&TrackerCommand::calibrate_reset())
    }

    pub fn calibrate_add_point(&self, x: f64, y: f64) -> bool {
        self.send(&TrackerCommand::calibrate_add_point(x, y))
    }

    pub fn calibrate_timeout(&self, seconds: f64) -> bool {
        self.send(&TrackerCommand::calibrate_timeout(seconds))
    }

    pub fn calibrate_delay(&self, seconds: f64) -> bool {
        self.send(&TrackerCommand::calibrate_delay(seconds))
    }

    pub fn calibrate_start(&self) -> bool {
        self.send(&TrackerCommand::calibrate_start(true))
    }

    pub fn calibrate_stop(&self) -> bool {
        self.send(&TrackerCommand::calibrate_start(false))
    }

    pub fn request_result_summary(&self) -> bool {
        self.send(&TrackerCommand::result_summary())
    }

    /// Enable every configured stream field in order, each with its own
    /// short acknowledgement wait. Returns how many were acknowledged.
    pub fn enable_stream_fields(&self) -> usize {
        self.core.enable_stream_fields()
    }

    /// Re-enable the full field set on a short-lived thread after `delay`
    pub fn reenable_fields_after(&self, delay: Duration) {
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name("gazelab-tracker-reenable".to_string())
            .spawn(move || {
                core.sleep_while_running(delay);
                if core.connected.load(Ordering::SeqCst) {
                    let enabled = core.enable_stream_fields();
                    debug!("[TRACKER] Re-enabled {} stream fields", enabled);
                }
            });
        if let Err(e) = spawned {
            warn!("[TRACKER] Could not spawn field re-enable thread: {}", e);
        }
    }

    /// Copy of the latest point announcement
    pub fn point_progress(&self) -> Option<CalibrationPointProgress> {
        self.core.calibration.lock().progress
    }

    /// Final result of the current attempt, if the device has reported one
    pub fn calibration_result(&self) -> Option<CalibrationResult> {
        self.core.calibration.lock().result.clone()
    }

    /// Latest interim summary; never a completion signal
    pub fn result_summary(&self) -> Option<CalibrationResult> {
        self.core.calibration.lock().summary.clone()
    }

    pub fn reset_calibration_progress(&self) {
        self.core.calibration.lock().progress = None;
    }

    pub fn clear_calibration_results(&self) {
        let mut state = self.core.calibration.lock();
        state.result = None;
        state.summary = None;
    }

    /// Pop up to `max` buffered samples without blocking
    pub fn drain_samples(&self, max: usize) -> Vec<GazeSample> {
        self.core.samples.drain(max)
    }

    pub fn pending_ack_count(&self) -> usize {
        self.core.pending.pending_count()
    }

    pub fn stats(&self) -> TrackerStats {
        let c = &self.core.counters;
        TrackerStats {
            connects: c.connects.load(Ordering::Relaxed),
            records: c.records.load(Ordering::Relaxed),
            acks: c.acks.load(Ordering::Relaxed),
            calibration_messages: c.calibration_messages.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            commands_sent: c.commands_sent.load(Ordering::Relaxed),
            commands_failed: c.commands_failed.load(Ordering::Relaxed),
            samples_dropped: self.core.samples.dropped_count(),
        }
    }
}

impl Drop for TrackerLink {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LinkCore {
    fn new(config: TrackerConfig) -> Self {
        let capacity = config.sample_queue_capacity;
        Self {
            config,
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            receiving: AtomicBool::new(false),
            wire: Mutex::new(None),
            pending: PendingAcks::new(),
            calibration: Mutex::new(CalibrationState::default()),
            samples: SampleQueue::new(capacity),
            counters: LinkCounters::default(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run_worker(self: Arc<Self>) {
        let mode = if self.config.simulate { "simulated" } else { "tcp" };
        info!("[TRACKER] Worker started ({}, {})", mode, self.config.address());

        let mut failures: u64 = 0;
        while self.is_running() {
            let session = if self.config.simulate {
                self.run_simulated_session()
            } else {
                self.run_tcp_session()
            };

            let was_connected = self.connected.load(Ordering::SeqCst);
            self.teardown();

            match session {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    if was_connected || failures == 1 {
                        warn!("[TRACKER] Link error: {}", e);
                    } else {
                        debug!("[TRACKER] Reconnect attempt {} failed: {}", failures, e);
                    }
                }
            }

            if self.is_running() {
                self.sleep_while_running(self.config.reconnect_backoff());
            }
        }

        info!("[TRACKER] Worker stopped");
    }

    fn run_tcp_session(self: &Arc<Self>) -> Result<()> {
        let address = self.config.address();
        let socket_addr = address
            .to_socket_addrs()
            .map_err(|e| TrackerError::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| TrackerError::ConnectionFailed {
                address: address.clone(),
                reason: "address did not resolve".to_string(),
            })?;

        let stream = TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout())
            .map_err(|e| TrackerError::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        stream.set_read_timeout(Some(self.config.read_timeout()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("[TRACKER] Could not set TCP_NODELAY: {}", e);
        }
        let writer = stream.try_clone()?;
        *self.wire.lock() = Some(Wire::Tcp(writer));

        info!("[TRACKER] Connected to {}", address);
        self.on_connected();

        let mut reader = stream;
        let mut frames = FrameBuffer::new();
        let mut chunk = [0u8; READ_CHUNK];
        while self.is_running() {
            match reader.read(&mut chunk) {
                Ok(0) => {
                    info!("[TRACKER] Connection closed by tracker");
                    return Ok(());
                }
                Ok(n) => {
                    for line in frames.push(&chunk[..n]) {
                        self.handle_line(&line);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn run_simulated_session(self: &Arc<Self>) -> Result<()> {
        *self.wire.lock() = Some(Wire::Simulated(SimulatedTracker::new()));
        info!("[TRACKER] Simulated tracker attached");
        self.on_connected();

        let mut frames = FrameBuffer::new();
        while self.is_running() {
            let bytes = {
                let mut wire = self.wire.lock();
                match wire.as_mut() {
                    Some(Wire::Simulated(sim)) => sim.poll(Instant::now()),
                    _ => return Err(TrackerError::NotConnected),
                }
            };
            for line in frames.push(&bytes) {
                self.handle_line(&line);
            }
            thread::sleep(SIM_POLL_INTERVAL);
        }
        Ok(())
    }

    /// Enable streaming, then hand field enabling to a separate thread so
    /// this worker keeps reading the acknowledgements it waits on.
    fn on_connected(self: &Arc<Self>) {
        self.connected.store(true, Ordering::SeqCst);
        self.counters.connects.fetch_add(1, Ordering::Relaxed);

        if self.write_raw(&TrackerCommand::enable_send_data().to_wire()) {
            self.sleep_while_running(Duration::from_millis(self.config.stream_enable_settle_ms));
        }

        let core = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("gazelab-tracker-fields".to_string())
            .spawn(move || {
                let enabled = core.enable_stream_fields();
                info!(
                    "[TRACKER] Enabled {}/{} stream fields",
                    enabled,
                    core.config.stream_fields.len()
                );
            });
        if let Err(e) = spawned {
            warn!("[TRACKER] Could not spawn field enable thread: {}", e);
        }
    }

    fn teardown(&self) {
        *self.wire.lock() = None;
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("[TRACKER] Disconnected");
        }
        self.receiving.store(false, Ordering::SeqCst);
    }

    fn enable_stream_fields(&self) -> usize {
        let timeout = self.config.field_ack_timeout();
        let spacing = Duration::from_millis(self.config.field_enable_spacing_ms);
        let mut enabled = 0;
        for field in &self.config.stream_fields {
            if !self.is_running() || !self.connected.load(Ordering::SeqCst) {
                break;
            }
            if self.send(&TrackerCommand::set_state(field, true), timeout) {
                enabled += 1;
            } else {
                debug!("[TRACKER] No acknowledgement for {}", field);
            }
            thread::sleep(spacing);
        }
        enabled
    }

    fn write_raw(&self, bytes: &[u8]) -> bool {
        let mut wire = self.wire.lock();
        match wire.as_mut() {
            None => false,
            Some(w) => match w.write_all(bytes) {
                Ok(()) => true,
                Err(e) => {
                    warn!("[TRACKER] Send failed: {}", e);
                    false
                }
            },
        }
    }

    fn send(&self, command: &TrackerCommand, timeout: Duration) -> bool {
        // Register before writing: a fast reply must find its waiter.
        let waiter = command.ack_id.as_deref().map(|id| self.pending.register(id));

        let written = self.write_raw(&command.to_wire());
        let ok = match (&waiter, written) {
            (Some(w), true) => w.wait(timeout),
            (_, written) => written,
        };

        if let Some(w) = &waiter {
            self.pending.release(w);
        }

        self.counters.commands_sent.fetch_add(1, Ordering::Relaxed);
        if ok {
            debug!("[TRACKER] -> {}", command.text);
        } else {
            self.counters.commands_failed.fetch_add(1, Ordering::Relaxed);
            debug!(
                "[TRACKER] -> {} (failed: {})",
                command.text,
                if written { "no acknowledgement" } else { "not sent" }
            );
        }
        ok
    }

    fn handle_line(&self, line: &str) {
        let msg = match TrackerMessage::parse(line) {
            Ok(msg) => msg,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                trace!("[TRACKER] Skipping line: {}", e);
                return;
            }
        };

        match msg.kind {
            MessageKind::Record => {
                self.counters.records.fetch_add(1, Ordering::Relaxed);
                if !self.receiving.swap(true, Ordering::SeqCst) {
                    info!("[TRACKER] Receiving data records");
                }
                self.samples.push(GazeSample::from_record(&msg.attrs));
            }
            MessageKind::Ack => {
                self.counters.acks.fetch_add(1, Ordering::Relaxed);
                let id = msg.id.as_deref().unwrap_or_default();
                if id == RESULT_SUMMARY_ID {
                    if let Some(summary) = CalibrationResult::from_summary(&msg.attrs) {
                        debug!(
                            "[TRACKER] Result summary: avg_error={:.4} valid_points={}",
                            summary.average_error, summary.valid_points
                        );
                        self.calibration.lock().summary = Some(summary);
                    }
                }
                trace!("[TRACKER] <- ACK {}", id);
                self.pending.signal(id);
            }
            MessageKind::Calibration => {
                self.counters.calibration_messages.fetch_add(1, Ordering::Relaxed);
                self.handle_calibration(&msg);
            }
            MessageKind::Other => {
                trace!("[TRACKER] <- {} (ignored)", msg.tag);
            }
        }
    }

    fn handle_calibration(&self, msg: &TrackerMessage) {
        let id = msg.id.as_deref().unwrap_or_default();
        let now = Instant::now();
        match id {
            CALIB_RESULT_ID => {
                let result = CalibrationResult::from_final(&msg.attrs);
                info!(
                    "[TRACKER] Calibration result: avg_error={:.4} valid_points={} success={}",
                    result.average_error, result.valid_points, result.success
                );
                self.calibration.lock().result = Some(result);
            }
            CALIB_START_PT_ID => {
                let pt = match msg.attrs.i64("PT").and_then(|p| u32::try_from(p).ok()) {
                    Some(pt) => pt,
                    None => return,
                };
                debug!("[TRACKER] Calibration point {} started", pt);
                self.calibration.lock().progress = Some(CalibrationPointProgress {
                    pt,
                    started_at: now,
                    ended_at: None,
                    calx: msg.attrs.f64("CALX"),
                    caly: msg.attrs.f64("CALY"),
                });
            }
            CALIB_RESULT_PT_ID => {
                let pt = msg.attrs.i64("PT").and_then(|p| u32::try_from(p).ok());
                let mut state = self.calibration.lock();
                if let (Some(progress), Some(pt)) = (state.progress.as_mut(), pt) {
                    if progress.pt == pt {
                        progress.ended_at = Some(now);
                        debug!("[TRACKER] Calibration point {} sampled", pt);
                    }
                }
            }
            other => trace!("[TRACKER] <- CAL {} (ignored)", other),
        }
    }

    fn sleep_while_running(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> Arc<LinkCore> {
        let core = Arc::new(LinkCore::new(TrackerConfig::default()));
        core.running.store(true, Ordering::SeqCst);
        core
    }

    #[test]
    fn test_send_without_connection_fails_and_leaves_no_registration() {
        let core = core();
        assert!(!core.send(&TrackerCommand::calibrate_clear(), Duration::from_millis(10)));
        assert_eq!(core.pending.pending_count(), 0);
    }

    #[test]
    fn test_records_set_receiving_and_queue_samples() {
        let core = core();
        core.handle_line(r#"<REC BPOGX="0.2" BPOGY="0.3" BPOGV="1" />"#);
        core.handle_line("not a message");
        assert!(core.receiving.load(Ordering::SeqCst));
        assert_eq!(core.samples.len(), 1);
        assert_eq!(core.counters.malformed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_point_progress_tracks_start_and_end() {
        let core = core();
        core.handle_line(r#"<CAL ID="CALIB_START_PT" PT="2" CALX="0.0" CALY="1.0" />"#);
        core.handle_line(r#"<CAL ID="CALIB_RESULT_PT" PT="1" />"#);
        let progress = core.calibration.lock().progress;
        let progress = progress.unwrap();
        assert_eq!(progress.pt, 2);
        assert_eq!(progress.calx, Some(0.0));
        assert!(progress.ended_at.is_none());

        core.handle_line(r#"<CAL ID="CALIB_RESULT_PT" PT="2" />"#);
        assert!(core.calibration.lock().progress.unwrap().ended_at.is_some());
    }

    #[test]
    fn test_summary_is_stored_apart_from_final_result() {
        let core = core();
        let waiter = core.pending.register(RESULT_SUMMARY_ID);
        core.handle_line(r#"<ACK ID="CALIBRATE_RESULT_SUMMARY" AVE_ERROR="0.4" VALID_POINTS="4" />"#);
        assert!(waiter.wait(Duration::from_millis(10)));
        let state = core.calibration.lock();
        assert!(state.result.is_none());
        assert_eq!(state.summary.as_ref().map(|s| s.valid_points), Some(4));
    }

    #[test]
    fn test_simulated_wire_round_trip() {
        let core = core();
        *core.wire.lock() = Some(Wire::Simulated(SimulatedTracker::new()));
        core.connected.store(true, Ordering::SeqCst);

        let sender = Arc::clone(&core);
        let handle = thread::spawn(move || sender.send(&TrackerCommand::calibrate_show(false), Duration::from_secs(2)));

        let mut frames = FrameBuffer::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !handle.is_finished() && Instant::now() < deadline {
            let bytes = match core.wire.lock().as_mut() {
                Some(Wire::Simulated(sim)) => sim.poll(Instant::now()),
                _ => Vec::new(),
            };
            for line in frames.push(&bytes) {
                core.handle_line(&line);
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(handle.join().unwrap());
        assert_eq!(core.pending.pending_count(), 0);
    }
}
