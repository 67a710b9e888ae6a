// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Co-processor link
//!
//! A reader thread owns the receive side: it keeps the serial log, tracks
//! liveness from `BOOT`/`HB` lines, turns button lines into [`InputEvent`]s
//! and forwards `ACK`/`ERROR` replies to whichever command is in flight.
//! Commands are serialized by the writer lock, which is held across the
//! write and the reply wait so replies cannot be mismatched.

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use gazelab_config::CoprocessorConfig;

use crate::cache::{LedPlan, LedState, OutputCache};
use crate::discovery;
use crate::error::{CoprocessorError, Result};
use crate::events::{ButtonEdge, InputEvent, InputSource};
use crate::protocol::{DeviceCommand, InboundLine};
use crate::transport::{LineAssembler, LoopbackDevice, LoopbackSerial, SerialPortTransport, SerialTransport};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(20);
const SIM_CLOCK_INTERVAL: Duration = Duration::from_secs(1);
const SIM_BOOT_EPOCH: u32 = 1;

/// Result of one command exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Written; the command has no reply
    Sent,
    Acked,
    /// Device answered `ERROR...`
    Error(String),
    /// Written but no reply within the timeout
    NoReply,
    /// The write itself failed
    NotSent,
}

impl CommandOutcome {
    /// Acknowledged, or sent when no reply is expected
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Sent | CommandOutcome::Acked)
    }

    /// Assume the device applied it: written and not rejected
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            CommandOutcome::Sent | CommandOutcome::Acked | CommandOutcome::NoReply
        )
    }
}

#[derive(Debug, Default)]
struct Liveness {
    last_seen: Option<Instant>,
    epoch: Option<u32>,
    uptime_s: u64,
}

#[derive(Default)]
struct LinkCounters {
    lines_received: AtomicU64,
    commands_sent: AtomicU64,
    commands_failed: AtomicU64,
    replies_missed: AtomicU64,
    errors: AtomicU64,
    reboots: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoprocessorStats {
    pub lines_received: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub replies_missed: u64,
    pub errors: u64,
    pub reboots: u64,
}

struct LinkCore {
    config: CoprocessorConfig,
    port_name: String,
    running: AtomicBool,
    writer: Mutex<Box<dyn SerialTransport>>,
    reply_tx: Sender<String>,
    reply_rx: Receiver<String>,
    events: Sender<InputEvent>,
    cache: Mutex<OutputCache>,
    /// Set by the reader on a new boot epoch; applied on next cache access
    invalidate_pending: AtomicBool,
    liveness: Mutex<Liveness>,
    serial_log: Mutex<VecDeque<String>>,
    counters: LinkCounters,
}

/// Running connection to the LED/display co-processor
pub struct CoprocessorLink {
    core: Arc<LinkCore>,
    reader: Mutex<Option<JoinHandle<()>>>,
    clock: Mutex<Option<(Arc<AtomicBool>, JoinHandle<()>)>>,
}

impl CoprocessorLink {
    /// Open the configured (or discovered) port and initialize the device.
    /// With `simulate` set, runs against an in-memory firmware instead.
    pub fn open(config: &CoprocessorConfig, events: Sender<InputEvent>) -> Result<Self> {
        if config.simulate {
            return Self::simulated(config, events).map(|(link, _device)| link);
        }
        let port = resolve_port(config)?;
        info!("[COPROC] Opening {} at {} baud", port, config.baud);
        let transport = SerialPortTransport::open(&port, config.baud, READ_TIMEOUT).map_err(|e| match e {
            CoprocessorError::OpenFailed { port, reason, .. } => CoprocessorError::OpenFailed {
                port,
                reason,
                candidates: discovery::available_ports(),
            },
            other => other,
        })?;
        Self::start_with_transport(config, Box::new(transport), events)
    }

    /// Link over a loopback pair whose device side runs a firmware clock
    /// (`BOOT` until acknowledged, then `HB` every second)
    pub fn simulated(
        config: &CoprocessorConfig,
        events: Sender<InputEvent>,
    ) -> Result<(Self, LoopbackDevice)> {
        let (host, device) = LoopbackSerial::pair(READ_TIMEOUT);
        let link = Self::start_with_transport(config, Box::new(host), events)?;
        let running = Arc::new(AtomicBool::new(true));
        let handle = device
            .spawn_clock(SIM_BOOT_EPOCH, SIM_CLOCK_INTERVAL, Arc::clone(&running))
            .map_err(|e| CoprocessorError::ThreadError(e.to_string()))?;
        *link.clock.lock() = Some((running, handle));
        info!("[COPROC] Running simulated co-processor");
        Ok((link, device))
    }

    /// Start the reader on an open transport, then send `INIT` and blank
    /// the strip
    pub fn start_with_transport(
        config: &CoprocessorConfig,
        transport: Box<dyn SerialTransport>,
        events: Sender<InputEvent>,
    ) -> Result<Self> {
        if config.open_settle_ms > 0 {
            thread::sleep(Duration::from_millis(config.open_settle_ms));
        }
        let reader_transport = transport.try_clone()?;
        let (reply_tx, reply_rx) = unbounded();
        let core = Arc::new(LinkCore {
            config: config.clone(),
            port_name: transport.name().to_string(),
            running: AtomicBool::new(true),
            writer: Mutex::new(transport),
            reply_tx,
            reply_rx,
            events,
            cache: Mutex::new(OutputCache::new(config.brightness)),
            invalidate_pending: AtomicBool::new(false),
            liveness: Mutex::new(Liveness::default()),
            serial_log: Mutex::new(VecDeque::with_capacity(config.serial_log_capacity)),
            counters: LinkCounters::default(),
        });

        let reader_core = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name("gazelab-coproc-rx".to_string())
            .spawn(move || reader_core.run_reader(reader_transport))
            .map_err(|e| CoprocessorError::ThreadError(e.to_string()))?;

        let link = Self {
            core,
            reader: Mutex::new(Some(handle)),
            clock: Mutex::new(None),
        };
        link.initialize();
        Ok(link)
    }

    fn initialize(&self) {
        let init = DeviceCommand::Init {
            pixels: self.core.config.pixel_count,
            brightness: self.core.config.brightness_byte(),
        };
        let outcome = self.core.send(&init, self.init_ack_timeout());
        if !outcome.is_ok() {
            warn!("[COPROC] INIT not acknowledged ({:?}), continuing", outcome);
        }
        self.all_off();
    }

    /// Blank the strip and stop the reader
    pub fn stop(&self) {
        if !self.core.running.load(Ordering::SeqCst) {
            return;
        }
        self.all_off();
        self.core.running.store(false, Ordering::SeqCst);
        if let Some((running, handle)) = self.clock.lock().take() {
            running.store(false, Ordering::SeqCst);
            let _ = handle.join();
        }
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                warn!("[COPROC] Reader thread panicked");
            }
        }
        info!("[COPROC] Link to {} closed", self.core.port_name);
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    pub fn port_name(&self) -> &str {
        &self.core.port_name
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn send_command(&self, command: &DeviceCommand) -> CommandOutcome {
        self.core.send(command, self.ack_timeout())
    }

    /// Light a single pixel (everything else off). Returns false when the
    /// write failed or the device rejected it.
    pub fn set_led(&self, index: u8, rgb: [u8; 3]) -> bool {
        let plan = self.core.with_cache(|cache| cache.plan_single(index, rgb));
        self.apply_led_plan(plan)
    }

    pub fn all_on(&self, rgb: [u8; 3]) -> bool {
        let plan = self.core.with_cache(|cache| cache.plan_all_on(rgb));
        self.apply_led_plan(plan)
    }

    pub fn all_off(&self) -> bool {
        let plan = self.core.with_cache(|cache| cache.plan_all_off());
        self.apply_led_plan(plan)
    }

    pub fn led_state(&self) -> LedState {
        self.core.with_cache(|cache| cache.led())
    }

    /// Update host-side color scaling and the firmware brightness
    pub fn set_brightness(&self, brightness: f64) -> bool {
        let brightness = brightness.clamp(0.0, 1.0);
        self.core.with_cache(|cache| cache.set_brightness(brightness));
        let byte = (255.0 * brightness) as u8;
        self.send_command(&DeviceCommand::Brightness(byte)).is_applied()
    }

    pub fn oled_init(&self) -> bool {
        self.send_command(&DeviceCommand::OledInit).is_applied()
    }

    pub fn set_screen(&self, name: &str) -> bool {
        let Some(command) = self.core.with_cache(|cache| cache.plan_screen(name)) else {
            return true;
        };
        let applied = self.send_command(&command).is_applied();
        if applied {
            self.core.with_cache(|cache| cache.commit_screen(name));
        }
        applied
    }

    pub fn set_bool(&self, name: &str, value: bool) -> bool {
        self.set_var(DeviceCommand::set_bool(name, value))
    }

    pub fn set_u8(&self, name: &str, value: i64) -> bool {
        self.set_var(DeviceCommand::set_u8(name, value))
    }

    pub fn set_str(&self, name: &str, value: &str) -> bool {
        self.set_var(DeviceCommand::set_str(name, value))
    }

    fn set_var(&self, command: DeviceCommand) -> bool {
        let Some(command) = self.core.with_cache(|cache| cache.plan_var(&command)) else {
            return true;
        };
        let applied = self.send_command(&command).is_applied();
        if applied {
            self.core.with_cache(|cache| cache.commit_var(&command));
        }
        applied
    }

    /// Tell the firmware its boot announcement was seen
    pub fn ack_boot(&self, epoch: u32) -> bool {
        self.send_command(&DeviceCommand::AckBoot(epoch)).is_ok()
    }

    /// Re-initialize after a reboot and push every cached display value
    /// again. `screen` overrides the last cached screen.
    pub fn reassert(&self, screen: Option<&str>) -> bool {
        let stale = self.core.with_cache(|cache| {
            cache.invalidate();
            cache.take_stale()
        });

        let init = DeviceCommand::Init {
            pixels: self.core.config.pixel_count,
            brightness: self.core.config.brightness_byte(),
        };
        let init_ok = self.core.send(&init, self.init_ack_timeout()).is_applied();
        let off_ok = self.send_command(&DeviceCommand::AllOff).is_applied();
        if off_ok {
            self.core.with_cache(|cache| cache.commit_led(LedState::Off));
        }
        self.oled_init();

        if let Some(name) = screen.map(str::to_string).or(stale.screen) {
            self.set_screen(&name);
        }
        let var_count = stale.vars.len();
        for (class, name, value) in stale.vars {
            self.set_var(DeviceCommand::SetVar { class, name, value });
        }
        info!("[COPROC] Re-asserted output state ({} display values)", var_count);
        init_ok && off_ok
    }

    // ------------------------------------------------------------------
    // Liveness and diagnostics
    // ------------------------------------------------------------------

    /// Heard a `BOOT`/`HB` line within the heartbeat timeout
    pub fn is_alive(&self) -> bool {
        self.last_seen_age()
            .map(|age| age <= Duration::from_millis(self.core.config.heartbeat_timeout_ms))
            .unwrap_or(false)
    }

    pub fn last_seen_age(&self) -> Option<Duration> {
        self.core.liveness.lock().last_seen.map(|t| t.elapsed())
    }

    pub fn boot_epoch(&self) -> Option<u32> {
        self.core.liveness.lock().epoch
    }

    pub fn uptime_s(&self) -> u64 {
        self.core.liveness.lock().uptime_s
    }

    /// Recent traffic, oldest first; `>` marks sent and `<` received lines
    pub fn serial_log(&self) -> Vec<String> {
        self.core.serial_log.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> CoprocessorStats {
        let c = &self.core.counters;
        CoprocessorStats {
            lines_received: c.lines_received.load(Ordering::Relaxed),
            commands_sent: c.commands_sent.load(Ordering::Relaxed),
            commands_failed: c.commands_failed.load(Ordering::Relaxed),
            replies_missed: c.replies_missed.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            reboots: c.reboots.load(Ordering::Relaxed),
        }
    }

    fn apply_led_plan(&self, plan: LedPlan) -> bool {
        if plan.is_noop() {
            return true;
        }
        for command in &plan.commands {
            if !self.send_command(command).is_applied() {
                return false;
            }
        }
        self.core.with_cache(|cache| cache.commit_led(plan.next));
        true
    }

    fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.core.config.ack_timeout_ms)
    }

    fn init_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.core.config.init_ack_timeout_ms)
    }
}

impl Drop for CoprocessorLink {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LinkCore {
    fn with_cache<R>(&self, f: impl FnOnce(&mut OutputCache) -> R) -> R {
        let mut cache = self.cache.lock();
        if self.invalidate_pending.swap(false, Ordering::SeqCst) {
            cache.invalidate();
        }
        f(&mut cache)
    }

    fn send(&self, command: &DeviceCommand, timeout: Duration) -> CommandOutcome {
        let line = command.to_line();
        let mut writer = self.writer.lock();
        while self.reply_rx.try_recv().is_ok() {}

        if let Err(e) = writer.write_all(format!("{}\n", line).as_bytes()) {
            self.counters.commands_failed.fetch_add(1, Ordering::Relaxed);
            warn!("[COPROC] Write of '{}' failed: {}", line, e);
            return CommandOutcome::NotSent;
        }
        self.counters.commands_sent.fetch_add(1, Ordering::Relaxed);
        self.log_line(format!("> {}", line));

        if !command.expects_reply() {
            return CommandOutcome::Sent;
        }
        match self.reply_rx.recv_timeout(timeout) {
            Ok(reply) if reply.to_ascii_uppercase().starts_with("ERROR") => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("[COPROC] '{}' rejected: {}", line, reply);
                CommandOutcome::Error(reply)
            }
            Ok(_) => CommandOutcome::Acked,
            Err(_) => {
                self.counters.replies_missed.fetch_add(1, Ordering::Relaxed);
                debug!("[COPROC] No reply to '{}' within {:?}", line, timeout);
                CommandOutcome::NoReply
            }
        }
    }

    fn run_reader(self: Arc<Self>, mut transport: Box<dyn SerialTransport>) {
        let mut assembler = LineAssembler::new();
        let mut buf = [0u8; 512];
        let mut consecutive_errors = 0u32;

        while self.running.load(Ordering::SeqCst) {
            match transport.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    consecutive_errors = 0;
                    for line in assembler.push(&buf[..n]) {
                        self.handle_line(&line);
                    }
                }
                Err(e) => {
                    if consecutive_errors == 0 {
                        warn!("[COPROC] Read error on {}: {}", self.port_name, e);
                    }
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
        debug!("[COPROC] Reader stopped");
    }

    fn handle_line(&self, line: &str) {
        self.counters.lines_received.fetch_add(1, Ordering::Relaxed);
        self.log_line(format!("< {}", line));

        match InboundLine::parse(line) {
            InboundLine::Boot { epoch, uptime_s } | InboundLine::Heartbeat { epoch, uptime_s } => {
                self.on_liveness(epoch, uptime_s)
            }
            InboundLine::Button { kind, button } => {
                let edge = ButtonEdge {
                    kind,
                    button,
                    source: InputSource::Coprocessor,
                };
                debug!("[COPROC] Button {}", edge);
                let _ = self.events.send(InputEvent::Button(edge));
            }
            InboundLine::Ack(reply) | InboundLine::Error(reply) => {
                let _ = self.reply_tx.send(reply);
            }
            InboundLine::Hello(greeting) => debug!("[COPROC] Greeting: {}", greeting),
            InboundLine::Other(other) => trace!("[COPROC] Unhandled line: {}", other),
        }
    }

    fn on_liveness(&self, epoch: u32, uptime_s: u64) {
        let previous = {
            let mut liveness = self.liveness.lock();
            liveness.last_seen = Some(Instant::now());
            liveness.uptime_s = uptime_s;
            if liveness.epoch == Some(epoch) {
                return;
            }
            liveness.epoch.replace(epoch)
        };

        self.invalidate_pending.store(true, Ordering::SeqCst);
        self.counters.reboots.fetch_add(1, Ordering::Relaxed);
        match previous {
            Some(old) => info!("[COPROC] Device rebooted (epoch {} -> {})", old, epoch),
            None => info!("[COPROC] Device boot epoch {} (uptime {}s)", epoch, uptime_s),
        }
        let _ = self.events.send(InputEvent::Boot { epoch, uptime_s });
    }

    fn log_line(&self, line: String) {
        let capacity = self.config.serial_log_capacity.max(1);
        let mut log = self.serial_log.lock();
        while log.len() >= capacity {
            log.pop_front();
        }
        log.push_back(line);
    }
}

/// Configured port matched case-insensitively against the enumerated
/// ports, or the first port that passes discovery
fn resolve_port(config: &CoprocessorConfig) -> Result<String> {
    match config.configured_port() {
        Some(port) => {
            let available = discovery::available_ports();
            if let Some(found) = available.iter().find(|p| p.eq_ignore_ascii_case(port)) {
                return Ok(found.clone());
            }
            // Pseudo-terminals and symlinks are not always enumerated
            if Path::new(port).exists() {
                return Ok(port.to_string());
            }
            Err(CoprocessorError::PortNotFound {
                port: port.to_string(),
                available,
            })
        }
        None => {
            let report = discovery::discover(config.baud);
            report.selected.ok_or(CoprocessorError::NoDeviceFound {
                tried: report.tried,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CoprocessorConfig {
        CoprocessorConfig {
            open_settle_ms: 0,
            ack_timeout_ms: 100,
            init_ack_timeout_ms: 100,
            serial_log_capacity: 4,
            ..CoprocessorConfig::default()
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert!(CommandOutcome::Acked.is_ok());
        assert!(CommandOutcome::NoReply.is_applied());
        assert!(!CommandOutcome::NoReply.is_ok());
        assert!(!CommandOutcome::Error("ERROR".into()).is_applied());
        assert!(!CommandOutcome::NotSent.is_applied());
    }

    #[test]
    fn test_serial_log_is_bounded() {
        let (host, device) = LoopbackSerial::pair(Duration::from_millis(10));
        let (tx, _rx) = unbounded();
        let link = CoprocessorLink::start_with_transport(&config(), Box::new(host), tx).unwrap();
        for i in 0..10 {
            device.push_line(&format!("NOISE {}", i));
        }
        thread::sleep(Duration::from_millis(100));
        let log = link.serial_log();
        assert_eq!(log.len(), 4);
        assert_eq!(log.last().map(String::as_str), Some("< NOISE 9"));
    }

    #[test]
    fn test_configured_port_must_exist() {
        let config = CoprocessorConfig {
            serial_port: "/dev/definitely-not-a-port".into(),
            ..CoprocessorConfig::default()
        };
        assert!(matches!(
            resolve_port(&config),
            Err(CoprocessorError::PortNotFound { .. })
        ));
    }
}
