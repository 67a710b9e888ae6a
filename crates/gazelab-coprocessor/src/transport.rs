// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Byte transports under the co-processor link.
//!
//! [`SerialPortTransport`] drives a real USB-CDC port; [`LoopbackSerial`]
//! pairs with a [`LoopbackDevice`] that behaves like the firmware, for
//! simulation and tests.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{CoprocessorError, Result};

/// Longest partial line kept while waiting for its terminator
const MAX_PARTIAL_LINE: usize = 4096;

/// Host lines a loopback device remembers; older lines are dropped
const LOOPBACK_WRITTEN_CAPACITY: usize = 1000;

/// Minimal serial abstraction: blocking writes, reads that return `Ok(0)`
/// when the read timeout elapses without data.
pub trait SerialTransport: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Independent handle to the same port, used by the reader thread
    fn try_clone(&self) -> io::Result<Box<dyn SerialTransport>>;

    fn name(&self) -> &str;
}

pub struct SerialPortTransport {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialPortTransport {
    pub fn open(name: &str, baud: u32, read_timeout: Duration) -> Result<Self> {
        let port = serialport::new(name, baud)
            .timeout(read_timeout)
            .open()
            .map_err(|e| CoprocessorError::OpenFailed {
                port: name.to_string(),
                reason: e.to_string(),
                candidates: Vec::new(),
            })?;
        Ok(Self {
            port,
            name: name.to_string(),
        })
    }
}

impl SerialTransport for SerialPortTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialTransport>> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| io::Error::new(ErrorKind::Other, e.to_string()))?;
        Ok(Box::new(SerialPortTransport {
            port,
            name: self.name.clone(),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Splits a byte stream into trimmed, non-empty lines. Bare `\r` counts as
/// a terminator since some firmware builds emit CR-only line endings.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                    self.pending.clear();
                }
            } else if self.pending.len() < MAX_PARTIAL_LINE {
                self.pending.push(byte);
            }
        }
        lines
    }
}

// ============================================================================
// Loopback
// ============================================================================

struct LoopbackShared {
    to_host: Mutex<VecDeque<u8>>,
    data_ready: Condvar,
    from_host: Mutex<LineAssembler>,
    written: Mutex<VecDeque<String>>,
    auto_reply: AtomicBool,
    failing_prefix: Mutex<Option<String>>,
    acked_boot: Mutex<Option<u32>>,
}

impl LoopbackShared {
    fn push_to_host(&self, line: &str) {
        let mut queue = self.to_host.lock();
        queue.extend(line.as_bytes());
        queue.push_back(b'\n');
        self.data_ready.notify_all();
    }

    fn on_host_line(&self, line: &str) {
        {
            let mut written = self.written.lock();
            if written.len() == LOOPBACK_WRITTEN_CAPACITY {
                written.pop_front();
            }
            written.push_back(line.to_string());
        }
        let upper = line.to_ascii_uppercase();

        if let Some(id) = upper.strip_prefix("ACK:BOOT:") {
            if let Ok(id) = id.trim().parse() {
                *self.acked_boot.lock() = Some(id);
            }
            return;
        }
        if !self.auto_reply.load(Ordering::SeqCst) || upper.starts_with("OLED") {
            return;
        }
        if upper == "PING" {
            self.push_to_host("HELLO NEOPIXEL OLED");
            return;
        }
        let led_command = ["INIT", "ALL", "PIXEL", "BRIGHTNESS"]
            .iter()
            .any(|prefix| upper.starts_with(prefix));
        if !led_command {
            self.push_to_host("ERROR:UNKNOWN");
            return;
        }
        let failing = self
            .failing_prefix
            .lock()
            .as_ref()
            .map(|prefix| upper.starts_with(prefix.as_str()))
            .unwrap_or(false);
        if failing {
            self.push_to_host(&format!("ERROR:{}", upper));
        } else {
            self.push_to_host("ACK");
        }
    }
}

/// Host end of an in-memory serial pair
#[derive(Clone)]
pub struct LoopbackSerial {
    shared: Arc<LoopbackShared>,
    read_timeout: Duration,
}

/// Device end of an in-memory serial pair: answers like the firmware and
/// lets callers inject unsolicited lines.
#[derive(Clone)]
pub struct LoopbackDevice {
    shared: Arc<LoopbackShared>,
}

impl LoopbackSerial {
    pub fn pair(read_timeout: Duration) -> (LoopbackSerial, LoopbackDevice) {
        let shared = Arc::new(LoopbackShared {
            to_host: Mutex::new(VecDeque::new()),
            data_ready: Condvar::new(),
            from_host: Mutex::new(LineAssembler::new()),
            written: Mutex::new(VecDeque::new()),
            auto_reply: AtomicBool::new(true),
            failing_prefix: Mutex::new(None),
            acked_boot: Mutex::new(None),
        });
        (
            LoopbackSerial {
                shared: Arc::clone(&shared),
                read_timeout,
            },
            LoopbackDevice { shared },
        )
    }
}

impl SerialTransport for LoopbackSerial {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let lines = self.shared.from_host.lock().push(data);
        for line in lines {
            self.shared.on_host_line(&line);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        let mut queue = self.shared.to_host.lock();
        while queue.is_empty() {
            if self
                .shared
                .data_ready
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                break;
            }
        }
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialTransport>> {
        Ok(Box::new(self.clone()))
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

impl LoopbackDevice {
    pub fn push_line(&self, line: &str) {
        self.shared.push_to_host(line);
    }

    pub fn emit_boot(&self, epoch: u32, uptime_s: u64) {
        self.push_line(&format!("BOOT:{}:{}", epoch, uptime_s));
    }

    pub fn emit_heartbeat(&self, epoch: u32, uptime_s: u64) {
        self.push_line(&format!("HB:{}:{}", epoch, uptime_s));
    }

    pub fn press(&self, button: &str) {
        self.push_line(&format!("BTN:PRESS:{}", button));
    }

    pub fn release(&self, button: &str) {
        self.push_line(&format!("BTN:RELEASE:{}", button));
    }

    /// Recent lines the host has written, oldest first
    pub fn written_lines(&self) -> Vec<String> {
        self.shared.written.lock().iter().cloned().collect()
    }

    pub fn take_written(&self) -> Vec<String> {
        self.shared.written.lock().drain(..).collect()
    }

    /// When disabled the device stays silent, as a wedged firmware would
    pub fn set_auto_reply(&self, enabled: bool) {
        self.shared.auto_reply.store(enabled, Ordering::SeqCst);
    }

    /// Answer `ERROR` to LED commands starting with `prefix`
    pub fn fail_commands(&self, prefix: Option<&str>) {
        *self.shared.failing_prefix.lock() = prefix.map(|p| p.to_ascii_uppercase());
    }

    pub fn acked_boot(&self) -> Option<u32> {
        *self.shared.acked_boot.lock()
    }

    /// Firmware clock: announces `BOOT` until the host acknowledges the
    /// epoch, then sends `HB` at the same cadence.
    pub fn spawn_clock(
        &self,
        epoch: u32,
        interval: Duration,
        running: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let device = self.clone();
        thread::Builder::new()
            .name("gazelab-coproc-sim".to_string())
            .spawn(move || {
                let started = Instant::now();
                while running.load(Ordering::SeqCst) {
                    let uptime_s = started.elapsed().as_secs();
                    if device.acked_boot() == Some(epoch) {
                        device.emit_heartbeat(epoch, uptime_s);
                    } else {
                        device.emit_boot(epoch, uptime_s);
                    }
                    let wake = Instant::now() + interval;
                    while running.load(Ordering::SeqCst) && Instant::now() < wake {
                        thread::sleep(Duration::from_millis(20));
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_lines(host: &mut LoopbackSerial) -> Vec<String> {
        let mut assembler = LineAssembler::new();
        let mut buf = [0u8; 256];
        let mut lines = Vec::new();
        loop {
            let n = host.read(&mut buf).unwrap();
            if n == 0 {
                return lines;
            }
            lines.extend(assembler.push(&buf[..n]));
        }
    }

    #[test]
    fn test_line_assembler_handles_cr_and_partial_lines() {
        let mut assembler = LineAssembler::new();
        assert_eq!(assembler.push(b"HB:1:2\rBTN:PR"), vec!["HB:1:2"]);
        assert_eq!(assembler.push(b"ESS:A\r\n\r\n"), vec!["BTN:PRESS:A"]);
        assert!(assembler.push(b"  \n").is_empty());
    }

    #[test]
    fn test_loopback_answers_like_firmware() {
        let (mut host, device) = LoopbackSerial::pair(Duration::from_millis(20));
        host.write_all(b"INIT:4:76\nOLED:INIT\nPING\nACK:BOOT:3\nBOGUS\n").unwrap();
        assert_eq!(
            read_lines(&mut host),
            vec!["ACK", "HELLO NEOPIXEL OLED", "ERROR:UNKNOWN"]
        );
        assert_eq!(device.acked_boot(), Some(3));
        assert_eq!(device.written_lines().len(), 5);
    }

    #[test]
    fn test_loopback_failures_and_silence() {
        let (mut host, device) = LoopbackSerial::pair(Duration::from_millis(20));
        device.fail_commands(Some("pixel"));
        host.write_all(b"PIXEL:9:1:1:1\n").unwrap();
        assert_eq!(read_lines(&mut host), vec!["ERROR:PIXEL:9:1:1:1"]);

        device.set_auto_reply(false);
        host.write_all(b"ALL:OFF\n").unwrap();
        assert!(read_lines(&mut host).is_empty());
    }

    #[test]
    fn test_written_history_keeps_newest_lines() {
        let (mut host, device) = LoopbackSerial::pair(Duration::from_millis(10));
        device.set_auto_reply(false);
        for i in 0..LOOPBACK_WRITTEN_CAPACITY + 5 {
            host.write_all(format!("PIXEL:0:{}:0:0\n", i % 256).as_bytes()).unwrap();
        }
        let written = device.written_lines();
        assert_eq!(written.len(), LOOPBACK_WRITTEN_CAPACITY);
        assert_eq!(written[0], format!("PIXEL:0:{}:0:0", 5));
        assert_eq!(
            written.last().map(String::as_str),
            Some(format!("PIXEL:0:{}:0:0", (LOOPBACK_WRITTEN_CAPACITY + 4) % 256).as_str())
        );
        assert_eq!(device.take_written().len(), LOOPBACK_WRITTEN_CAPACITY);
        assert!(device.written_lines().is_empty());
    }

    #[test]
    fn test_read_times_out_with_zero() {
        let (mut host, _device) = LoopbackSerial::pair(Duration::from_millis(10));
        let started = Instant::now();
        let mut buf = [0u8; 8];
        assert_eq!(host.read(&mut buf).unwrap(), 0);
        assert!(started.elapsed() >= Duration::from_millis(10));
    }
}
