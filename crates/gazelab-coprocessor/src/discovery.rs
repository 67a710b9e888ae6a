// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Serial port auto-discovery.
//!
//! Every enumerated port is opened and probed in order, from least to most
//! intrusive: a spontaneous `HELLO` greeting, then `PING`, then `ALL:OFF`
//! and `INIT` expecting `ACK`/`ERROR`. The first port that answers wins.

use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{is_device_greeting, InboundLine};
use crate::transport::{LineAssembler, SerialPortTransport, SerialTransport};

/// Read timeout used while probing
const PROBE_READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimings {
    /// Wait after opening before listening (USB-CDC resets on open)
    pub settle: Duration,
    pub greeting_window: Duration,
    pub ping_wait: Duration,
    pub fallback_wait: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            greeting_window: Duration::from_secs(2),
            ping_wait: Duration::from_millis(500),
            fallback_wait: Duration::from_millis(800),
        }
    }
}

/// Which probe step identified the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMatch {
    Greeting,
    PingReply,
    /// Answered one of the LED fallback commands
    Replied(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub selected: Option<String>,
    pub matched: Option<ProbeMatch>,
    pub tried: Vec<String>,
}

/// Names of the serial ports the OS reports
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("[COPROC] Could not enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Probe every available port with default timings
pub fn discover(baud: u32) -> DiscoveryReport {
    let candidates = available_ports();
    discover_with(&candidates, &ProbeTimings::default(), |name| {
        let transport = SerialPortTransport::open(name, baud, PROBE_READ_TIMEOUT)?;
        Ok(Box::new(transport))
    })
}

/// Probe `candidates` in order using `open` to obtain each transport
pub fn discover_with<F>(candidates: &[String], timings: &ProbeTimings, mut open: F) -> DiscoveryReport
where
    F: FnMut(&str) -> Result<Box<dyn SerialTransport>>,
{
    let mut report = DiscoveryReport::default();
    for name in candidates {
        report.tried.push(name.clone());
        let mut transport = match open(name) {
            Ok(transport) => transport,
            Err(e) => {
                debug!("[COPROC] Skipping {}: {}", name, e);
                continue;
            }
        };
        if let Some(matched) = probe(transport.as_mut(), timings) {
            info!("[COPROC] Found co-processor on {} ({:?})", name, matched);
            report.selected = Some(name.clone());
            report.matched = Some(matched);
            return report;
        }
        debug!("[COPROC] No answer on {}", name);
    }
    report
}

/// Identify the firmware on an already-open transport
pub fn probe(transport: &mut dyn SerialTransport, timings: &ProbeTimings) -> Option<ProbeMatch> {
    let mut assembler = LineAssembler::new();
    thread::sleep(timings.settle);

    if listen(transport, &mut assembler, timings.greeting_window, is_device_greeting) {
        return Some(ProbeMatch::Greeting);
    }

    if transport.write_all(b"PING\n").is_ok()
        && listen(transport, &mut assembler, timings.ping_wait, is_device_greeting)
    {
        return Some(ProbeMatch::PingReply);
    }

    for (label, line) in [("ALL:OFF", "ALL:OFF\n"), ("INIT", "INIT:4:76\n")] {
        if transport.write_all(line.as_bytes()).is_err() {
            return None;
        }
        if listen(transport, &mut assembler, timings.fallback_wait, |l| {
            InboundLine::parse(l).is_reply()
        }) {
            return Some(ProbeMatch::Replied(label));
        }
    }
    None
}

fn listen(
    transport: &mut dyn SerialTransport,
    assembler: &mut LineAssembler,
    window: Duration,
    accept: impl Fn(&str) -> bool,
) -> bool {
    let deadline = Instant::now() + window;
    let mut buf = [0u8; 256];
    while Instant::now() < deadline {
        match transport.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                if assembler.push(&buf[..n]).iter().any(|line| accept(line)) {
                    return true;
                }
            }
            Err(_) => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoprocessorError;
    use crate::transport::{LoopbackDevice, LoopbackSerial};

    fn fast() -> ProbeTimings {
        ProbeTimings {
            settle: Duration::from_millis(1),
            greeting_window: Duration::from_millis(30),
            ping_wait: Duration::from_millis(30),
            fallback_wait: Duration::from_millis(30),
        }
    }

    fn pair() -> (LoopbackSerial, LoopbackDevice) {
        LoopbackSerial::pair(Duration::from_millis(5))
    }

    #[test]
    fn test_greeting_wins_without_writes() {
        let (mut host, device) = pair();
        device.push_line("HELLO NEOPIXEL OLED");
        assert_eq!(probe(&mut host, &fast()), Some(ProbeMatch::Greeting));
        assert!(device.written_lines().is_empty());
    }

    #[test]
    fn test_ping_is_tried_second() {
        let (mut host, device) = pair();
        assert_eq!(probe(&mut host, &fast()), Some(ProbeMatch::PingReply));
        assert_eq!(device.written_lines(), vec!["PING"]);
    }

    #[test]
    fn test_silent_port_gets_every_probe() {
        let (mut host, device) = pair();
        device.set_auto_reply(false);
        assert_eq!(probe(&mut host, &fast()), None);
        assert_eq!(device.written_lines(), vec!["PING", "ALL:OFF", "INIT:4:76"]);
    }

    #[test]
    fn test_discovery_skips_unopenable_and_silent_ports() {
        let (silent_host, silent) = pair();
        silent.set_auto_reply(false);
        let (good_host, _good) = pair();
        let candidates = vec!["busy".to_string(), "silent".to_string(), "good".to_string()];

        let report = discover_with(&candidates, &fast(), |name| match name {
            "silent" => Ok(Box::new(silent_host.clone())),
            "good" => Ok(Box::new(good_host.clone())),
            other => Err(CoprocessorError::OpenFailed {
                port: other.to_string(),
                reason: "Device or resource busy".into(),
                candidates: vec![],
            }),
        });
        assert_eq!(report.selected.as_deref(), Some("good"));
        assert_eq!(report.matched, Some(ProbeMatch::PingReply));
        assert_eq!(report.tried, candidates);
    }
}
