// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited text protocol spoken by the co-processor firmware.
//!
//! Host to device:
//!
//! | Command                       | Reply          |
//! |-------------------------------|----------------|
//! | `INIT:<n>:<brightness>`       | `ACK` / `ERROR`|
//! | `ALL:OFF`, `ALL:ON:r:g:b`     | `ACK` / `ERROR`|
//! | `PIXEL:i:r:g:b`               | `ACK` / `ERROR`|
//! | `BRIGHTNESS:v`                | `ACK` / `ERROR`|
//! | `OLED:INIT`, `OLED:UI:...`    | none           |
//! | `ACK:BOOT:<id>`               | none           |
//! | `PING`                        | `HELLO ...`    |
//!
//! Device to host: `BOOT:<id>:<uptime>`, `HB:<id>:<uptime>`,
//! `BTN:PRESS|RELEASE:<NAME>`, `ACK...`, `ERROR...`, `HELLO ...`.

use crate::events::EdgeKind;

/// Typed display variable classes understood by the OLED UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarClass {
    Bool,
    U8,
    Str,
}

impl VarClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarClass::Bool => "BOOL",
            VarClass::U8 => "U8",
            VarClass::Str => "STR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Init { pixels: u8, brightness: u8 },
    AllOff,
    AllOn { rgb: [u8; 3] },
    Pixel { index: u8, rgb: [u8; 3] },
    Brightness(u8),
    OledInit,
    Screen(String),
    SetVar {
        class: VarClass,
        name: String,
        value: String,
    },
    AckBoot(u32),
    Ping,
}

impl DeviceCommand {
    pub fn set_bool(name: &str, value: bool) -> Self {
        DeviceCommand::SetVar {
            class: VarClass::Bool,
            name: name.to_string(),
            value: if value { "1" } else { "0" }.to_string(),
        }
    }

    /// Values outside 0..=255 are clamped
    pub fn set_u8(name: &str, value: i64) -> Self {
        DeviceCommand::SetVar {
            class: VarClass::U8,
            name: name.to_string(),
            value: value.clamp(0, 255).to_string(),
        }
    }

    /// Embedded newlines travel as a literal `\n` escape
    pub fn set_str(name: &str, value: &str) -> Self {
        DeviceCommand::SetVar {
            class: VarClass::Str,
            name: name.to_string(),
            value: value.replace('\n', "\\n"),
        }
    }

    /// Line to put on the wire, without the trailing newline
    pub fn to_line(&self) -> String {
        match self {
            DeviceCommand::Init { pixels, brightness } => format!("INIT:{}:{}", pixels, brightness),
            DeviceCommand::AllOff => "ALL:OFF".to_string(),
            DeviceCommand::AllOn { rgb: [r, g, b] } => format!("ALL:ON:{}:{}:{}", r, g, b),
            DeviceCommand::Pixel { index, rgb: [r, g, b] } => {
                format!("PIXEL:{}:{}:{}:{}", index, r, g, b)
            }
            DeviceCommand::Brightness(v) => format!("BRIGHTNESS:{}", v),
            DeviceCommand::OledInit => "OLED:INIT".to_string(),
            DeviceCommand::Screen(name) => format!("OLED:UI:SCREEN:{}", name),
            DeviceCommand::SetVar { class, name, value } => {
                format!("OLED:UI:SET:{}:{}:{}", class.as_str(), name, value)
            }
            DeviceCommand::AckBoot(id) => format!("ACK:BOOT:{}", id),
            DeviceCommand::Ping => "PING".to_string(),
        }
    }

    /// Whether the firmware answers this command with ACK/ERROR
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            DeviceCommand::Init { .. }
                | DeviceCommand::AllOff
                | DeviceCommand::AllOn { .. }
                | DeviceCommand::Pixel { .. }
                | DeviceCommand::Brightness(_)
        )
    }
}

/// One parsed line received from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    Boot { epoch: u32, uptime_s: u64 },
    Heartbeat { epoch: u32, uptime_s: u64 },
    Button { kind: EdgeKind, button: String },
    Ack(String),
    Error(String),
    Hello(String),
    Other(String),
}

impl InboundLine {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let upper = line.to_ascii_uppercase();

        if let Some(rest) = upper.strip_prefix("BOOT:") {
            if let Some((epoch, uptime_s)) = parse_epoch(rest) {
                return InboundLine::Boot { epoch, uptime_s };
            }
        } else if let Some(rest) = upper.strip_prefix("HB:") {
            if let Some((epoch, uptime_s)) = parse_epoch(rest) {
                return InboundLine::Heartbeat { epoch, uptime_s };
            }
        } else if let Some(rest) = upper.strip_prefix("BTN:") {
            let mut parts = rest.splitn(2, ':');
            let kind = match parts.next() {
                Some("PRESS") => Some(EdgeKind::Press),
                Some("RELEASE") => Some(EdgeKind::Release),
                _ => None,
            };
            if let (Some(kind), Some(button)) = (kind, parts.next()) {
                let button = button.trim();
                if !button.is_empty() {
                    return InboundLine::Button {
                        kind,
                        button: button.to_string(),
                    };
                }
            }
        } else if upper.starts_with("ACK") {
            return InboundLine::Ack(line.to_string());
        } else if upper.starts_with("ERROR") {
            return InboundLine::Error(line.to_string());
        } else if upper.contains("HELLO") {
            return InboundLine::Hello(line.to_string());
        }
        InboundLine::Other(line.to_string())
    }

    /// ACK/ERROR lines answer the command in flight
    pub fn is_reply(&self) -> bool {
        matches!(self, InboundLine::Ack(_) | InboundLine::Error(_))
    }
}

/// `<id>[:<uptime>]`
fn parse_epoch(rest: &str) -> Option<(u32, u64)> {
    let mut parts = rest.split(':');
    let epoch = parts.next()?.trim().parse().ok()?;
    let uptime_s = parts
        .next()
        .and_then(|u| u.trim().parse::<f64>().ok())
        .map(|u| u.max(0.0) as u64)
        .unwrap_or(0);
    Some((epoch, uptime_s))
}

/// Whether a HELLO greeting identifies our firmware
pub fn is_device_greeting(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    upper.contains("HELLO") && (upper.contains("NEOPIXEL") || upper.contains("OLED"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        assert_eq!(
            DeviceCommand::Init { pixels: 4, brightness: 76 }.to_line(),
            "INIT:4:76"
        );
        assert_eq!(
            DeviceCommand::Pixel { index: 2, rgb: [10, 0, 255] }.to_line(),
            "PIXEL:2:10:0:255"
        );
        assert_eq!(DeviceCommand::AllOn { rgb: [1, 2, 3] }.to_line(), "ALL:ON:1:2:3");
        assert_eq!(
            DeviceCommand::Screen("CALIB".into()).to_line(),
            "OLED:UI:SCREEN:CALIB"
        );
        assert_eq!(DeviceCommand::AckBoot(7).to_line(), "ACK:BOOT:7");
    }

    #[test]
    fn test_display_variables_are_encoded() {
        assert_eq!(
            DeviceCommand::set_str("msg", "line1\nline2").to_line(),
            "OLED:UI:SET:STR:msg:line1\\nline2"
        );
        assert_eq!(DeviceCommand::set_u8("pct", 300).to_line(), "OLED:UI:SET:U8:pct:255");
        assert_eq!(DeviceCommand::set_u8("pct", -4).to_line(), "OLED:UI:SET:U8:pct:0");
        assert_eq!(DeviceCommand::set_bool("ok", true).to_line(), "OLED:UI:SET:BOOL:ok:1");
    }

    #[test]
    fn test_only_led_commands_expect_replies() {
        assert!(DeviceCommand::AllOff.expects_reply());
        assert!(DeviceCommand::Brightness(10).expects_reply());
        assert!(!DeviceCommand::OledInit.expects_reply());
        assert!(!DeviceCommand::AckBoot(1).expects_reply());
        assert!(!DeviceCommand::set_bool("x", false).expects_reply());
    }

    #[test]
    fn test_parse_inbound_lines() {
        assert_eq!(
            InboundLine::parse("BOOT:7:12"),
            InboundLine::Boot { epoch: 7, uptime_s: 12 }
        );
        assert_eq!(
            InboundLine::parse("HB:8:3.5\r"),
            InboundLine::Heartbeat { epoch: 8, uptime_s: 3 }
        );
        assert_eq!(
            InboundLine::parse("BTN:PRESS:btn_up"),
            InboundLine::Button { kind: EdgeKind::Press, button: "BTN_UP".into() }
        );
        assert!(InboundLine::parse("ACK").is_reply());
        assert!(InboundLine::parse("ERROR:BAD_INDEX").is_reply());
        assert!(matches!(InboundLine::parse("HELLO NEOPIXEL OLED"), InboundLine::Hello(_)));
        assert!(matches!(InboundLine::parse("BOOT:abc"), InboundLine::Other(_)));
        assert!(matches!(InboundLine::parse("BTN:HOLD:A"), InboundLine::Other(_)));
    }

    #[test]
    fn test_device_greeting() {
        assert!(is_device_greeting("HELLO NEOPIXEL OLED"));
        assert!(is_device_greeting("hello oled"));
        assert!(!is_device_greeting("HELLO WORLD"));
    }
}
