// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Tag/attribute wire format
//!
//! Every message is one `<TAG ID="..." KEY="value" ... />` line terminated by
//! `\r\n`. Attribute values may be quoted or bare; numeric-looking values are
//! coerced (a `.` selects float, otherwise integer, otherwise text).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, TrackerError};

/// Line delimiter used by the tracker in both directions
pub const DELIMITER: &[u8] = b"\r\n";

/// Upper bound on buffered bytes without a delimiter before the buffer is dropped
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z0-9_]+)\s*=\s*(?:"([^"]*)"|([^\s"/>]+))"#)
        .unwrap_or_else(|e| panic!("attribute pattern must compile: {}", e))
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*<\s*([A-Za-z]+)")
        .unwrap_or_else(|e| panic!("tag pattern must compile: {}", e))
});

/// A coerced attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    /// Coerce a raw attribute string
    pub fn coerce(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains('.') {
            if let Ok(v) = raw.parse::<f64>() {
                return AttrValue::Float(v);
            }
        } else if let Ok(v) = raw.parse::<i64>() {
            return AttrValue::Int(v);
        }
        AttrValue::Text(raw.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Validity flags are numeric; anything above 0.5 counts as set
    pub fn is_flag_set(&self) -> bool {
        self.as_f64().map(|v| v > 0.5).unwrap_or(false)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Typed key -> value map for one message. Keys are upper-cased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: HashMap<String, AttrValue>,
    raw: HashMap<String, String>,
}

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.values.get(key)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(AttrValue::as_f64)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(AttrValue::as_i64)
    }

    /// Raw text of an attribute, numeric or not
    pub fn text(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }

    /// `Some(true/false)` when the flag attribute exists, `None` otherwise
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(AttrValue::is_flag_set)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Raw text map, empty values dropped
    pub fn raw_map(&self) -> HashMap<String, String> {
        self.raw
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Extract every attribute from a message, accepting quoted and bare values
pub fn parse_attributes(line: &str) -> Attributes {
    let mut attrs = Attributes::default();
    for caps in ATTRIBUTE_RE.captures_iter(line) {
        let key = caps[1].to_ascii_uppercase();
        let raw = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim())
            .unwrap_or("");
        attrs.values.insert(key.clone(), AttrValue::coerce(raw));
        attrs.raw.insert(key, raw.to_string());
    }
    attrs
}

/// Message category by tag name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `<REC .../>` streamed data record
    Record,
    /// `<ACK ID=".." .../>` command acknowledgement
    Ack,
    /// `<CAL ID=".." .../>` calibration progress or final result
    Calibration,
    /// Any other well-formed tag (NACK, unsolicited GET replies)
    Other,
}

/// One classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerMessage {
    pub kind: MessageKind,
    pub tag: String,
    pub id: Option<String>,
    pub attrs: Attributes,
}

impl TrackerMessage {
    /// Classify one delimiter-stripped line
    pub fn parse(line: &str) -> Result<Self> {
        let tag = TAG_RE
            .captures(line)
            .map(|c| c[1].to_ascii_uppercase())
            .ok_or_else(|| TrackerError::Malformed(truncate(line)))?;

        let kind = match tag.as_str() {
            "REC" => MessageKind::Record,
            "ACK" => MessageKind::Ack,
            "CAL" => MessageKind::Calibration,
            _ => MessageKind::Other,
        };

        let attrs = parse_attributes(line);
        let id = attrs.text("ID").map(|s| s.to_string());

        if matches!(kind, MessageKind::Ack | MessageKind::Calibration) && id.is_none() {
            return Err(TrackerError::Malformed(truncate(line)));
        }

        Ok(TrackerMessage {
            kind,
            tag,
            id,
            attrs,
        })
    }
}

fn truncate(line: &str) -> String {
    line.chars().take(120).collect()
}

/// Accumulates raw socket bytes and yields complete lines
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    overflowed: u64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every complete, non-empty line they finish
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = find_delimiter(&self.buf) {
            let line: Vec<u8> = self.buf.drain(..pos + DELIMITER.len()).collect();
            let body = &line[..pos];
            if body.is_empty() {
                continue;
            }
            lines.push(String::from_utf8_lossy(body).into_owned());
        }

        if self.buf.len() > MAX_PENDING_BYTES {
            self.buf.clear();
            self.overflowed += 1;
        }
        lines
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Number of times an undelimited buffer was discarded
    pub fn overflow_count(&self) -> u64 {
        self.overflowed
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len()).position(|w| w == DELIMITER)
}

/// Identifier of the summary request's acknowledgement
pub const RESULT_SUMMARY_ID: &str = "CALIBRATE_RESULT_SUMMARY";
/// Final calibration result message id
pub const CALIB_RESULT_ID: &str = "CALIB_RESULT";
/// Point start announcement id
pub const CALIB_START_PT_ID: &str = "CALIB_START_PT";
/// Point sampled announcement id
pub const CALIB_RESULT_PT_ID: &str = "CALIB_RESULT_PT";

/// Outbound command with the acknowledgement id to wait for, if any
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerCommand {
    pub text: String,
    pub ack_id: Option<String>,
}

impl TrackerCommand {
    fn acked(text: String, ack_id: &str) -> Self {
        Self {
            text,
            ack_id: Some(ack_id.to_string()),
        }
    }

    fn unacked(text: String) -> Self {
        Self { text, ack_id: None }
    }

    /// `<SET ID="field" STATE="1|0" />`, acknowledged under the field id
    pub fn set_state(id: &str, enabled: bool) -> Self {
        Self::acked(
            format!(r#"<SET ID="{}" STATE="{}" />"#, id, if enabled { 1 } else { 0 }),
            id,
        )
    }

    pub fn enable_send_data() -> Self {
        Self::set_state("ENABLE_SEND_DATA", true)
    }

    pub fn calibrate_show(show: bool) -> Self {
        Self::set_state("CALIBRATE_SHOW", show)
    }

    pub fn calibrate_clear() -> Self {
        Self::acked(r#"<SET ID="CALIBRATE_CLEAR" />"#.to_string(), "CALIBRATE_CLEAR")
    }

    pub fn calibrate_reset() -> Self {
        Self::acked(r#"<SET ID="CALIBRATE_RESET" />"#.to_string(), "CALIBRATE_RESET")
    }

    /// Normalized point, five decimal places
    pub fn calibrate_add_point(x: f64, y: f64) -> Self {
        Self::acked(
            format!(r#"<SET ID="CALIBRATE_ADDPOINT" X="{:.5}" Y="{:.5}" />"#, x, y),
            "CALIBRATE_ADDPOINT",
        )
    }

    /// Per-point sampling duration; the device takes seconds
    pub fn calibrate_timeout(seconds: f64) -> Self {
        Self::unacked(format!(
            r#"<SET ID="CALIBRATE_TIMEOUT" VALUE="{}" />"#,
            format_seconds(seconds)
        ))
    }

    /// Pre-point animation delay; the device takes seconds
    pub fn calibrate_delay(seconds: f64) -> Self {
        Self::unacked(format!(
            r#"<SET ID="CALIBRATE_DELAY" VALUE="{}" />"#,
            format_seconds(seconds)
        ))
    }

    pub fn calibrate_start(start: bool) -> Self {
        Self::set_state("CALIBRATE_START", start)
    }

    pub fn result_summary() -> Self {
        Self::acked(
            format!(r#"<GET ID="{}" />"#, RESULT_SUMMARY_ID),
            RESULT_SUMMARY_ID,
        )
    }

    /// Wire bytes including the delimiter
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = self.text.as_bytes().to_vec();
        bytes.extend_from_slice(DELIMITER);
        bytes
    }
}

/// Seconds always carry a decimal point so the device parses them as float
fn format_seconds(seconds: f64) -> String {
    let s = format!("{}", seconds.max(0.0));
    if s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_and_bare_attributes() {
        let attrs = parse_attributes(r#"<REC BPOGX="0.25" bpogy=0.75 BPOGV="1" CNT=42 />"#);
        assert_eq!(attrs.f64("BPOGX"), Some(0.25));
        assert_eq!(attrs.f64("BPOGY"), Some(0.75));
        assert_eq!(attrs.get("BPOGV"), Some(&AttrValue::Int(1)));
        assert_eq!(attrs.i64("CNT"), Some(42));
    }

    #[test]
    fn test_value_coercion() {
        assert_eq!(AttrValue::coerce("12"), AttrValue::Int(12));
        assert_eq!(AttrValue::coerce("-0.5"), AttrValue::Float(-0.5));
        assert_eq!(AttrValue::coerce("1.2.3"), AttrValue::Text("1.2.3".into()));
        assert_eq!(AttrValue::coerce("CALIB_RESULT"), AttrValue::Text("CALIB_RESULT".into()));
        assert!(!AttrValue::coerce("").is_flag_set());
    }

    #[test]
    fn test_message_classification() {
        let ack = TrackerMessage::parse(r#"<ACK ID="CALIBRATE_SHOW" STATE="0" />"#).unwrap();
        assert_eq!(ack.kind, MessageKind::Ack);
        assert_eq!(ack.id.as_deref(), Some("CALIBRATE_SHOW"));

        let cal = TrackerMessage::parse(r#"<CAL ID="CALIB_START_PT" PT="2" CALX="0.1" CALY="0.9" />"#)
            .unwrap();
        assert_eq!(cal.kind, MessageKind::Calibration);

        let rec = TrackerMessage::parse(r#"<REC CNT="1" />"#).unwrap();
        assert_eq!(rec.kind, MessageKind::Record);

        assert!(TrackerMessage::parse("garbage without a tag").is_err());
        assert!(TrackerMessage::parse(r#"<ACK STATE="1" />"#).is_err());
    }

    #[test]
    fn test_frame_buffer_splits_across_chunks() {
        let mut frames = FrameBuffer::new();
        assert!(frames.push(b"<REC CNT=\"1\" />\r").is_empty());
        let lines = frames.push(b"\n\r\n<ACK ID=\"X\" />\r\n<REC");
        assert_eq!(lines, vec!["<REC CNT=\"1\" />", "<ACK ID=\"X\" />"]);
        assert_eq!(frames.pending_len(), 4);
    }

    #[test]
    fn test_frame_buffer_discards_runaway_input() {
        let mut frames = FrameBuffer::new();
        frames.push(&vec![b'x'; MAX_PENDING_BYTES + 1]);
        assert_eq!(frames.pending_len(), 0);
        assert_eq!(frames.overflow_count(), 1);
    }

    #[test]
    fn test_command_text() {
        assert_eq!(
            TrackerCommand::calibrate_add_point(1.0, 0.0).text,
            r#"<SET ID="CALIBRATE_ADDPOINT" X="1.00000" Y="0.00000" />"#
        );
        assert_eq!(
            TrackerCommand::calibrate_delay(4.5).text,
            r#"<SET ID="CALIBRATE_DELAY" VALUE="4.5" />"#
        );
        assert_eq!(
            TrackerCommand::calibrate_timeout(1.0).text,
            r#"<SET ID="CALIBRATE_TIMEOUT" VALUE="1.0" />"#
        );
        assert!(TrackerCommand::calibrate_timeout(1.0).ack_id.is_none());
        assert_eq!(
            TrackerCommand::calibrate_start(false).ack_id.as_deref(),
            Some("CALIBRATE_START")
        );
        assert!(TrackerCommand::result_summary().to_wire().ends_with(b"\r\n"));
    }
}
