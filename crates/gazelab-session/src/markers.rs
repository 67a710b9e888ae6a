// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event markers placed during a recording

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;

/// One timestamped label, relative to the recording start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEvent {
    pub elapsed_ms: u64,
    /// `HH:MM:SS.mmm` since the recording start
    pub elapsed: String,
    /// Local wall clock, `HH:MM:SS.mmm`
    pub wall_time: String,
    pub label: String,
}

impl SessionEvent {
    pub fn new(label: impl Into<String>, elapsed: Duration, wall: &DateTime<Local>) -> Self {
        let elapsed_ms = elapsed.as_millis() as u64;
        Self {
            elapsed_ms,
            elapsed: format_elapsed(elapsed_ms),
            wall_time: wall.format("%H:%M:%S%.3f").to_string(),
            label: label.into(),
        }
    }
}

/// Open/closed marker toggle. Each closed pair is one interval, numbered
/// from 1.
#[derive(Debug, Clone)]
pub struct MarkerLog {
    index: u32,
    open_since: Option<Duration>,
    events: Vec<SessionEvent>,
}

impl MarkerLog {
    pub fn new() -> Self {
        Self {
            index: 1,
            open_since: None,
            events: Vec::new(),
        }
    }

    /// Number of the marker the next edge opens or closes
    pub fn current_index(&self) -> u32 {
        self.index
    }

    pub fn is_open(&self) -> bool {
        self.open_since.is_some()
    }

    /// Recording time at which the open marker started
    pub fn open_since(&self) -> Option<Duration> {
        self.open_since
    }

    /// Completed intervals
    pub fn interval_count(&self) -> usize {
        (self.index - 1) as usize
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    /// Flip the marker and append its label
    pub fn toggle(&mut self, elapsed: Duration, wall: &DateTime<Local>) -> &SessionEvent {
        let label = if self.open_since.take().is_some() {
            let label = format!("EVENT{}_STOP", self.index);
            self.index += 1;
            label
        } else {
            self.open_since = Some(elapsed);
            format!("EVENT{}_START", self.index)
        };
        self.events.push(SessionEvent::new(label, elapsed, wall));
        &self.events[self.events.len() - 1]
    }

    /// Close a still-open marker with a synthesized stop label
    pub fn close_open(&mut self, elapsed: Duration, wall: &DateTime<Local>) -> Option<&SessionEvent> {
        if self.is_open() {
            Some(self.toggle(elapsed, wall))
        } else {
            None
        }
    }

    pub fn into_events(self) -> Vec<SessionEvent> {
        self.events
    }
}

impl Default for MarkerLog {
    fn default() -> Self {
        Self::new()
    }
}

/// `HH:MM:SS.mmm`
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let hh = elapsed_ms / 3_600_000;
    let mm = (elapsed_ms / 60_000) % 60;
    let ss = (elapsed_ms / 1000) % 60;
    let ms = elapsed_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hh, mm, ss, ms)
}

/// `MM:SS` for on-screen timers; minutes keep counting past the hour
pub fn format_clock(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_numbers_intervals() {
        let wall = Local::now();
        let mut log = MarkerLog::new();
        assert_eq!(log.toggle(Duration::from_millis(1000), &wall).label, "EVENT1_START");
        assert!(log.is_open());
        assert_eq!(log.open_since(), Some(Duration::from_millis(1000)));
        assert_eq!(log.toggle(Duration::from_millis(2500), &wall).label, "EVENT1_STOP");
        assert_eq!(log.toggle(Duration::from_millis(3000), &wall).label, "EVENT2_START");
        assert_eq!(log.interval_count(), 1);
        assert_eq!(log.current_index(), 2);
    }

    #[test]
    fn test_close_open_only_when_open() {
        let wall = Local::now();
        let mut log = MarkerLog::new();
        assert!(log.close_open(Duration::ZERO, &wall).is_none());
        log.toggle(Duration::from_secs(1), &wall);
        let closed = log.close_open(Duration::from_secs(4), &wall).cloned();
        assert_eq!(closed.map(|e| e.label), Some("EVENT1_STOP".to_string()));
        assert_eq!(log.interval_count(), 1);
        assert!(!log.is_open());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_elapsed(3_723_045), "01:02:03.045");
        assert_eq!(format_clock(Duration::from_secs(754)), "12:34");
        let event = SessionEvent::new("X", Duration::from_millis(1500), &Local::now());
        assert_eq!(event.elapsed_ms, 1500);
        assert_eq!(event.elapsed, "00:00:01.500");
        assert_eq!(event.wall_time.len(), 12);
    }
}
