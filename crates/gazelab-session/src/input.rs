// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Operator buttons and the local keyboard stand-in for them

use crossbeam::channel::Sender;
use std::io::BufRead;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use gazelab_coprocessor::{ButtonEdge, InputEvent, InputSource};

use crate::error::{Result, SessionError};

pub const BTN_UP: &str = "BTN_UP";
pub const BTN_DOWN: &str = "BTN_DOWN";
pub const BTN_LEFT: &str = "BTN_LEFT";
pub const BTN_RIGHT: &str = "BTN_RIGHT";
/// Reset to BOOT from anywhere
pub const BTN_CENTER: &str = "BTN_CENTER";
/// Event marker toggle
pub const BTN_A: &str = "BTN_A";
/// Hold for the monitoring view
pub const BTN_B: &str = "BTN_B";

/// Map one operator line to button edges. Single keys produce a press
/// followed by a release, except `b`/`B` which hold and let go of BTN_B.
pub fn parse_local_key(line: &str) -> Vec<ButtonEdge> {
    let key = line.trim();
    let tap = |name: &str| {
        vec![
            ButtonEdge::press(name, InputSource::Local),
            ButtonEdge::release(name, InputSource::Local),
        ]
    };
    match key {
        "r" => tap(BTN_RIGHT),
        "l" => tap(BTN_LEFT),
        "u" => tap(BTN_UP),
        "d" => tap(BTN_DOWN),
        "s" => tap(BTN_CENTER),
        "a" => tap(BTN_A),
        "b" => vec![ButtonEdge::press(BTN_B, InputSource::Local)],
        "B" => vec![ButtonEdge::release(BTN_B, InputSource::Local)],
        _ => Vec::new(),
    }
}

/// Feed operator lines from `reader` into the shared event queue until the
/// reader ends or the queue is closed
pub fn spawn_line_input<R>(reader: R, events: Sender<InputEvent>) -> Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("gazelab-local-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("[SESSION] Local input read failed: {}", e);
                        break;
                    }
                };
                let edges = parse_local_key(&line);
                if edges.is_empty() && !line.trim().is_empty() {
                    debug!("[SESSION] Ignoring key {:?}", line.trim());
                }
                for edge in edges {
                    if events.send(InputEvent::Button(edge)).is_err() {
                        return;
                    }
                }
            }
            debug!("[SESSION] Local input closed");
        })
        .map_err(|e| SessionError::ThreadError(e.to_string()))
}
