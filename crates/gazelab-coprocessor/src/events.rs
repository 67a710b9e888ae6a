// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Input events delivered to the session loop

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Press,
    Release,
}

/// Where a button edge came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSource {
    Coprocessor,
    /// Keyboard/stdin fallback on the host
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonEdge {
    pub kind: EdgeKind,
    /// Upper-cased button name, e.g. `BTN_UP`
    pub button: String,
    pub source: InputSource,
}

impl ButtonEdge {
    pub fn press(button: &str, source: InputSource) -> Self {
        Self {
            kind: EdgeKind::Press,
            button: button.trim().to_ascii_uppercase(),
            source,
        }
    }

    pub fn release(button: &str, source: InputSource) -> Self {
        Self {
            kind: EdgeKind::Release,
            button: button.trim().to_ascii_uppercase(),
            source,
        }
    }

    pub fn is_press(&self) -> bool {
        self.kind == EdgeKind::Press
    }
}

impl fmt::Display for ButtonEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EdgeKind::Press => "PRESS",
            EdgeKind::Release => "RELEASE",
        };
        write!(f, "{}:{}", kind, self.button)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Button(ButtonEdge),
    /// Device boot epoch changed (first sighting included)
    Boot { epoch: u32, uptime_s: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_names_are_normalized() {
        let edge = ButtonEdge::press(" btn_up ", InputSource::Local);
        assert_eq!(edge.button, "BTN_UP");
        assert!(edge.is_press());
        assert_eq!(edge.to_string(), "PRESS:BTN_UP");
    }
}
