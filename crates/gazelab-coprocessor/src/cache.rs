// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Last-known device output state.
//!
//! The link plans writes against this cache and commits the new state only
//! after the write went out, so identical requests produce no serial
//! traffic. After a device reboot the cache is invalidated; the previous
//! values move to a stale set that [`OutputCache::take_stale`] hands back
//! for re-assertion.

use std::collections::BTreeMap;

use crate::protocol::{DeviceCommand, VarClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    /// Nothing known about the strip (startup or after a reboot)
    Unknown,
    Off,
    Single { index: u8, rgb: [u8; 3] },
    All { rgb: [u8; 3] },
}

/// Commands to send and the state to commit once they are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedPlan {
    pub commands: Vec<DeviceCommand>,
    pub next: LedState,
}

impl LedPlan {
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }
}

type VarKey = (VarClass, String);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleDisplay {
    pub screen: Option<String>,
    pub vars: Vec<(VarClass, String, String)>,
}

#[derive(Debug, Clone)]
pub struct OutputCache {
    led: LedState,
    brightness: f64,
    screen: Option<String>,
    vars: BTreeMap<VarKey, String>,
    stale: StaleDisplay,
}

impl OutputCache {
    pub fn new(brightness: f64) -> Self {
        Self {
            led: LedState::Unknown,
            brightness: brightness.clamp(0.0, 1.0),
            screen: None,
            vars: BTreeMap::new(),
            stale: StaleDisplay::default(),
        }
    }

    pub fn led(&self) -> LedState {
        self.led
    }

    pub fn brightness(&self) -> f64 {
        self.brightness
    }

    pub fn set_brightness(&mut self, brightness: f64) {
        self.brightness = brightness.clamp(0.0, 1.0);
    }

    pub fn screen(&self) -> Option<&str> {
        self.screen.as_deref()
    }

    /// Host-side brightness scaling applied to every color. Fractions truncate.
    pub fn scale(&self, rgb: [u8; 3]) -> [u8; 3] {
        rgb.map(|c| (c as f64 * self.brightness) as u8)
    }

    pub fn plan_all_off(&self) -> LedPlan {
        let commands = if self.led == LedState::Off {
            Vec::new()
        } else {
            vec![DeviceCommand::AllOff]
        };
        LedPlan {
            commands,
            next: LedState::Off,
        }
    }

    /// Light exactly one pixel. An all-zero color means "off"; the strip is
    /// only blanked first when the lit pixel or mode changes.
    pub fn plan_single(&self, index: u8, rgb: [u8; 3]) -> LedPlan {
        let rgb = self.scale(rgb);
        if rgb == [0, 0, 0] {
            return self.plan_all_off();
        }
        let next = LedState::Single { index, rgb };
        if self.led == next {
            return LedPlan {
                commands: Vec::new(),
                next,
            };
        }
        let mut commands = Vec::with_capacity(2);
        let same_pixel = matches!(self.led, LedState::Single { index: lit, .. } if lit == index);
        if !same_pixel {
            commands.push(DeviceCommand::AllOff);
        }
        commands.push(DeviceCommand::Pixel { index, rgb });
        LedPlan { commands, next }
    }

    pub fn plan_all_on(&self, rgb: [u8; 3]) -> LedPlan {
        let rgb = self.scale(rgb);
        if rgb == [0, 0, 0] {
            return self.plan_all_off();
        }
        let next = LedState::All { rgb };
        let commands = if self.led == next {
            Vec::new()
        } else {
            vec![DeviceCommand::AllOn { rgb }]
        };
        LedPlan { commands, next }
    }

    pub fn commit_led(&mut self, next: LedState) {
        self.led = next;
    }

    /// `None` when the screen is already showing
    pub fn plan_screen(&self, name: &str) -> Option<DeviceCommand> {
        if self.screen.as_deref() == Some(name) {
            None
        } else {
            Some(DeviceCommand::Screen(name.to_string()))
        }
    }

    pub fn commit_screen(&mut self, name: &str) {
        self.screen = Some(name.to_string());
    }

    /// `None` when the variable already holds this encoded value
    pub fn plan_var(&self, command: &DeviceCommand) -> Option<DeviceCommand> {
        match command {
            DeviceCommand::SetVar { class, name, value } => {
                let key = (*class, name.clone());
                if self.vars.get(&key) == Some(value) {
                    None
                } else {
                    Some(command.clone())
                }
            }
            _ => Some(command.clone()),
        }
    }

    pub fn commit_var(&mut self, command: &DeviceCommand) {
        if let DeviceCommand::SetVar { class, name, value } = command {
            self.vars.insert((*class, name.clone()), value.clone());
        }
    }

    /// Forget what the device shows; keep the values for re-assertion
    pub fn invalidate(&mut self) {
        self.led = LedState::Unknown;
        if let Some(screen) = self.screen.take() {
            self.stale.screen = Some(screen);
        }
        for ((class, name), value) in std::mem::take(&mut self.vars) {
            self.stale.vars.retain(|(c, n, _)| !(*c == class && *n == name));
            self.stale.vars.push((class, name, value));
        }
    }

    pub fn take_stale(&mut self) -> StaleDisplay {
        std::mem::take(&mut self.stale)
    }
}
