// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # gazelab
//!
//! Gaze-tracking measurement station. A participant sits in front of a
//! remote eye tracker while an operator drives the session from a small
//! co-processor board (buttons, an OLED display and four corner LEDs).
//!
//! ## Crates
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | [`config`] | `gazelab.toml` loading, overrides and validation |
//! | [`observability`] | Logging initialization and per-crate debug flags |
//! | [`tracker`] | TCP tag protocol link to the eye tracker (plus a simulator) |
//! | [`coprocessor`] | Line-oriented serial link to the RP2040 board |
//! | [`calibration`] | Calibration attempts with LEDs synced to the tracker |
//! | [`session`] | Operator FLOW state machine and its cooperative runner |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crossbeam::channel::unbounded;
//! use gazelab::prelude::*;
//!
//! let config = GazelabConfig::default();
//! let tracker = Arc::new(TrackerLink::new(&config.tracker));
//! tracker.start().expect("tracker worker");
//!
//! let (tx, rx) = unbounded();
//! let link = CoprocessorLink::open(&config.coprocessor, tx).ok().map(Arc::new);
//! let devices = SessionDevices::new(&config, tracker, link, rx);
//! SessionRunner::new(&config, devices).run();
//! ```

pub use gazelab_calibration as calibration;
pub use gazelab_config as config;
pub use gazelab_coprocessor as coprocessor;
pub use gazelab_observability as observability;
pub use gazelab_session as session;
pub use gazelab_tracker as tracker;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commonly used types
pub mod prelude {
    pub use gazelab_calibration::{CalibrationOrchestrator, Quality, QualityOverride};
    pub use gazelab_config::{load_config, validate_config, GazelabConfig};
    pub use gazelab_coprocessor::{ButtonEdge, CoprocessorLink, InputEvent, InputSource};
    pub use gazelab_session::{FlowState, SessionDevices, SessionMachine, SessionRunner};
    pub use gazelab_tracker::{GazeSample, TrackerLink};
}
