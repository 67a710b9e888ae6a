// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # gazelab-tracker
//!
//! Client for the gaze tracker's tag/attribute protocol.
//!
//! - [`TrackerLink`] keeps a reconnecting connection alive on a background
//!   worker, streams parsed [`GazeSample`]s into a bounded drop-oldest queue
//!   and correlates commands with their acknowledgements.
//! - Calibration progress ([`CalibrationPointProgress`]) and results
//!   ([`CalibrationResult`]) are read back through copy-out snapshots.
//! - With `tracker.simulate = true` the socket is replaced by
//!   [`SimulatedTracker`], which speaks the same wire protocol.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gazelab_config::TrackerConfig;
//! use gazelab_tracker::TrackerLink;
//!
//! let link = TrackerLink::new(&TrackerConfig::default());
//! link.start().unwrap();
//! for sample in link.drain_samples(100) {
//!     println!("{:.3} {:.3} valid={}", sample.gx, sample.gy, sample.valid);
//! }
//! link.stop();
//! ```

pub mod ack;
pub mod calibration;
pub mod error;
pub mod link;
pub mod protocol;
pub mod queue;
pub mod sample;
pub mod sim;

pub use ack::{AckWaiter, PendingAcks};
pub use calibration::{
    CalibrationPoint, CalibrationPointProgress, CalibrationResult, ResultSource, MIN_VALID_POINTS,
};
pub use error::{Result, TrackerError};
pub use link::{TrackerLink, TrackerStats};
pub use protocol::{parse_attributes, AttrValue, Attributes, MessageKind, TrackerCommand, TrackerMessage};
pub use queue::SampleQueue;
pub use sample::{GazeSample, PogSource, POG_PREFERENCE};
pub use sim::SimulatedTracker;
