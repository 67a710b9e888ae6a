// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # gazelab-coprocessor
//!
//! Host side of the serial protocol spoken by the LED/display co-processor
//! (an RP2040 driving a NeoPixel strip, an OLED and a few buttons).
//!
//! - [`CoprocessorLink`] opens the port (configured or discovered), runs a
//!   reader thread and exposes idempotent LED/display setters backed by an
//!   [`OutputCache`].
//! - Button edges and device reboots arrive as [`InputEvent`]s on a
//!   crossbeam channel supplied by the caller.
//! - [`LoopbackSerial`]/[`LoopbackDevice`] stand in for the hardware.

pub mod cache;
pub mod discovery;
pub mod error;
pub mod events;
pub mod link;
pub mod protocol;
pub mod transport;

pub use cache::{LedPlan, LedState, OutputCache};
pub use discovery::{available_ports, discover, DiscoveryReport, ProbeMatch, ProbeTimings};
pub use error::{CoprocessorError, Result};
pub use events::{ButtonEdge, EdgeKind, InputEvent, InputSource};
pub use link::{CommandOutcome, CoprocessorLink, CoprocessorStats};
pub use protocol::{DeviceCommand, InboundLine, VarClass};
pub use transport::{LineAssembler, LoopbackDevice, LoopbackSerial, SerialPortTransport, SerialTransport};
