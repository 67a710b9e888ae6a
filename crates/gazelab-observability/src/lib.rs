// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # gazelab-observability
//!
//! Logging initialization for the gazelab station with per-crate debug flag
//! support.
//!
//! Every crate logs through `tracing` with a bracketed subsystem prefix
//! (`[TRACKER]`, `[COPROC]`, `[CALIB]`, `[SESSION]`); this crate decides where
//! those events go.
//!
//! ## Features
//! - `file-logging`: per-run JSON log files with retention cleanup

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

pub use cli::*;
pub use config::*;
pub use init::*;

/// Known gazelab crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "gazelab",
    "gazelab-config",
    "gazelab-tracker",
    "gazelab-coprocessor",
    "gazelab-calibration",
    "gazelab-session",
];
