// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # gazelab-session
//!
//! The operator FLOW: `BOOT -> FIND_POSITION -> hint screens -> CALIBRATION
//! -> RECORD_CONFIRMATION -> RECORDING <-> STOP_RECORD -> INFERENCE_LOADING
//! -> RESULTS`, with a MONITORING modal held on BTN_B and a BTN_CENTER
//! reset that wins from anywhere.
//!
//! - [`SessionMachine`] is pure: inputs in, [`SessionAction`]s out.
//! - [`SessionRunner`] is the cooperative loop that feeds it from the links
//!   and carries out its actions.
//! - Renderers, the analysis engine and the recorder sit behind the traits
//!   in [`collaborators`].

pub mod collaborators;
pub mod display;
pub mod error;
pub mod flow;
pub mod inference;
pub mod input;
pub mod machine;
pub mod markers;
pub mod position;
pub mod recorder;
pub mod results;
pub mod runner;
pub mod snapshot;

pub use collaborators::{InferenceEngine, NullRecorder, Renderer, SessionRecorder};
pub use display::{DisplaySink, LogRenderer, OledRenderer};
pub use error::{Result, SessionError};
pub use flow::FlowState;
pub use inference::MockInference;
pub use input::{parse_local_key, spawn_line_input};
pub use machine::{RecordingData, SessionAction, SessionMachine};
pub use markers::{MarkerLog, SessionEvent};
pub use position::{EyeMonitor, EyeView, PositionStatus};
pub use recorder::JsonLinesRecorder;
pub use results::{build_pages, ResultsPage, ResultsView};
pub use runner::{GazeSource, SessionDevices, SessionRunner};
pub use snapshot::{DeviceStatus, SessionSnapshot, StepContext};
