// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for calibration attempts

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CalibrationError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("Calibration attempt already in progress")]
    AlreadyRunning,

    /// The tracker must be connected before an attempt can start
    #[error("Tracker not connected")]
    NotConnected,

    #[error("Thread error: {0}")]
    ThreadError(String),
}

impl CalibrationError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, CalibrationError::NotConnected)
    }
}
