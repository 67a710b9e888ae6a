// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the session layer

use thiserror::Error;

use gazelab_coprocessor::CoprocessorError;
use gazelab_tracker::TrackerError;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Co-processor error: {0}")]
    Coprocessor(#[from] CoprocessorError),

    /// Recording output could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

impl SessionError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Tracker(e) => e.is_retryable(),
            SessionError::Coprocessor(e) => e.is_retryable(),
            SessionError::Io(_) => true,
            _ => false,
        }
    }
}
