// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the tracker link

/// Result type alias using TrackerError
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Error types for the tracker link
///
/// Link-internal failures never leave the worker thread; these surface only
/// from setup calls and from the message parser.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// No socket is currently held by the worker
    #[error("Tracker not connected")]
    NotConnected,

    /// TCP connect failed or timed out
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },

    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be classified or was missing required attributes
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Link already started
    #[error("Tracker link already running")]
    AlreadyRunning,

    /// Worker thread could not be spawned or joined
    #[error("Thread error: {0}")]
    ThreadError(String),
}

impl TrackerError {
    /// Check if error is retryable (for reconnection logic)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::NotConnected
                | TrackerError::ConnectionFailed { .. }
                | TrackerError::Io(_)
        )
    }
}
