// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the co-processor link

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoprocessorError>;

#[derive(Error, Debug)]
pub enum CoprocessorError {
    /// Auto-discovery probed every candidate and none answered
    #[error("No co-processor found (tried: {})", list_or_none(.tried))]
    NoDeviceFound { tried: Vec<String> },

    /// The configured port is not among the available ports
    #[error("Serial port '{port}' not found (available: {})", list_or_none(.available))]
    PortNotFound { port: String, available: Vec<String> },

    #[error("Failed to open {port}: {reason}{}", open_hint(.reason, .candidates))]
    OpenFailed {
        port: String,
        reason: String,
        candidates: Vec<String>,
    },

    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Co-processor link not started")]
    NotStarted,

    #[error("Thread error: {0}")]
    ThreadError(String),
}

impl CoprocessorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoprocessorError::Io(_) | CoprocessorError::Serial(_) | CoprocessorError::NoDeviceFound { .. }
        )
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn open_hint(reason: &str, candidates: &[String]) -> String {
    let lower = reason.to_ascii_lowercase();
    let mut hint = String::new();
    if lower.contains("permission") || lower.contains("access is denied") {
        hint.push_str(" (check that your user is in the dialout/uucp group)");
    } else if lower.contains("busy") || lower.contains("in use") {
        hint.push_str(" (port is held by another process, close any serial monitor)");
    }
    if !candidates.is_empty() {
        hint.push_str(&format!("; available ports: {}", candidates.join(", ")));
    }
    hint
}
