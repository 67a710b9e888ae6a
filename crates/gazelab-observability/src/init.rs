// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for gazelab
//!
//! Console output is always on. With the `file-logging` feature, each run also
//! gets its own timestamped folder holding a combined JSON log, and old run
//! folders are pruned by age and count.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::ObservabilityConfig;

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Logging initialization result
///
/// Must be held for the life of the process; dropping it flushes and closes
/// any file writers.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder for this process, if file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Initialize logging
///
/// Creates, when file logging is enabled:
/// ```text
/// ./logs/
///   └── run_20250101_120000/
///       ├── gazelab-tracker.log
///       ├── gazelab-coprocessor.log
///       ├── ...
///       └── gazelab-combined.log (all crates)
/// ```
pub fn init_logging(
    debug_flags: &CrateDebugFlags,
    config: &ObservabilityConfig,
) -> Result<LoggingGuard> {
    let filter = debug_flags.to_filter_string(&config.level);
    let env_filter = EnvFilter::try_new(&filter)
        .with_context(|| format!("Invalid log filter: {}", filter))?;

    let mut layers = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(env_filter)
        .boxed();
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let (file_guards, log_dir) = if config.file_logging {
        let run_folder = create_run_folder(&config.log_dir)?;
        cleanup_old_logs(&config.log_dir, config.retention_days, config.retention_runs)?;

        let mut guards = Vec::new();

        // One file per crate, then the combined file
        let mut targets: Vec<(String, String)> = crate::KNOWN_CRATES
            .iter()
            .map(|name| {
                let directive = format!("{}=debug,off", name.replace('-', "_"));
                (format!("{}.log", name), directive)
            })
            .collect();
        targets.push(("gazelab-combined.log".to_string(), filter.clone()));

        for (file_name, directive) in targets {
            let appender = tracing_appender::rolling::never(&run_folder, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let file_filter = EnvFilter::try_new(&directive)
                .with_context(|| format!("Invalid log filter: {}", directive))?;
            let file_layer = match config.file_format {
                crate::LogFormat::Json => tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json()
                    .with_filter(file_filter)
                    .boxed(),
                crate::LogFormat::Text => tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(file_filter)
                    .boxed(),
            };
            layers.push(file_layer);
        }
        (guards, Some(run_folder))
    } else {
        (Vec::new(), None)
    };

    #[cfg(not(feature = "file-logging"))]
    let log_dir = {
        if config.file_logging {
            eprintln!("Warning: file logging requested but the file-logging feature is not compiled in");
        }
        None
    };

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir,
    })
}

/// Initialize console logging with default settings
pub fn init_logging_default(debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    init_logging(debug_flags, &ObservabilityConfig::default())
}

/// Create `run_<timestamp>` under `base_log_dir`
pub fn create_run_folder(base_log_dir: &Path) -> Result<PathBuf> {
    let timestamp = Utc::now().format(RUN_TIMESTAMP_FORMAT);
    let run_folder = base_log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
    Ok(run_folder)
}

fn parse_run_timestamp(dir_name: &str) -> Option<DateTime<Utc>> {
    let stamp = dir_name.strip_prefix(RUN_PREFIX)?;
    let naive = NaiveDateTime::parse_from_str(stamp, RUN_TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Remove run folders older than `retention_days`, then keep only the
/// `retention_runs` most recent. Returns how many folders were removed.
pub fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
) -> Result<usize> {
    if !base_log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);

    let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let stamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_run_timestamp);
        if let Some(dt) = stamp {
            runs.push((path, dt));
        }
    }

    // Newest first
    runs.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (index, (path, dt)) in runs.iter().enumerate() {
        if *dt >= cutoff && index < retention_runs {
            continue;
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!(
                "Warning: Failed to remove old log directory {}: {}",
                path.display(),
                e
            ),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cleanup_keeps_most_recent_runs() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        for hours_ago in 0..5 {
            let stamp = (now - chrono::Duration::hours(hours_ago)).format(RUN_TIMESTAMP_FORMAT);
            std::fs::create_dir_all(dir.path().join(format!("run_{}", stamp))).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("sessions")).unwrap();

        let removed = cleanup_old_logs(dir.path(), 30, 3).unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join("sessions").exists());
    }

    #[test]
    fn test_cleanup_removes_expired_runs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("run_20000101_000000")).unwrap();

        let removed = cleanup_old_logs(dir.path(), 30, 10).unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_run_timestamp_parse() {
        assert!(parse_run_timestamp("run_20250101_120000").is_some());
        assert!(parse_run_timestamp("run_latest").is_none());
        assert!(parse_run_timestamp("session_20250101_120000").is_none());
    }
}
