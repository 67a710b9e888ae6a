// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Gazelab Session Station

Runs one operator session: tracker link, co-processor link, calibration and
the FLOW state machine. Keyboard input on stdin mirrors the board buttons
(`r`/`l`/`u`/`d` arrows, `s` reset, `a` marker, `b`/`B` monitoring hold/release).

Usage:
  cargo run --bin gazelab-session -- --config gazelab.toml
  cargo run --bin gazelab-session -- --simulate --debug gazelab-session
*/

use std::collections::HashMap;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum};
use crossbeam::channel::unbounded;
use tracing::{info, warn};

use gazelab::calibration::QualityOverride;
use gazelab::config::{
    apply_cli_overrides, apply_environment_overrides, load_config, validate_config, GazelabConfig,
};
use gazelab::coprocessor::{available_ports, CoprocessorLink};
use gazelab::observability::{
    debug_flags_help, init_logging, parse_debug_flags, CrateDebugFlags, ObservabilityConfig,
};
use gazelab::session::{spawn_line_input, MockInference, SessionDevices, SessionRunner};
use gazelab::tracker::TrackerLink;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ForcedCalibration {
    Failed,
    Low,
}

impl From<ForcedCalibration> for QualityOverride {
    fn from(value: ForcedCalibration) -> Self {
        match value {
            ForcedCalibration::Failed => QualityOverride::Failed,
            ForcedCalibration::Low => QualityOverride::Low,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "gazelab-session", version, about = "Gaze-tracking session station")]
struct Args {
    /// Configuration file (defaults to gazelab.toml discovery)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run both links against their in-process simulators
    #[arg(long)]
    simulate: bool,

    /// Simulate only the tracker
    #[arg(long)]
    simulate_tracker: bool,

    /// Simulate only the co-processor
    #[arg(long)]
    simulate_coprocessor: bool,

    /// Run without the co-processor board
    #[arg(long)]
    no_coprocessor: bool,

    /// Tracker host override
    #[arg(long)]
    tracker_host: Option<String>,

    /// Tracker port override
    #[arg(long)]
    tracker_port: Option<u16>,

    /// Serial port override for the co-processor
    #[arg(long)]
    serial_port: Option<String>,

    /// Calibration method override (led, overlay, both)
    #[arg(long)]
    calibration_method: Option<String>,

    /// Force every calibration outcome (development only)
    #[arg(long, value_enum)]
    calibration_override: Option<ForcedCalibration>,

    /// Seconds the mock analysis spends per value
    #[arg(long, default_value_t = 0.5)]
    inference_seconds_per_value: f64,

    /// Session output folder override
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Enable debug logging for a crate (repeatable, or "all")
    #[arg(long = "debug", value_name = "CRATE")]
    debug: Vec<String>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn overrides(&self) -> HashMap<String, String> {
        let mut cli = HashMap::new();
        if let Some(host) = &self.tracker_host {
            cli.insert("tracker_host".to_string(), host.clone());
        }
        if let Some(port) = self.tracker_port {
            cli.insert("tracker_port".to_string(), port.to_string());
        }
        if let Some(port) = &self.serial_port {
            cli.insert("serial_port".to_string(), port.clone());
        }
        if let Some(method) = &self.calibration_method {
            cli.insert("calibration_method".to_string(), method.clone());
        }
        if let Some(dir) = &self.output_dir {
            cli.insert("output_dir".to_string(), dir.display().to_string());
        }
        for (key, set) in [
            ("simulate", self.simulate),
            ("simulate_tracker", self.simulate_tracker),
            ("simulate_coprocessor", self.simulate_coprocessor),
            ("no_coprocessor", self.no_coprocessor),
        ] {
            if set {
                cli.insert(key.to_string(), "true".to_string());
            }
        }
        cli
    }

    fn parse_with_debug_help() -> Self {
        let matches = Self::command().after_help(debug_flags_help()).get_matches();
        Self::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }

    fn debug_flags(&self) -> CrateDebugFlags {
        parse_debug_flags(&self.debug)
    }
}

fn resolve_config(args: &Args) -> Result<GazelabConfig> {
    let overrides = args.overrides();
    let config = match load_config(args.config.as_deref(), Some(&overrides)) {
        Ok(config) => config,
        Err(e) if e.is_missing_file() && args.config.is_none() => {
            eprintln!("Warning: {}; using defaults", e);
            let mut config = GazelabConfig::default();
            apply_environment_overrides(&mut config);
            apply_cli_overrides(&mut config, &overrides);
            config
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse_with_debug_help();

    if args.list_ports {
        let ports = available_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let config = resolve_config(&args)?;
    let debug_flags = args.debug_flags();
    let _logging = init_logging(&debug_flags, &ObservabilityConfig::from(&config.logging))?;
    info!("gazelab {} starting", gazelab::VERSION);
    if debug_flags.any_enabled() {
        info!("Debug logging enabled for: {}", debug_flags.enabled_names().join(", "));
    }

    let tracker = Arc::new(TrackerLink::new(&config.tracker));
    tracker.start().context("Failed to start the tracker link")?;

    let (tx, rx) = unbounded();
    let coprocessor = if config.coprocessor.enabled {
        let link = CoprocessorLink::open(&config.coprocessor, tx.clone())
            .context("Failed to open the co-processor")?;
        Some(Arc::new(link))
    } else {
        warn!("Co-processor disabled; keyboard input only");
        None
    };

    spawn_line_input(BufReader::new(std::io::stdin()), tx)
        .context("Failed to start keyboard input")?;

    let devices = SessionDevices::new(&config, Arc::clone(&tracker), coprocessor.clone(), rx);
    let mut runner = SessionRunner::new(&config, devices)
        .with_inference(Arc::new(MockInference::new(args.inference_seconds_per_value)))
        .with_calibration_override(args.calibration_override.map(QualityOverride::from));

    let running = runner.running_flag();
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to install the Ctrl+C handler")?;

    runner.run();

    if let Some(link) = &coprocessor {
        link.stop();
    }
    tracker.stop();
    info!("Session station stopped");
    Ok(())
}
