// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Three tiers, later ones win:
//! 1. TOML file (base values)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit operator overrides)

use crate::{ConfigError, ConfigResult, GazelabConfig, CONFIG_FILE_NAME};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Find the gazelab configuration file
///
/// Search order:
/// 1. `GAZELAB_CONFIG_PATH` environment variable
/// 2. Current working directory: `./gazelab.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("GAZELAB_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by GAZELAB_CONFIG_PATH not found: {}",
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.clone();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent.to_path_buf();
                }
                None => break,
            }
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "gazelab configuration file '{}' not found in any of these locations:\n{}\n\nSet GAZELAB_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML.
/// Validation is left to [`crate::validate_config`] so callers can report
/// every problem at once.
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<GazelabConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: GazelabConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

fn parse_flag(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower == "true" || lower == "1" || lower == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `GAZELAB_TRACKER_HOST` -> `tracker.host`
/// - `GAZELAB_TRACKER_PORT` -> `tracker.port`
/// - `GAZELAB_SIMULATE` -> `tracker.simulate` and `coprocessor.simulate`
/// - `GAZELAB_SERIAL_PORT` -> `coprocessor.serial_port`
/// - `GAZELAB_SERIAL_BAUD` -> `coprocessor.baud`
/// - `GAZELAB_CALIBRATION_METHOD` -> `calibration.method`
/// - `GAZELAB_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut GazelabConfig) {
    if let Ok(value) = env::var("GAZELAB_TRACKER_HOST") {
        config.tracker.host = value;
    }
    if let Ok(value) = env::var("GAZELAB_TRACKER_PORT") {
        if let Ok(port) = value.parse::<u16>() {
            config.tracker.port = port;
        }
    }
    if let Ok(value) = env::var("GAZELAB_SIMULATE") {
        let simulate = parse_flag(&value);
        config.tracker.simulate = simulate;
        config.coprocessor.simulate = simulate;
    }
    if let Ok(value) = env::var("GAZELAB_SERIAL_PORT") {
        config.coprocessor.serial_port = value;
    }
    if let Ok(value) = env::var("GAZELAB_SERIAL_BAUD") {
        if let Ok(baud) = value.parse::<u32>() {
            config.coprocessor.baud = baud;
        }
    }
    if let Ok(value) = env::var("GAZELAB_CALIBRATION_METHOD") {
        config.calibration.method = value;
    }
    if let Ok(value) = env::var("GAZELAB_LOG_LEVEL") {
        config.logging.level = value;
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"tracker_host": "10.0.0.5", "simulate": "true"}`)
pub fn apply_cli_overrides(config: &mut GazelabConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("tracker_host") {
        config.tracker.host = value.clone();
    }
    if let Some(value) = cli_args.get("tracker_port") {
        if let Ok(port) = value.parse::<u16>() {
            config.tracker.port = port;
        }
    }
    if let Some(value) = cli_args.get("simulate") {
        let simulate = parse_flag(value);
        config.tracker.simulate = simulate;
        config.coprocessor.simulate = simulate;
    }
    if let Some(value) = cli_args.get("simulate_tracker") {
        config.tracker.simulate = parse_flag(value);
    }
    if let Some(value) = cli_args.get("simulate_coprocessor") {
        config.coprocessor.simulate = parse_flag(value);
    }
    if let Some(value) = cli_args.get("serial_port") {
        config.coprocessor.serial_port = value.clone();
    }
    if let Some(value) = cli_args.get("no_coprocessor") {
        if parse_flag(value) {
            config.coprocessor.enabled = false;
        }
    }
    if let Some(value) = cli_args.get("calibration_method") {
        config.calibration.method = value.clone();
    }
    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.clone();
    }
    if let Some(value) = cli_args.get("output_dir") {
        config.session.output_dir = PathBuf::from(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("station.toml");
        File::create(&config_path).unwrap();

        env::set_var("GAZELAB_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("GAZELAB_CONFIG_PATH");

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing_target() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("GAZELAB_CONFIG_PATH", "/definitely/not/here/gazelab.toml");
        let result = find_config_file();
        env::remove_var("GAZELAB_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("GAZELAB_TRACKER_HOST");
        env::remove_var("GAZELAB_TRACKER_PORT");
        env::remove_var("GAZELAB_CALIBRATION_METHOD");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[tracker]").unwrap();
        writeln!(file, "port = 4343").unwrap();
        writeln!(file, "[calibration]").unwrap();
        writeln!(file, "method = \"BOTH\"").unwrap();
        writeln!(file, "led_order = [3, 2, 1, 0]").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.tracker.port, 4343);
        assert_eq!(config.calibration.led_order, vec![3, 2, 1, 0]);
        assert_eq!(config.calibration.method(), crate::CalibrationMethod::Both);
        assert_eq!(config.coprocessor.baud, 115_200);
    }

    #[test]
    fn test_valid_point_minimum_is_not_configurable() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[calibration]\nmin_valid_points = 0\n").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();
        crate::validate_config(&config).unwrap();
        let written = toml::to_string(&config.calibration).unwrap();
        assert!(!written.contains("min_valid_points"));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[tracker\nport = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = GazelabConfig::default();

        env::set_var("GAZELAB_TRACKER_HOST", "192.168.1.100");
        env::set_var("GAZELAB_TRACKER_PORT", "9999");
        env::set_var("GAZELAB_SIMULATE", "yes");

        apply_environment_overrides(&mut config);

        env::remove_var("GAZELAB_TRACKER_HOST");
        env::remove_var("GAZELAB_TRACKER_PORT");
        env::remove_var("GAZELAB_SIMULATE");

        assert_eq!(config.tracker.host, "192.168.1.100");
        assert_eq!(config.tracker.port, 9999);
        assert!(config.tracker.simulate);
        assert!(config.coprocessor.simulate);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = GazelabConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("tracker_host".to_string(), "10.0.0.1".to_string());
        cli_args.insert("serial_port".to_string(), "/dev/ttyACM0".to_string());
        cli_args.insert("no_coprocessor".to_string(), "true".to_string());

        apply_cli_overrides(&mut config, &cli_args);

        assert_eq!(config.tracker.host, "10.0.0.1");
        assert_eq!(config.coprocessor.configured_port(), Some("/dev/ttyACM0"));
        assert!(!config.coprocessor.enabled);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[tracker]").unwrap();
        writeln!(file, "host = \"file-host\"").unwrap();
        writeln!(file, "port = 8000").unwrap();

        env::set_var("GAZELAB_TRACKER_HOST", "env-host");
        env::set_var("GAZELAB_TRACKER_PORT", "9000");

        let mut cli_args = HashMap::new();
        cli_args.insert("tracker_host".to_string(), "cli-host".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("GAZELAB_TRACKER_HOST");
        env::remove_var("GAZELAB_TRACKER_PORT");

        // CLI wins for host, env wins for port (no CLI override)
        assert_eq!(config.tracker.host, "cli-host");
        assert_eq!(config.tracker.port, 9000);
    }
}
