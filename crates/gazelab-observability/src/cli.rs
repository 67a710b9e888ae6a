// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CLI argument parsing for per-crate debug flags
//!
//! Supports flags like `--debug-gazelab-tracker`, `--debug-gazelab-session`,
//! etc. to raise one crate to debug level without drowning the console.

use std::collections::HashMap;
use std::env;

use crate::KNOWN_CRATES;

/// Parse debug flags from command-line arguments
///
/// # Example
/// ```rust
/// use gazelab_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-gazelab-tracker".to_string()]);
/// assert!(flags.is_enabled("gazelab-tracker"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CrateDebugFlags {
    pub enabled_crates: HashMap<String, bool>,
}

impl CrateDebugFlags {
    /// Parse debug flags from command-line arguments
    ///
    /// Looks for arguments matching `--debug-{crate-name}`.
    /// Also supports `--debug-all` to enable all crates.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut enabled_crates = HashMap::new();
        let mut debug_all = false;

        for arg in args {
            if arg == "--debug-all" {
                debug_all = true;
                continue;
            }

            if let Some(crate_name) = arg.strip_prefix("--debug-") {
                enabled_crates.insert(crate_name.to_string(), true);
            }
        }

        let mut flags = CrateDebugFlags { enabled_crates };
        if debug_all {
            flags.enable_all();
        }
        flags
    }

    fn enable_all(&mut self) {
        for crate_name in KNOWN_CRATES {
            self.enabled_crates.insert(crate_name.to_string(), true);
        }
    }

    /// Merge a `GAZELAB_DEBUG`-style value: "all" or comma-separated crate names
    pub fn merge_env_value(&mut self, value: &str) {
        if value.trim() == "all" {
            self.enable_all();
            return;
        }
        for crate_name in value.split(',') {
            let crate_name = crate_name.trim();
            if !crate_name.is_empty() {
                self.enabled_crates.insert(crate_name.to_string(), true);
            }
        }
    }

    /// Check if debug is enabled for a specific crate
    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled_crates.contains_key(crate_name)
    }

    /// Check if debug is enabled for any crate
    pub fn any_enabled(&self) -> bool {
        !self.enabled_crates.is_empty()
    }

    /// Enabled crate names, sorted
    pub fn enabled_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.enabled_crates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build an `EnvFilter` directive string on top of `base_level`.
    ///
    /// Tracing targets use the module path, so crate names are converted to
    /// their underscore form: `gazelab-tracker` becomes `gazelab_tracker=debug`.
    pub fn to_filter_string(&self, base_level: &str) -> String {
        let base = if base_level.trim().is_empty() {
            "info"
        } else {
            base_level.trim()
        };

        let mut directives: Vec<String> = self
            .enabled_crates
            .keys()
            .map(|name| format!("{}=debug", name.replace('-', "_")))
            .collect();
        directives.sort();
        directives.push(base.to_string());
        directives.join(",")
    }
}

/// Parse `--debug <crate>` values and the `GAZELAB_DEBUG` variable
///
/// Each value may be a bare crate name, `all`, or the long `--debug-<crate>` form.
pub fn parse_debug_flags<I, S>(names: I) -> CrateDebugFlags
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut flags = CrateDebugFlags::from_args(
        names
            .into_iter()
            .map(|name| format!("--debug-{}", name.as_ref().trim().trim_start_matches("--debug-"))),
    );
    if let Ok(value) = env::var("GAZELAB_DEBUG") {
        flags.merge_env_value(&value);
    }
    flags
}

/// Generate help text for debug flags
pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug all                    Enable debug logging for all crates
  --debug {{crate-name}}          Enable debug logging for specific crate (repeatable)

Available crates:
  {}

Environment Variable:
  GAZELAB_DEBUG={{crate-name}}[,{{crate-name}}]  Enable debug for crates (comma-separated)
  GAZELAB_DEBUG=all                             Enable debug for all crates
"#,
        KNOWN_CRATES.join(", ")
    )
}
