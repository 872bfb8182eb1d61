//! Harness configuration via `oomsweep.toml`
//!
//! Every knob has a default matching the reference scenarios, so an empty
//! file (or no file at all) runs the standard sweep.

use crate::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name looked up by the runner.
pub const CONFIG_FILE_NAME: &str = "oomsweep.toml";

/// Default ceiling on attempts per retried operation.
pub const DEFAULT_MAX_ATTEMPTS: u64 = 100_000;

/// Bound on retry loops
///
/// `max_attempts = 0` retries forever, relying on the injector to
/// eventually let the operation through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed per operation before giving up (0 = unbounded)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,
}

fn default_max_attempts() -> u64 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// No ceiling
    pub fn unbounded() -> Self {
        RetryPolicy { max_attempts: 0 }
    }

    /// Ceiling of `max` attempts
    pub fn bounded(max: u64) -> Self {
        RetryPolicy { max_attempts: max }
    }

    /// Attempt ceiling, if any
    pub fn ceiling(&self) -> Option<u64> {
        match self.max_attempts {
            0 => None,
            max => Some(max),
        }
    }
}

/// Settings for the OpenClose scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCloseConfig {
    /// Repetitions under the injector's default strategy
    #[serde(default = "default_iteration_count")]
    pub iteration_count: u32,
    /// Run the exhaustive Step sweep after the repetitions
    #[serde(default = "default_true")]
    pub step_sweep: bool,
    /// Upper bound on the Step delay before the sweep is abandoned
    #[serde(default = "default_max_step_delay")]
    pub max_step_delay: u64,
}

fn default_iteration_count() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_max_step_delay() -> u64 {
    1_000_000
}

impl Default for OpenCloseConfig {
    fn default() -> Self {
        OpenCloseConfig {
            iteration_count: default_iteration_count(),
            step_sweep: true,
            max_step_delay: default_max_step_delay(),
        }
    }
}

/// Settings for the Resistance scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResistanceConfig {
    /// Rows inserted by each phase
    #[serde(default = "default_rows_to_insert")]
    pub rows_to_insert: u32,
    /// Random strategy duty cycle
    #[serde(default = "default_resistance_duty_cycle")]
    pub duty_cycle: u32,
    /// Random strategy seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_rows_to_insert() -> u32 {
    100
}

fn default_resistance_duty_cycle() -> u32 {
    2
}

impl Default for ResistanceConfig {
    fn default() -> Self {
        ResistanceConfig {
            rows_to_insert: default_rows_to_insert(),
            duty_cycle: default_resistance_duty_cycle(),
            seed: None,
        }
    }
}

/// Harness configuration loaded from `oomsweep.toml`.
///
/// # Example
///
/// ```toml
/// database_path = "oomsweep.db"
///
/// [retry]
/// max_attempts = 100000
///
/// [resistance]
/// rows_to_insert = 100
/// duty_cycle = 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Database file the library under test creates
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Retry ceiling
    #[serde(default)]
    pub retry: RetryPolicy,
    /// OpenClose scenario
    #[serde(default)]
    pub open_close: OpenCloseConfig,
    /// Resistance scenario
    #[serde(default)]
    pub resistance: ResistanceConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("oomsweep.db")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            database_path: default_database_path(),
            retry: RetryPolicy::default(),
            open_close: OpenCloseConfig::default(),
            resistance: ResistanceConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Check values that would make a scenario meaningless
    pub fn validate(&self) -> HarnessResult<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(HarnessError::config("database_path must not be empty"));
        }
        if self.open_close.iteration_count == 0 && !self.open_close.step_sweep {
            return Err(HarnessError::config(
                "open_close runs nothing: iteration_count is 0 and step_sweep is off",
            ));
        }
        if self.resistance.duty_cycle == 0 {
            return Err(HarnessError::config("resistance.duty_cycle must be at least 1"));
        }
        if self.resistance.rows_to_insert == 0 {
            return Err(HarnessError::config("resistance.rows_to_insert must be at least 1"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# oomsweep configuration
#
# Database file created by the library under test. Removed before every
# fresh open. Use ":memory:" to skip the file entirely.
database_path = "oomsweep.db"

[retry]
# Attempts per retried operation before the run is abandoned.
# 0 retries forever.
max_attempts = 100000

[open_close]
# Repetitions under the injector's default strategy.
iteration_count = 100
# Afterwards, sweep the Step strategy from delay 0 until the first success.
step_sweep = true
max_step_delay = 1000000

[resistance]
rows_to_insert = 100
# One allocation in `duty_cycle` fails.
duty_cycle = 2
# seed = 42
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            HarnessError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> HarnessResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }
}
