//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::equation::{PROBE_DX, PROBE_X, PROBE_XP};
use crate::error::{Result, SoilLinkError};
use crate::protocol::encoder::{Command, RATE_MAX_SECONDS, RATE_MIN_SECONDS};
use crate::session::{
    GattProfile, SessionOptions, DEFAULT_NOTIFY_UUID, DEFAULT_SERVICE_UUID, DEFAULT_WRITE_UUID,
};
use crate::telemetry::DEFAULT_HISTORY_CAPACITY;

/// Accepted `logging.level` values
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub radio: RadioConfig,
    pub telemetry: TelemetryConfig,
    pub device: DeviceConfig,
    pub formula: FormulaConfig,
    pub logging: LoggingConfig,
}

/// Radio link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,

    #[serde(default = "default_notify_characteristic")]
    pub notify_characteristic: Uuid,

    #[serde(default = "default_write_characteristic")]
    pub write_characteristic: Uuid,

    /// Connect to this address as soon as it is sighted
    #[serde(default)]
    pub device_address: Option<String>,

    /// Connect to the first device whose name contains this text
    #[serde(default)]
    pub name_filter: Option<String>,

    #[serde(default = "default_scan_throttle_ms")]
    pub scan_throttle_ms: u64,

    #[serde(default = "default_subscribe_delay_ms")]
    pub subscribe_delay_ms: u64,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,

    #[serde(default = "default_record")]
    pub record: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Commands sent once the link is ready
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_start_on_ready")]
    pub start_on_ready: bool,

    #[serde(default)]
    pub sample_rate_s: Option<u32>,
}

/// Equation selected at start
#[derive(Debug, Deserialize, Clone)]
pub struct FormulaConfig {
    #[serde(default = "default_formula_name")]
    pub name: String,

    #[serde(default = "default_formula_text")]
    pub text: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write a daily log file here
    #[serde(default)]
    pub directory: Option<String>,
}

// Default value functions
fn default_service_uuid() -> Uuid { DEFAULT_SERVICE_UUID }
fn default_notify_characteristic() -> Uuid { DEFAULT_NOTIFY_UUID }
fn default_write_characteristic() -> Uuid { DEFAULT_WRITE_UUID }
fn default_scan_throttle_ms() -> u64 { 5000 }
fn default_subscribe_delay_ms() -> u64 { 300 }

fn default_history_capacity() -> usize { DEFAULT_HISTORY_CAPACITY }
fn default_log_capacity() -> usize { 100 }
fn default_line_buffer() -> usize { 64 }
fn default_record() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_start_on_ready() -> bool { true }

fn default_formula_name() -> String { "Raw".to_string() }
fn default_formula_text() -> String { "x".to_string() }

fn default_log_level() -> String { "info".to_string() }

fn invalid(message: impl std::fmt::Display) -> SoilLinkError {
    SoilLinkError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use soil_link::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Session options derived from the `[radio]` and `[telemetry]` sections
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            profile: GattProfile {
                service: self.radio.service_uuid,
                notify: self.radio.notify_characteristic,
                write: self.radio.write_characteristic,
            },
            scan_throttle: Duration::from_millis(self.radio.scan_throttle_ms),
            line_buffer: self.telemetry.line_buffer,
        }
    }

    pub fn subscribe_delay(&self) -> Duration {
        Duration::from_millis(self.radio.subscribe_delay_ms)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Radio
        for (name, value) in [
            ("device_address", &self.radio.device_address),
            ("name_filter", &self.radio.name_filter),
        ] {
            if matches!(value, Some(text) if text.trim().is_empty()) {
                return Err(invalid(format!("{} cannot be empty when set", name)));
            }
        }

        if self.radio.scan_throttle_ms > 60000 {
            return Err(invalid("scan_throttle_ms must be between 0 and 60000"));
        }

        if self.radio.subscribe_delay_ms > 10000 {
            return Err(invalid("subscribe_delay_ms must be between 0 and 10000"));
        }

        // Telemetry buffers
        if !(1..=DEFAULT_HISTORY_CAPACITY).contains(&self.telemetry.history_capacity) {
            return Err(invalid(format!(
                "history_capacity must be between 1 and {}",
                DEFAULT_HISTORY_CAPACITY
            )));
        }

        if self.telemetry.log_capacity == 0 {
            return Err(invalid("log_capacity must be greater than 0"));
        }

        if self.telemetry.line_buffer == 0 || self.telemetry.line_buffer > 4096 {
            return Err(invalid("line_buffer must be between 1 and 4096"));
        }

        // Recording
        if self.telemetry.record && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when recording"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        // Device
        if let Some(rate) = self.device.sample_rate_s {
            if Command::rate(rate).is_err() {
                return Err(invalid(format!(
                    "sample_rate_s must be between {} and {}",
                    RATE_MIN_SECONDS, RATE_MAX_SECONDS
                )));
            }
        }

        // Seeded formula
        if self.formula.name.trim().is_empty() {
            return Err(invalid("formula name cannot be empty"));
        }

        crate::formula::validate(&self.formula.text, PROBE_X, PROBE_XP, PROBE_DX)
            .map_err(|e| invalid(format!("formula text is invalid: {}", e)))?;

        // Logging
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if matches!(&self.logging.directory, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging directory cannot be empty when set"));
        }

        Ok(())
    }
}
