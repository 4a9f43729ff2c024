//! Configuration for gaze-link
//!
//! Loads configuration from a TOML file. Every key has a default so a
//! partial (or missing) file is valid.

use crate::error::{Error, Result};
use crate::protocol::commands::DEFAULT_ENABLED_FIELDS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Tracker connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Tracker host (default: 127.0.0.1, the control application runs locally)
    #[serde(default = "default_host")]
    pub host: String,

    /// Tracker TCP port (default: 4242)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout in milliseconds (default: 1000)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Socket read timeout in milliseconds (default: 200)
    ///
    /// Bounds how long the reader waits before re-checking the shutdown flag.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Fixed interval between reconnect attempts in milliseconds (default: 1000)
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,

    /// Wait bound for command acknowledgments in milliseconds (default: 2000)
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Wait bound for each enable-field acknowledgment in milliseconds (default: 1000)
    #[serde(default = "default_enable_ack_timeout")]
    pub enable_ack_timeout_ms: u64,

    /// Attempts per enable-field command before reconnecting (default: 2)
    #[serde(default = "default_enable_attempts")]
    pub enable_attempts: u32,
}

/// Sample stream settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Acquisition queue capacity (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Enable-field commands sent after ENABLE_SEND_DATA, in order
    #[serde(default = "default_enabled_fields")]
    pub enabled_fields: Vec<String>,
}

/// Calibration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationConfig {
    /// Display width in display units (default: 1920)
    #[serde(default = "default_display_width")]
    pub display_width: f64,

    /// Display height in display units (default: 1080)
    #[serde(default = "default_display_height")]
    pub display_height: f64,

    /// Target inset from each display edge as a fraction (default: 0.1)
    #[serde(default = "default_target_margin")]
    pub target_margin: f64,

    /// Delay after a target activates before sampling starts (default: 200 ms)
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Sampling window per target (default: 800 ms, allowed 500..=1000)
    #[serde(default = "default_sample_window_ms")]
    pub sample_window_ms: u64,

    /// Minimum valid samples per target (default: 10)
    #[serde(default = "default_min_valid_samples")]
    pub min_valid_samples: usize,

    /// Fraction trimmed from each end before averaging (default: 0.2)
    #[serde(default = "default_trim_fraction")]
    pub trim_fraction: f64,

    /// Average error below which a calibration is OK (default: 40 display units)
    #[serde(default = "default_ok_threshold")]
    pub ok_threshold: f64,

    /// Average error below which a calibration is LOW (default: 80 display units)
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Also run the tracker's own calibration command sequence (default: false)
    #[serde(default)]
    pub drive_device: bool,

    /// Classify with the tracker-reported error when one arrives (default: false)
    #[serde(default)]
    pub prefer_device_error: bool,
}

/// Built-in simulated tracker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Stream from the simulated tracker instead of connecting over TCP (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Data record rate in Hz (default: 60)
    #[serde(default = "default_sim_rate")]
    pub rate_hz: f64,

    /// Time from one blink to the next in milliseconds (default: 6000, 0 = never)
    #[serde(default = "default_blink_interval")]
    pub blink_interval_ms: u64,

    /// Length of each blink in milliseconds (default: 300)
    #[serde(default = "default_blink_duration")]
    pub blink_duration_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4242
}
fn default_connect_timeout() -> u64 {
    1000
}
fn default_read_timeout() -> u64 {
    200
}
fn default_retry_interval() -> u64 {
    1000
}
fn default_ack_timeout() -> u64 {
    2000
}
fn default_enable_ack_timeout() -> u64 {
    1000
}
fn default_enable_attempts() -> u32 {
    2
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_enabled_fields() -> Vec<String> {
    DEFAULT_ENABLED_FIELDS.iter().map(|s| s.to_string()).collect()
}
fn default_display_width() -> f64 {
    1920.0
}
fn default_display_height() -> f64 {
    1080.0
}
fn default_target_margin() -> f64 {
    0.1
}
fn default_settle_ms() -> u64 {
    200
}
fn default_sample_window_ms() -> u64 {
    800
}
fn default_min_valid_samples() -> usize {
    10
}
fn default_trim_fraction() -> f64 {
    0.2
}
fn default_ok_threshold() -> f64 {
    40.0
}
fn default_low_threshold() -> f64 {
    80.0
}
fn default_sim_rate() -> f64 {
    60.0
}
fn default_blink_interval() -> u64 {
    6000
}
fn default_blink_duration() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            retry_interval_ms: default_retry_interval(),
            ack_timeout_ms: default_ack_timeout(),
            enable_ack_timeout_ms: default_enable_ack_timeout(),
            enable_attempts: default_enable_attempts(),
        }
    }
}

impl ConnectionConfig {
    /// Full `host:port` address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn enable_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.enable_ack_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            enabled_fields: default_enabled_fields(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            display_width: default_display_width(),
            display_height: default_display_height(),
            target_margin: default_target_margin(),
            settle_ms: default_settle_ms(),
            sample_window_ms: default_sample_window_ms(),
            min_valid_samples: default_min_valid_samples(),
            trim_fraction: default_trim_fraction(),
            ok_threshold: default_ok_threshold(),
            low_threshold: default_low_threshold(),
            drive_device: false,
            prefer_device_error: false,
        }
    }
}

impl CalibrationConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_window_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_hz: default_sim_rate(),
            blink_interval_ms: default_blink_interval(),
            blink_duration_ms: default_blink_duration(),
        }
    }
}

impl SimulationConfig {
    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }

    pub fn blink_duration(&self) -> Duration {
        Duration::from_millis(self.blink_duration_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use gaze_link::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("gaze-link.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Where the client connects, for logs
    pub fn endpoint(&self) -> String {
        if self.simulation.enabled {
            format!("simulated tracker ({} Hz)", self.simulation.rate_hz)
        } else {
            self.connection.address()
        }
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connection.port == 0 {
            return Err(Error::Config("connection.port must be non-zero".into()));
        }
        if self.connection.enable_attempts == 0 {
            return Err(Error::Config(
                "connection.enable_attempts must be at least 1".into(),
            ));
        }
        if self.stream.queue_capacity == 0 {
            return Err(Error::Config("stream.queue_capacity must be non-zero".into()));
        }

        let cal = &self.calibration;
        if !(500..=1000).contains(&cal.sample_window_ms) {
            return Err(Error::Config(format!(
                "calibration.sample_window_ms must be 500..=1000, got {}",
                cal.sample_window_ms
            )));
        }
        if cal.min_valid_samples == 0 {
            return Err(Error::Config(
                "calibration.min_valid_samples must be at least 1".into(),
            ));
        }
        if !(0.0..0.5).contains(&cal.target_margin) {
            return Err(Error::Config(format!(
                "calibration.target_margin must be in [0, 0.5), got {}",
                cal.target_margin
            )));
        }
        if !(0.0..0.5).contains(&cal.trim_fraction) {
            return Err(Error::Config(format!(
                "calibration.trim_fraction must be in [0, 0.5), got {}",
                cal.trim_fraction
            )));
        }
        if cal.display_width <= 0.0 || cal.display_height <= 0.0 {
            return Err(Error::Config("calibration display size must be positive".into()));
        }
        if cal.low_threshold < cal.ok_threshold {
            return Err(Error::Config(format!(
                "calibration.low_threshold ({}) must not be below ok_threshold ({})",
                cal.low_threshold, cal.ok_threshold
            )));
        }

        let sim = &self.simulation;
        if !(sim.rate_hz.is_finite() && sim.rate_hz > 0.0 && sim.rate_hz <= 1000.0) {
            return Err(Error::Config(format!(
                "simulation.rate_hz must be in (0, 1000], got {}",
                sim.rate_hz
            )));
        }
        if sim.blink_interval_ms > 0 && sim.blink_duration_ms >= sim.blink_interval_ms {
            return Err(Error::Config(
                "simulation.blink_duration_ms must be shorter than blink_interval_ms".into(),
            ));
        }
        Ok(())
    }
}
