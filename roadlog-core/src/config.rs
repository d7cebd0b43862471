//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/roadlog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/roadlog/` (~/.config/roadlog/)
//! - Data: `$XDG_DATA_HOME/roadlog/` (~/.local/share/roadlog/)
//! - State/Logs: `$XDG_STATE_HOME/roadlog/` (~/.local/state/roadlog/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default detection threshold for the smoothed motion magnitude
pub const DEFAULT_THRESHOLD: f64 = 2.0;

/// Default smoothing window length
pub const DEFAULT_FILTER_FACTOR: usize = 5;

/// Smallest usable smoothing window
pub const MIN_FILTER_FACTOR: usize = 2;

/// Intervals with less accumulated severity are not recorded
pub const MINIMAL_SEVERITY_TO_RECORD: f64 = 2.0;

/// Gravity low-pass coefficient
pub const DEFAULT_GRAVITY_ALPHA: f64 = 0.8;

/// Display ring buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Detection tuning
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Where session data files live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload endpoint (optional)
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A configuration value that may arrive as a number or as text.
///
/// Preference stores hand these over as strings, so both forms are accepted
/// and resolved later with a fallback to the documented default.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawNumber {
    fn as_f64(&self) -> Option<f64> {
        let value = match self {
            RawNumber::Int(v) => Some(*v as f64),
            RawNumber::Float(v) => Some(*v),
            RawNumber::Text(s) => s.trim().parse::<f64>().ok(),
        };
        value.filter(|v| v.is_finite())
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            RawNumber::Int(v) => Some(*v),
            RawNumber::Float(_) => None,
            RawNumber::Text(s) => s.trim().parse::<i64>().ok(),
        }
    }
}

/// Detection tuning as written in the config file
#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// Magnitude threshold for the hysteresis detector
    #[serde(default)]
    pub threshold: Option<RawNumber>,

    /// Smoothing window length (integer, at least 2)
    #[serde(default)]
    pub filter_factor: Option<RawNumber>,

    /// Minimum accumulated severity worth recording
    #[serde(default)]
    pub minimal_severity: Option<RawNumber>,

    /// Gravity low-pass coefficient in (0, 1)
    #[serde(default)]
    pub gravity_alpha: Option<RawNumber>,

    /// Display ring buffer capacity
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            filter_factor: None,
            minimal_severity: None,
            gravity_alpha: None,
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

/// Validated detection parameters consumed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSettings {
    pub threshold: f64,
    pub filter_factor: usize,
    pub minimal_severity: f64,
    pub gravity_alpha: f64,
    pub buffer_capacity: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            filter_factor: DEFAULT_FILTER_FACTOR,
            minimal_severity: MINIMAL_SEVERITY_TO_RECORD,
            gravity_alpha: DEFAULT_GRAVITY_ALPHA,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl DetectionConfig {
    /// Resolve raw values into usable settings.
    ///
    /// Malformed values never fail: each one falls back to its default and a
    /// warning is logged.
    pub fn settings(&self) -> DetectionSettings {
        let defaults = DetectionSettings::default();

        let threshold = resolve_f64("threshold", self.threshold.as_ref(), defaults.threshold);

        let filter_factor = match self.filter_factor.as_ref() {
            None => defaults.filter_factor,
            Some(raw) => match raw.as_i64() {
                Some(v) => clamp_filter_factor(v),
                None => {
                    tracing::warn!(
                        value = ?raw,
                        default = defaults.filter_factor,
                        "Invalid detection.filter_factor, using default"
                    );
                    defaults.filter_factor
                }
            },
        };

        let minimal_severity = resolve_f64(
            "minimal_severity",
            self.minimal_severity.as_ref(),
            defaults.minimal_severity,
        );

        let mut gravity_alpha = resolve_f64(
            "gravity_alpha",
            self.gravity_alpha.as_ref(),
            defaults.gravity_alpha,
        );
        if !(0.0..1.0).contains(&gravity_alpha) {
            tracing::warn!(
                value = gravity_alpha,
                "detection.gravity_alpha must be in [0, 1), using default"
            );
            gravity_alpha = defaults.gravity_alpha;
        }

        let buffer_capacity = if self.buffer_capacity == 0 {
            tracing::warn!("detection.buffer_capacity must be positive, using default");
            defaults.buffer_capacity
        } else {
            self.buffer_capacity
        };

        DetectionSettings {
            threshold,
            filter_factor,
            minimal_severity,
            gravity_alpha,
            buffer_capacity,
        }
    }
}

/// Clamp a requested window length to the usable minimum.
pub fn clamp_filter_factor(requested: i64) -> usize {
    if requested < MIN_FILTER_FACTOR as i64 {
        tracing::warn!(
            requested,
            clamped = MIN_FILTER_FACTOR,
            "filter_factor must be at least 2, clamping"
        );
        MIN_FILTER_FACTOR
    } else {
        requested as usize
    }
}

fn resolve_f64(name: &str, raw: Option<&RawNumber>, default: f64) -> f64 {
    match raw {
        None => default,
        Some(raw) => raw.as_f64().unwrap_or_else(|| {
            tracing::warn!(
                setting = name,
                value = ?raw,
                default,
                "Invalid detection setting, using default"
            );
            default
        }),
    }
}

/// Storage locations
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// Directory for session data files (default: `$XDG_DATA_HOME/roadlog/sessions`)
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved data file directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("sessions"))
    }
}

/// Upload endpoint configuration
///
/// When `base_url` is set, `roadlog upload` posts unsent sessions to
/// `base_url + endpoint`.
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Server base URL (e.g., `https://roads.example.com/`)
    pub base_url: Option<String>,

    /// Path appended to the base URL
    #[serde(default = "default_upload_endpoint")]
    pub endpoint: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoint: default_upload_endpoint(),
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_upload_timeout(),
        }
    }
}

impl UploadConfig {
    /// Check if an upload endpoint is configured
    pub fn is_ready(&self) -> bool {
        self.base_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let Some(base_url) = self.base_url.as_deref() else {
            return Err(Error::Config("upload.base_url is required".to_string()));
        };
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "upload.base_url must be an http(s) URL, got {:?}",
                base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "upload.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Full upload URL
    pub fn url(&self) -> Option<String> {
        let base = self.base_url.as_deref()?;
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        ))
    }
}

fn default_upload_endpoint() -> String {
    "api/sessions".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_upload_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/roadlog/config.toml` (~/.config/roadlog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("roadlog").join("config.toml")
    }

    /// Returns the data directory path (database and session files)
    ///
    /// `$XDG_DATA_HOME/roadlog/` (~/.local/share/roadlog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("roadlog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/roadlog/` (~/.local/state/roadlog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("roadlog")
    }

    /// Returns the session store file path
    ///
    /// `$XDG_DATA_HOME/roadlog/sessions.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("sessions.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/roadlog/roadlog.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("roadlog.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
