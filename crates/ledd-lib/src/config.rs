//! Daemon configuration: TOML-based, platform-aware paths.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::color::DEFAULT_GAMMA;
use crate::daemon::StoreLocation;
use crate::registers::{MAX_FREQUENCY, MIN_FREQUENCY};
use crate::runtime::RuntimeSettings;

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str =
    "# LedD configuration. Command line flags override the values below.\n\n";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 1425;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on. Default: "0.0.0.0".
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port. Default: 1425.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the JSON store. Empty = `<data dir>/ledd/ledd.json`.
    #[serde(default)]
    pub store_path: String,

    /// Milliseconds between effect ticks. Default: 100.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Gamma for stripes added without one. Default: 2.8.
    #[serde(default = "default_gamma")]
    pub default_gamma: f64,

    /// PWM frequency programmed into newly added controllers. Default: 1526.
    #[serde(default = "default_frequency")]
    pub initial_frequency: u32,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_tick_interval() -> u64 {
    100
}
fn default_gamma() -> f64 {
    DEFAULT_GAMMA
}
fn default_frequency() -> u32 {
    u32::from(MAX_FREQUENCY)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: default_host(),
            port: DEFAULT_PORT,
            store_path: String::new(),
            tick_interval_ms: default_tick_interval(),
            default_gamma: DEFAULT_GAMMA,
            initial_frequency: default_frequency(),
        }
    }
}

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// `host` is empty.
    EmptyHost,
    /// `port` is 0.
    InvalidPort,
    /// `tick_interval_ms` is 0.
    InvalidTickInterval,
    /// `default_gamma` is not a positive finite number.
    InvalidGamma(f64),
    /// `initial_frequency` is outside what the chip can produce.
    FrequencyOutOfRange(u32),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyHost => write!(f, "Host cannot be empty"),
            ValidationError::InvalidPort => write!(f, "Port must be between 1 and 65535"),
            ValidationError::InvalidTickInterval => {
                write!(f, "Tick interval must be at least 1 ms")
            }
            ValidationError::InvalidGamma(g) => {
                write!(f, "Invalid default gamma {g}: must be positive")
            }
            ValidationError::FrequencyOutOfRange(hz) => write!(
                f,
                "Initial frequency {hz} Hz out of range ({MIN_FREQUENCY}..={MAX_FREQUENCY})"
            ),
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ledd"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Default store file: `<data dir>/ledd/ledd.json`.
    pub fn default_store_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("ledd").join("ledd.json"))
    }

    /// Store file this config points at, if any can be resolved.
    pub fn store_file(&self) -> Option<PathBuf> {
        let path = self.store_path.trim();
        if path.is_empty() {
            Self::default_store_path()
        } else {
            Some(PathBuf::from(path))
        }
    }

    /// Resolved store location. Falls back to memory if no data directory
    /// exists.
    pub fn store_location(&self) -> StoreLocation {
        match self.store_file() {
            Some(path) => StoreLocation::File(path),
            None => {
                log::warn!("no data directory, falling back to in-memory store");
                StoreLocation::Memory
            }
        }
    }

    /// `host:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            default_gamma: self.default_gamma,
            initial_frequency: self.initial_frequency,
        }
    }

    /// Save config to an arbitrary path atomically (write to temp file, then rename).
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let serialized = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        let contents = format!("{CONFIG_HEADER}{serialized}");
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, &contents)?;
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                // Rename can fail across filesystems; fall back to direct write + cleanup
                let result = std::fs::write(path, &contents);
                let _ = std::fs::remove_file(&tmp);
                result
            }
        }
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost);
        }
        if self.port == 0 {
            errors.push(ValidationError::InvalidPort);
        }
        if self.tick_interval_ms == 0 {
            errors.push(ValidationError::InvalidTickInterval);
        }
        if !(self.default_gamma.is_finite() && self.default_gamma > 0.0) {
            errors.push(ValidationError::InvalidGamma(self.default_gamma));
        }
        let range = u32::from(MIN_FREQUENCY)..=u32::from(MAX_FREQUENCY);
        if !range.contains(&self.initial_frequency) {
            errors.push(ValidationError::FrequencyOutOfRange(self.initial_frequency));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
