//! Configuration loading and typed config structures.
//!
//! The configuration lives in `orgscope-config.yaml`. Every field has a
//! default, so a missing file or a partial file is fine. The log level can
//! be overridden with the `ORGSCOPE_LOG` environment variable.

use std::path::Path;
use std::time::Duration;

use orgscope_types::MapMode;
use serde::Deserialize;

/// Environment variable overriding `logging.level`.
pub const LOG_LEVEL_ENV: &str = "ORGSCOPE_LOG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level viewer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ViewerConfig {
    /// Trace capture limits.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Cursor auto-advance timing.
    #[serde(default)]
    pub animation: AnimationConfig,

    /// Run-event bridge queue policy.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Population run pacing.
    #[serde(default)]
    pub run: RunConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ViewerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.logging.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the subsystems cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.animation.tick_interval_ms == 0, "animation.tick_interval_ms must be at least 1"),
            (self.listener.map_capacity == 0, "listener.map_capacity must be at least 1"),
            (self.run.map_interval == 0, "run.map_interval must be at least 1"),
        ];
        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, reason)) => Err(ConfigError::Invalid {
                reason: (*reason).to_owned(),
            }),
            None => Ok(()),
        }
    }
}

/// Trace capture configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CaptureConfig {
    /// Maximum cycles executed per capture.
    #[serde(default = "default_cycle_cap")]
    pub cycle_cap: u64,

    /// Number of recent machine states compared for loop detection
    /// (0 disables detection).
    #[serde(default = "default_loop_lookback")]
    pub loop_lookback: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cycle_cap: default_cycle_cap(),
            loop_lookback: default_loop_lookback(),
        }
    }
}

/// Auto-advance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnimationConfig {
    /// Milliseconds between auto-advance ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl AnimationConfig {
    /// Tick period as a [`Duration`].
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Run-event bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenerConfig {
    /// Maximum pending map events before the oldest is dropped.
    #[serde(default = "default_map_capacity")]
    pub map_capacity: usize,

    /// How long a producer may block waiting for map space while an
    /// observer is attached.
    #[serde(default = "default_backpressure_timeout_ms")]
    pub backpressure_timeout_ms: u64,
}

impl ListenerConfig {
    /// Backpressure timeout as a [`Duration`].
    pub const fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            map_capacity: default_map_capacity(),
            backpressure_timeout_ms: default_backpressure_timeout_ms(),
        }
    }
}

/// Population run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Emit a map event every N updates.
    #[serde(default = "default_map_interval")]
    pub map_interval: u64,

    /// Stop after this many updates (0 = unlimited).
    #[serde(default)]
    pub max_updates: u64,

    /// Real-time milliseconds to wait between updates (0 = as fast as possible).
    #[serde(default)]
    pub update_interval_ms: u64,

    /// Quantity encoded by emitted maps.
    #[serde(default)]
    pub map_mode: MapMode,
}

impl RunConfig {
    /// Update pacing as a [`Duration`].
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            map_interval: default_map_interval(),
            max_updates: 0,
            update_interval_ms: 0,
            map_mode: MapMode::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl LoggingConfig {
    /// Replace `level` with `ORGSCOPE_LOG` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            if !level.trim().is_empty() {
                self.level = level;
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

const fn default_cycle_cap() -> u64 {
    1000
}

const fn default_loop_lookback() -> usize {
    256
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_map_capacity() -> usize {
    16
}

const fn default_backpressure_timeout_ms() -> u64 {
    250
}

const fn default_map_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    String::from("info")
}
