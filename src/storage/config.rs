//! Application configuration.
//!
//! Stored as TOML in the platform data directory. Every section falls back
//! to its defaults, so a partial file is valid.

use crate::sensors::simulation::SimulationConfig;
use crate::sensors::types::SensorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Simulation fallback settings
    pub simulation: SimulationSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            sensors: SensorSettings::default(),
            simulation: SimulationSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Connect to every discovered sensor after a scan
    pub auto_connect: bool,
    /// Discovery timeout in seconds
    pub discovery_timeout_secs: u32,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            auto_connect: true,
            discovery_timeout_secs: 10,
            connection_timeout_secs: 10,
        }
    }
}

impl SensorSettings {
    pub fn to_sensor_config(&self) -> SensorConfig {
        SensorConfig {
            discovery_timeout_secs: self.discovery_timeout_secs.into(),
            connection_timeout_secs: self.connection_timeout_secs.into(),
        }
    }
}

/// Simulation fallback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Fall back to simulated telemetry when no hardware connects
    pub enabled: bool,
    /// Milliseconds between simulated samples
    pub tick_interval_ms: u64,
    /// Jitter seed
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        let defaults = SimulationConfig::default();
        Self {
            enabled: true,
            tick_interval_ms: defaults.tick_interval.as_millis() as u64,
            seed: defaults.seed,
        }
    }
}

impl SimulationSettings {
    /// Runtime form. A zero interval is raised to one millisecond.
    pub fn to_simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            seed: self.seed,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridedata", "RideData")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from `path`. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save configuration to `path`, creating parent directories.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
