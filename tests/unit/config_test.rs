//! Unit tests for loading and saving configuration.

use ridedata::storage::config::{
    load_config_from, save_config_to, AppConfig, ConfigError, LoggingSettings,
};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_config_from(&dir.path().join("config.toml")).unwrap();

    assert_eq!(config, AppConfig::default());
    assert!(config.sensors.auto_connect);
    assert_eq!(config.sensors.discovery_timeout_secs, 10);
    assert!(config.simulation.enabled);
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AppConfig::default();
    config.sensors.auto_connect = false;
    config.sensors.connection_timeout_secs = 5;
    config.simulation.tick_interval_ms = 250;
    config.simulation.seed = 99;
    config.logging = LoggingSettings {
        level: "ridedata=debug".to_string(),
    };

    save_config_to(&config, &path).unwrap();
    let loaded = load_config_from(&path).unwrap();

    assert_eq!(loaded, config);
}

#[test]
fn test_invalid_toml_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sensors\nauto_connect = ").unwrap();

    assert!(matches!(
        load_config_from(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_wrong_type_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sensors]\ndiscovery_timeout_secs = \"ten\"\n").unwrap();

    assert!(matches!(
        load_config_from(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_runtime_conversions() {
    let mut config = AppConfig::default();
    config.sensors.discovery_timeout_secs = 3;
    config.sensors.connection_timeout_secs = 7;
    config.simulation.tick_interval_ms = 100;

    let sensors = config.sensors.to_sensor_config();
    assert_eq!(sensors.discovery_timeout(), Duration::from_secs(3));
    assert_eq!(sensors.connection_timeout(), Duration::from_secs(7));

    let simulation = config.simulation.to_simulation_config();
    assert_eq!(simulation.tick_interval, Duration::from_millis(100));
    assert_eq!(simulation.seed, config.simulation.seed);
}
