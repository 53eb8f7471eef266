//! RideData - BLE fitness telemetry core
//!
//! Connects to smart trainers, power meters and heart-rate straps over
//! Bluetooth Low Energy, decodes their GATT notifications and publishes one
//! merged stream of cycling telemetry. Falls back to a simulated trainer when
//! no hardware is available.

pub mod metrics;
pub mod sensors;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use metrics::pipeline::MetricsPipeline;
pub use metrics::snapshot::TelemetrySnapshot;
pub use sensors::manager::SensorManager;
pub use service::{TelemetryService, TelemetrySource};
pub use storage::config::AppConfig;
