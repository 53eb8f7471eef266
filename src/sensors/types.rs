//! Sensor types and enums for BLE fitness peripherals.

use crate::sensors::ftms::{
    CYCLING_POWER_MEASUREMENT_UUID, CYCLING_POWER_SERVICE_UUID, FTMS_SERVICE_UUID,
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Type of fitness sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Smart trainer with FTMS support
    Trainer,
    /// Standalone power meter
    PowerMeter,
    /// Heart rate monitor
    HeartRate,
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorType::Trainer => write!(f, "Smart Trainer"),
            SensorType::PowerMeter => write!(f, "Power Meter"),
            SensorType::HeartRate => write!(f, "Heart Rate"),
        }
    }
}

/// BLE communication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// BLE Fitness Machine Service (0x1826)
    BleFtms,
    /// BLE Cycling Power Service (0x1818)
    BleCyclingPower,
    /// BLE Heart Rate Service (0x180D)
    BleHeartRate,
}

impl Protocol {
    /// Pick the protocol from a set of advertised services. FTMS wins over
    /// Cycling Power, which wins over Heart Rate.
    pub fn from_services(services: &[Uuid]) -> Option<Self> {
        if services.contains(&FTMS_SERVICE_UUID) {
            Some(Protocol::BleFtms)
        } else if services.contains(&CYCLING_POWER_SERVICE_UUID) {
            Some(Protocol::BleCyclingPower)
        } else if services.contains(&HEART_RATE_SERVICE_UUID) {
            Some(Protocol::BleHeartRate)
        } else {
            None
        }
    }

    /// Characteristic whose notifications carry telemetry for this protocol.
    pub fn measurement_characteristic(&self) -> Uuid {
        match self {
            Protocol::BleFtms => INDOOR_BIKE_DATA_UUID,
            Protocol::BleCyclingPower => CYCLING_POWER_MEASUREMENT_UUID,
            Protocol::BleHeartRate => HEART_RATE_MEASUREMENT_UUID,
        }
    }

    pub fn sensor_type(&self) -> SensorType {
        match self {
            Protocol::BleFtms => SensorType::Trainer,
            Protocol::BleCyclingPower => SensorType::PowerMeter,
            Protocol::BleHeartRate => SensorType::HeartRate,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::BleFtms => write!(f, "FTMS"),
            Protocol::BleCyclingPower => write!(f, "Cycling Power"),
            Protocol::BleHeartRate => write!(f, "Heart Rate"),
        }
    }
}

/// Lifecycle state of a peripheral in the registry.
///
/// ```text
/// Discovered -> Connecting -> Connected -> Disconnected
///                   |             |
///                   +-> Failed <--+
/// ```
/// `Failed` and `Disconnected` end an attempt; a rediscovered id goes back
/// to `Discovered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Seen by the latest scan
    #[default]
    Discovered,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
    /// Closed on request
    Disconnected,
    /// Transport error, timeout or cancellation
    Failed,
}

impl ConnectionState {
    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Discovered, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Disconnected)
                | (Connected, Failed)
                | (Disconnected, Discovered)
                | (Failed, Discovered)
        )
    }

    /// Whether the current attempt has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Discovered => write!(f, "Discovered"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Fitness machine category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessMachineType {
    Treadmill,
    CrossTrainer,
    StepClimber,
    StairClimber,
    Rower,
    IndoorBike,
}

/// Device Information record, read after connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_revision: Option<String>,
    pub machine_type: Option<FitnessMachineType>,
}

impl DeviceInfo {
    /// Info reported by the simulated trainer.
    pub fn simulated() -> Self {
        Self {
            manufacturer: Some("Simulated".to_string()),
            model_number: Some("KICKR CORE".to_string()),
            serial_number: Some("SIM-KC-2024-001".to_string()),
            firmware_revision: Some("4.2.1".to_string()),
            machine_type: Some(FitnessMachineType::IndoorBike),
        }
    }

    /// "Manufacturer Model", or whichever half is known.
    pub fn display_name(&self) -> Option<String> {
        match (&self.manufacturer, &self.model_number) {
            (Some(m), Some(n)) => Some(format!("{} {}", m, n)),
            (Some(m), None) => Some(m.clone()),
            (None, Some(n)) => Some(n.clone()),
            (None, None) => None,
        }
    }
}

/// A peripheral seen during a scan.
///
/// Snapshot value: a new scan result or a device-info read produces a new
/// descriptor, existing ones are never changed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralDescriptor {
    /// BLE device address/identifier
    pub device_id: String,
    /// User-friendly name (from BLE advertisement)
    pub name: String,
    /// Advertised service UUIDs
    pub services: Vec<Uuid>,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
    /// Detected sensor type
    pub sensor_type: SensorType,
    /// Communication protocol
    pub protocol: Protocol,
    /// Filled in once Device Information has been read
    pub device_info: Option<DeviceInfo>,
    /// When the advertisement was seen
    pub last_seen: DateTime<Utc>,
}

impl PeripheralDescriptor {
    /// Build a descriptor from an advertisement, or `None` when it carries no
    /// supported fitness service.
    pub fn from_advertisement(
        device_id: impl Into<String>,
        local_name: Option<String>,
        services: Vec<Uuid>,
        signal_strength: Option<i16>,
    ) -> Option<Self> {
        let protocol = Protocol::from_services(&services)?;
        Some(Self {
            device_id: device_id.into(),
            name: local_name.unwrap_or_else(|| "Unknown Sensor".to_string()),
            services,
            signal_strength,
            sensor_type: protocol.sensor_type(),
            protocol,
            device_info: None,
            last_seen: Utc::now(),
        })
    }

    /// Copy of this descriptor carrying `info`.
    pub fn with_device_info(&self, info: DeviceInfo) -> Self {
        Self {
            device_info: Some(info),
            ..self.clone()
        }
    }

    /// Whether `self` was heard more strongly than `other`. Unknown RSSI
    /// loses to any reading.
    pub fn is_stronger_than(&self, other: &PeripheralDescriptor) -> bool {
        match (self.signal_strength, other.signal_strength) {
            (Some(a), Some(b)) => a > b,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Configuration for the sensor manager.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Timeout for discovery scan in seconds
    pub discovery_timeout_secs: u64,
    /// Timeout for connection attempt in seconds
    pub connection_timeout_secs: u64,
}

impl SensorConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 10,
            connection_timeout_secs: 10,
        }
    }
}
