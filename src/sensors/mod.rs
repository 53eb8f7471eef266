//! Sensor module for BLE fitness peripherals.

pub mod btle;
pub mod error;
pub mod ftms;
pub mod manager;
pub mod platform;
pub mod simulation;
pub mod types;

pub use error::{CommandError, ConnectError, PlatformUnsupportedError, ScanError, TransportError};
pub use ftms::{ControlCommand, DecodeError, FeatureSet};
pub use manager::{ConnectionInfo, SensorManager};
pub use platform::{
    BleScanner, HostOs, Notification, NotificationStream, PeripheralLink, PlatformBackend,
    PlatformResolver,
};
pub use simulation::{SimulationConfig, SimulationGenerator, SimulationModel, SIMULATED_DEVICE_ID};
pub use types::{
    ConnectionState, DeviceInfo, FitnessMachineType, PeripheralDescriptor, Protocol, SensorConfig,
    SensorType,
};
