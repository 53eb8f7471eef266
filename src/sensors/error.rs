//! Error types for scanning, connecting and talking to peripherals.

use crate::sensors::platform::HostOs;
use crate::sensors::types::ConnectionState;
use thiserror::Error;
use uuid::Uuid;

/// No usable BLE backend for the host. Never means "no devices found".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformUnsupportedError {
    /// No registered backend claims the host platform.
    #[error("no Bluetooth backend for platform {platform} (supported: {supported})")]
    NoBackend { platform: HostOs, supported: String },

    /// A backend claims the platform but its capability is not implemented.
    #[error("Bluetooth backend for {platform} is not implemented")]
    NotImplemented { platform: HostOs },
}

/// Raw failure reported by a backend link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Peripheral id unknown to the adapter
    #[error("peripheral not found: {0}")]
    PeripheralNotFound(String),

    /// The peripheral does not expose this characteristic
    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    /// Link dropped while an operation was in flight
    #[error("link closed")]
    LinkClosed,

    /// Generic BLE stack error
    #[error("BLE error: {0}")]
    Ble(String),
}

/// Errors surfaced by a scan. The caller receives an empty result and may
/// fall back to simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// The backend failed to start or run the scan
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// The scan exceeded its deadline
    #[error("scan timed out")]
    Timeout,

    /// The caller cancelled the scan
    #[error("scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Unsupported(#[from] PlatformUnsupportedError),
}

/// Errors surfaced by a connect attempt. The peripheral is left `Failed`
/// unless the attempt was rejected before it started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The peripheral is already connected; its state is unchanged.
    #[error("already connected: {0}")]
    AlreadyConnected(String),

    /// Another connect attempt for this peripheral is running.
    #[error("connection already in progress: {0}")]
    InProgress(String),

    /// The id was never discovered by a scan.
    #[error("unknown peripheral: {0}")]
    UnknownPeripheral(String),

    /// The peripheral exposes no characteristic this core can stream.
    #[error("peripheral {0} exposes no supported measurement characteristic")]
    NoMeasurementCharacteristic(String),

    /// The registry refused a state change.
    #[error("cannot move {device_id} from {from} to {to}")]
    InvalidTransition {
        device_id: String,
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Connect attempt exceeded its deadline
    #[error("connection timed out")]
    Timeout,

    /// Connect attempt was cancelled
    #[error("connection cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Unsupported(#[from] PlatformUnsupportedError),
}

/// Errors from writing a control point command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The peripheral is not in the `Connected` state
    #[error("peripheral not connected: {0}")]
    NotConnected(String),

    /// The peripheral has no Fitness Machine Control Point
    #[error("peripheral {0} has no control point")]
    NoControlPoint(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
