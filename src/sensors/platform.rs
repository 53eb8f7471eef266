//! Platform scanner abstraction.
//!
//! The connection manager talks to BLE hardware only through the
//! [`BleScanner`] and [`PeripheralLink`] traits. A [`PlatformBackend`]
//! produces a scanner for the host it supports, and [`PlatformResolver`]
//! picks the backend once per process.

use crate::sensors::btle::BtleplugBackend;
use crate::sensors::error::{ConnectError, PlatformUnsupportedError, ScanError, TransportError};
use crate::sensors::types::PeripheralDescriptor;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use uuid::Uuid;

/// Host operating system, as far as BLE backend selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
    Android,
    Ios,
    Other,
}

impl HostOs {
    /// The OS this binary was compiled for.
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value.
    pub fn from_os_name(name: &str) -> Self {
        match name {
            "windows" => HostOs::Windows,
            "macos" => HostOs::MacOs,
            "linux" => HostOs::Linux,
            "android" => HostOs::Android,
            "ios" => HostOs::Ios,
            _ => HostOs::Other,
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOs::Windows => write!(f, "Windows"),
            HostOs::MacOs => write!(f, "macOS"),
            HostOs::Linux => write!(f, "Linux"),
            HostOs::Android => write!(f, "Android"),
            HostOs::Ios => write!(f, "iOS"),
            HostOs::Other => write!(f, "unknown"),
        }
    }
}

/// A characteristic value pushed by a peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

/// Stream of notifications for every subscribed characteristic of one link.
/// Ends when the link drops.
pub type NotificationStream = BoxStream<'static, Notification>;

/// An established GATT connection to one peripheral.
#[async_trait]
pub trait PeripheralLink: Send + Sync {
    /// Id of the peripheral this link talks to.
    fn device_id(&self) -> &str;

    /// Whether service discovery found `characteristic`.
    fn has_characteristic(&self, characteristic: Uuid) -> bool;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError>;

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;

    /// Notification stream. Call once per link, after subscribing.
    async fn notifications(&self) -> Result<NotificationStream, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Scan and connect capability offered uniformly on every supported host.
#[async_trait]
pub trait BleScanner: Send + Sync {
    /// Scan for `timeout` and return every fitness peripheral heard. The
    /// same id may appear more than once.
    async fn scan(&self, timeout: Duration) -> Result<Vec<PeripheralDescriptor>, ScanError>;

    /// Open a link to a previously scanned peripheral.
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn PeripheralLink>, ConnectError>;
}

/// Produces a [`BleScanner`] for one host platform.
#[async_trait]
pub trait PlatformBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn platform(&self) -> HostOs;

    fn is_platform_supported(&self, host: HostOs) -> bool {
        self.platform() == host
    }

    /// Build the scanner. A backend that claims a platform without an
    /// implementation returns [`PlatformUnsupportedError::NotImplemented`].
    async fn create_scanner(&self) -> Result<Arc<dyn BleScanner>, ScanError>;
}

/// Chooses the backend for the host and builds its scanner.
pub struct PlatformResolver {
    host: HostOs,
    backends: Vec<Arc<dyn PlatformBackend>>,
    selected: OnceLock<Result<Arc<dyn PlatformBackend>, PlatformUnsupportedError>>,
}

impl PlatformResolver {
    /// Resolver for `host` with no backends registered.
    pub fn new(host: HostOs) -> Self {
        Self {
            host,
            backends: Vec::new(),
            selected: OnceLock::new(),
        }
    }

    /// Resolver for the running host with the btleplug backends for
    /// Windows, macOS and Linux.
    pub fn with_default_backends() -> Self {
        Self::new(HostOs::current())
            .register(Arc::new(BtleplugBackend::new(HostOs::Windows)))
            .register(Arc::new(BtleplugBackend::new(HostOs::MacOs)))
            .register(Arc::new(BtleplugBackend::new(HostOs::Linux)))
    }

    /// Add a backend. Earlier registrations win when several match.
    pub fn register(mut self, backend: Arc<dyn PlatformBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn host(&self) -> HostOs {
        self.host
    }

    /// The backend for the host. Selection happens on the first call and is
    /// reused afterwards.
    pub fn select(&self) -> Result<Arc<dyn PlatformBackend>, PlatformUnsupportedError> {
        self.selected
            .get_or_init(|| {
                let chosen = self
                    .backends
                    .iter()
                    .find(|b| b.is_platform_supported(self.host))
                    .cloned();

                match chosen {
                    Some(backend) => {
                        tracing::info!(
                            "Selected {} backend for {}",
                            backend.name(),
                            self.host
                        );
                        Ok(backend)
                    }
                    None => {
                        let supported = self
                            .backends
                            .iter()
                            .map(|b| b.platform().to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        tracing::warn!("No Bluetooth backend for {}", self.host);
                        Err(PlatformUnsupportedError::NoBackend {
                            platform: self.host,
                            supported,
                        })
                    }
                }
            })
            .clone()
    }

    /// Select the backend and build its scanner.
    pub async fn resolve(&self) -> Result<Arc<dyn BleScanner>, ScanError> {
        let backend = self.select()?;
        backend.create_scanner().await
    }
}
