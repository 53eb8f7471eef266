//! btleplug backend for Windows, macOS and Linux.

use crate::sensors::error::{ConnectError, ScanError, TransportError};
use crate::sensors::ftms::{CYCLING_POWER_SERVICE_UUID, FTMS_SERVICE_UUID, HEART_RATE_SERVICE_UUID};
use crate::sensors::platform::{
    BleScanner, HostOs, Notification, NotificationStream, PeripheralLink, PlatformBackend,
};
use crate::sensors::types::PeripheralDescriptor;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn ble_error(e: btleplug::Error) -> TransportError {
    TransportError::Ble(e.to_string())
}

/// Backend that drives the first adapter btleplug reports.
pub struct BtleplugBackend {
    platform: HostOs,
}

impl BtleplugBackend {
    pub fn new(platform: HostOs) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl PlatformBackend for BtleplugBackend {
    fn name(&self) -> &'static str {
        "btleplug"
    }

    fn platform(&self) -> HostOs {
        self.platform
    }

    async fn create_scanner(&self) -> Result<Arc<dyn BleScanner>, ScanError> {
        tracing::info!("Initializing BLE adapter");

        let manager = Manager::new()
            .await
            .map_err(|e| ScanError::AdapterUnavailable(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ScanError::AdapterUnavailable(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::AdapterUnavailable("no adapter found".to_string()))?;

        tracing::info!("BLE adapter initialized");
        Ok(Arc::new(BtleplugScanner { adapter }))
    }
}

/// Scanner over one btleplug adapter.
pub struct BtleplugScanner {
    adapter: Adapter,
}

impl BtleplugScanner {
    /// Descriptor for a peripheral, or `None` if it advertises no fitness
    /// service.
    async fn describe(peripheral: &Peripheral) -> Option<PeripheralDescriptor> {
        let properties = peripheral.properties().await.ok()??;
        PeripheralDescriptor::from_advertisement(
            peripheral.id().to_string(),
            properties.local_name,
            properties.services,
            properties.rssi,
        )
    }
}

#[async_trait]
impl BleScanner for BtleplugScanner {
    async fn scan(&self, timeout: Duration) -> Result<Vec<PeripheralDescriptor>, ScanError> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

        let scan_filter = ScanFilter {
            services: vec![
                FTMS_SERVICE_UUID,
                CYCLING_POWER_SERVICE_UUID,
                HEART_RATE_SERVICE_UUID,
            ],
        };

        self.adapter
            .start_scan(scan_filter)
            .await
            .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

        tracing::debug!("Scanning for {:?}", timeout);

        let mut found = Vec::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                        let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                            continue;
                        };
                        if let Some(descriptor) = Self::describe(&peripheral).await {
                            tracing::debug!("Heard {} ({})", descriptor.name, descriptor.device_id);
                            found.push(descriptor);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            tracing::warn!("Failed to stop scan: {}", e);
        }

        Ok(found)
    }

    async fn connect(&self, device_id: &str) -> Result<Arc<dyn PeripheralLink>, ConnectError> {
        let peripherals = self.adapter.peripherals().await.map_err(ble_error)?;

        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| TransportError::PeripheralNotFound(device_id.to_string()))?;

        peripheral.connect().await.map_err(ble_error)?;
        peripheral.discover_services().await.map_err(ble_error)?;

        Ok(Arc::new(BtleplugLink {
            device_id: device_id.to_string(),
            peripheral,
        }))
    }
}

/// Link over a connected btleplug peripheral.
pub struct BtleplugLink {
    device_id: String,
    peripheral: Peripheral,
}

impl BtleplugLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl PeripheralLink for BtleplugLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn has_characteristic(&self, characteristic: Uuid) -> bool {
        self.peripheral
            .characteristics()
            .iter()
            .any(|c| c.uuid == characteristic)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let c = self.characteristic(characteristic)?;
        self.peripheral.read(&c).await.map_err(ble_error)
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        self.peripheral
            .write(&c, value, WriteType::WithResponse)
            .await
            .map_err(ble_error)
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&c).await.map_err(ble_error)
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let c = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&c).await.map_err(ble_error)
    }

    async fn notifications(&self) -> Result<NotificationStream, TransportError> {
        let stream = self.peripheral.notifications().await.map_err(ble_error)?;
        Ok(stream
            .map(|n| Notification {
                characteristic: n.uuid,
                value: n.value,
            })
            .boxed())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await.map_err(ble_error)
    }
}
