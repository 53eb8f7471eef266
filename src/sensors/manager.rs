//! Sensor manager: device registry and connection lifecycle.
//!
//! Owns the discovered set and one [`ConnectionRecord`] per known peripheral
//! id. Scans replace the discovered set wholesale. Each connected peripheral
//! gets one notification task, so its samples reach the
//! [`MetricsPipeline`] in arrival order.

use crate::metrics::{MetricsPipeline, TelemetrySample};
use crate::sensors::error::{CommandError, ConnectError, ScanError, TransportError};
use crate::sensors::ftms::{
    decode_control_point_response, decode_cycling_power_measurement, decode_device_info_string,
    decode_fitness_machine_feature, decode_heart_rate_measurement, decode_indoor_bike_data,
    encode_control_command, ControlCommand, DecodeError, FeatureSet,
    CYCLING_POWER_MEASUREMENT_UUID, FIRMWARE_REVISION_UUID, FTMS_CONTROL_POINT_UUID,
    FTMS_FEATURE_UUID, HEART_RATE_MEASUREMENT_UUID, INDOOR_BIKE_DATA_UUID,
    MANUFACTURER_NAME_UUID, MODEL_NUMBER_UUID, SERIAL_NUMBER_UUID,
};
use crate::sensors::platform::{BleScanner, Notification, NotificationStream, PeripheralLink};
use crate::sensors::types::{
    ConnectionState, DeviceInfo, FitnessMachineType, PeripheralDescriptor, Protocol, SensorConfig,
};
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Extra time a backend gets past the scan window before the scan counts as
/// hung.
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Read-only view of one registry entry.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Latest descriptor, with device info once connected
    pub descriptor: PeripheralDescriptor,
    pub state: ConnectionState,
    /// Characteristics with notifications enabled
    pub subscriptions: Vec<Uuid>,
    /// Trainer capability bits, read at connect time
    pub features: Option<FeatureSet>,
    pub last_notification_at: Option<DateTime<Utc>>,
    /// Last sample decoded from this peripheral
    pub last_sample: Option<TelemetrySample>,
}

/// Registry entry. Only the manager touches it, always through its mutex.
struct ConnectionRecord {
    info: ConnectionInfo,
    link: Option<Arc<dyn PeripheralLink>>,
    /// Cancels the running connect attempt or notification task
    cancel: Option<CancellationToken>,
    pump: Option<JoinHandle<()>>,
}

impl ConnectionRecord {
    fn new(descriptor: PeripheralDescriptor) -> Self {
        Self {
            info: ConnectionInfo {
                descriptor,
                state: ConnectionState::Discovered,
                subscriptions: Vec::new(),
                features: None,
                last_notification_at: None,
                last_sample: None,
            },
            link: None,
            cancel: None,
            pump: None,
        }
    }

    fn device_id(&self) -> &str {
        &self.info.descriptor.device_id
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), ConnectError> {
        let from = self.info.state;
        if !from.can_transition_to(next) {
            return Err(ConnectError::InvalidTransition {
                device_id: self.device_id().to_string(),
                from,
                to: next,
            });
        }
        tracing::info!("{}: {} -> {}", self.device_id(), from, next);
        self.info.state = next;
        Ok(())
    }
}

/// What a successful connect attempt hands back for commit.
struct PreparedLink {
    subscriptions: Vec<Uuid>,
    features: Option<FeatureSet>,
    device_info: DeviceInfo,
    notifications: NotificationStream,
}

type RecordMap = HashMap<String, Arc<Mutex<ConnectionRecord>>>;

/// Manages BLE peripheral discovery, connection, and data streaming.
pub struct SensorManager {
    config: SensorConfig,
    scanner: Result<Arc<dyn BleScanner>, ScanError>,
    pipeline: Arc<MetricsPipeline>,
    /// Result of the latest successful scan (device_id -> descriptor)
    discovered: RwLock<HashMap<String, PeripheralDescriptor>>,
    records: RwLock<RecordMap>,
}

impl SensorManager {
    /// Create a manager over a resolved scanner, or over the error that
    /// prevented resolving one. With an error every scan and connect fails
    /// with it.
    pub fn new(
        scanner: Result<Arc<dyn BleScanner>, ScanError>,
        pipeline: Arc<MetricsPipeline>,
        config: SensorConfig,
    ) -> Self {
        if let Err(e) = &scanner {
            tracing::warn!("SensorManager has no BLE backend: {}", e);
        }
        Self {
            config,
            scanner,
            pipeline,
            discovered: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Whether a backend is available at all.
    pub fn has_backend(&self) -> bool {
        self.scanner.is_ok()
    }

    /// Scan for `timeout` and make the result the new discovered set.
    ///
    /// Duplicates of one id collapse to the strongest signal. Records of ids
    /// that were only discovered and are not heard again are dropped; failed
    /// or disconnected ids that are heard again return to `Discovered`.
    pub async fn scan(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<PeripheralDescriptor>, ScanError> {
        let scanner = self.scanner.as_ref().map_err(|e| e.clone())?;

        tracing::info!("Starting sensor discovery ({:?})", timeout);

        let found = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
            r = tokio::time::timeout(timeout + SCAN_GRACE, scanner.scan(timeout)) => {
                r.unwrap_or(Err(ScanError::Timeout))
            }
        };

        let found = match found {
            Ok(found) => dedup_by_signal(found),
            Err(e) => {
                tracing::warn!("Scan failed: {}", e);
                return Err(e);
            }
        };

        tracing::info!("Discovery finished, {} sensor(s) found", found.len());

        *self.discovered.write().await = found
            .iter()
            .map(|d| (d.device_id.clone(), d.clone()))
            .collect();

        self.refresh_records(&found).await;

        Ok(found)
    }

    async fn refresh_records(&self, found: &[PeripheralDescriptor]) {
        // Record locks are never awaited while the map lock is held
        let existing: Vec<(String, Arc<Mutex<ConnectionRecord>>)> = self
            .records
            .read()
            .await
            .iter()
            .map(|(id, record)| (id.clone(), Arc::clone(record)))
            .collect();

        let mut stale = Vec::new();
        for (id, record) in &existing {
            let mut record = record.lock().await;
            match found.iter().find(|d| &d.device_id == id) {
                Some(descriptor) => match record.info.state {
                    ConnectionState::Discovered => record.info.descriptor = descriptor.clone(),
                    ConnectionState::Failed | ConnectionState::Disconnected => {
                        if record.transition(ConnectionState::Discovered).is_ok() {
                            record.info.descriptor = descriptor.clone();
                        }
                    }
                    // Live connections keep their descriptor
                    ConnectionState::Connecting | ConnectionState::Connected => {}
                },
                None if record.info.state == ConnectionState::Discovered => stale.push(id.clone()),
                None => {}
            }
        }

        let mut records = self.records.write().await;
        for id in stale {
            // Skip records that a connect picked up since they were inspected
            let still_idle = records
                .get(&id)
                .and_then(|record| record.try_lock().ok())
                .is_some_and(|record| record.info.state == ConnectionState::Discovered);
            if still_idle {
                records.remove(&id);
            }
        }
        for descriptor in found {
            records
                .entry(descriptor.device_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ConnectionRecord::new(descriptor.clone()))));
        }
    }

    async fn record(&self, device_id: &str) -> Option<Arc<Mutex<ConnectionRecord>>> {
        self.records.read().await.get(device_id).cloned()
    }

    /// Connect to a discovered peripheral, subscribe to its measurement
    /// characteristic and read its device info.
    ///
    /// Bounded by the configured connection timeout and by `cancel`. Any
    /// failure leaves the peripheral `Failed` and emits a disconnected status.
    pub async fn connect(
        &self,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PeripheralDescriptor, ConnectError> {
        let scanner = match &self.scanner {
            Ok(scanner) => Arc::clone(scanner),
            Err(ScanError::Unsupported(e)) => return Err(e.clone().into()),
            Err(e) => return Err(TransportError::Ble(e.to_string()).into()),
        };

        let record = self
            .record(device_id)
            .await
            .ok_or_else(|| ConnectError::UnknownPeripheral(device_id.to_string()))?;

        let attempt = cancel.child_token();
        let descriptor = {
            let mut rec = record.lock().await;
            match rec.info.state {
                ConnectionState::Connected => {
                    return Err(ConnectError::AlreadyConnected(device_id.to_string()))
                }
                ConnectionState::Connecting => {
                    return Err(ConnectError::InProgress(device_id.to_string()))
                }
                ConnectionState::Failed | ConnectionState::Disconnected => {
                    rec.transition(ConnectionState::Discovered)?;
                }
                ConnectionState::Discovered => {}
            }
            rec.transition(ConnectionState::Connecting)?;
            rec.cancel = Some(attempt.clone());
            rec.info.descriptor.clone()
        };

        tracing::info!("Connecting to sensor: {} ({})", descriptor.name, device_id);

        let deadline = tokio::time::Instant::now() + self.config.connection_timeout();

        let link = match guarded(scanner.connect(device_id), deadline, &attempt).await {
            Ok(link) => link,
            Err(e) => return Err(self.fail_attempt(&record, e).await),
        };

        let prepared = match guarded(prepare_link(&*link, &descriptor), deadline, &attempt).await {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Err(de) = link.disconnect().await {
                    tracing::debug!("Disconnect after failed setup of {}: {}", device_id, de);
                }
                return Err(self.fail_attempt(&record, e).await);
            }
        };

        let mut rec = record.lock().await;

        // Cancelled between setup and commit
        if attempt.is_cancelled() {
            drop(rec);
            if let Err(e) = link.disconnect().await {
                tracing::debug!("Disconnect after cancelled connect of {}: {}", device_id, e);
            }
            return Err(self.fail_attempt(&record, ConnectError::Cancelled).await);
        }

        rec.transition(ConnectionState::Connected)?;
        let descriptor = descriptor.with_device_info(prepared.device_info);
        rec.info.descriptor = descriptor.clone();
        rec.info.subscriptions = prepared.subscriptions;
        rec.info.features = prepared.features;
        rec.link = Some(Arc::clone(&link));

        rec.pump = Some(tokio::spawn(pump_notifications(
            device_id.to_string(),
            prepared.notifications,
            Arc::clone(&record),
            Arc::clone(&self.pipeline),
            attempt,
        )));

        self.pipeline.publish_connection_status(device_id, true);
        drop(rec);

        self.discovered
            .write()
            .await
            .insert(device_id.to_string(), descriptor.clone());

        tracing::info!("Connected to sensor: {}", device_id);
        Ok(descriptor)
    }

    async fn fail_attempt(
        &self,
        record: &Arc<Mutex<ConnectionRecord>>,
        error: ConnectError,
    ) -> ConnectError {
        let mut rec = record.lock().await;
        tracing::warn!("Connection to {} failed: {}", rec.device_id(), error);

        if rec.transition(ConnectionState::Failed).is_ok() {
            rec.link = None;
            rec.cancel = None;
            rec.info.subscriptions.clear();
            self.pipeline
                .publish_connection_status(rec.device_id(), false);
        }
        error
    }

    /// Disconnect from a peripheral.
    ///
    /// Idempotent: an id that is not connected is left alone and no status is
    /// emitted. A running connect attempt is cancelled instead and ends
    /// `Failed`. Returns whether a connection was closed.
    pub async fn disconnect(&self, device_id: &str) -> bool {
        let Some(record) = self.record(device_id).await else {
            return false;
        };

        let mut rec = record.lock().await;
        match rec.info.state {
            ConnectionState::Connected => {}
            ConnectionState::Connecting => {
                tracing::info!("Cancelling connection attempt to {}", device_id);
                if let Some(cancel) = &rec.cancel {
                    cancel.cancel();
                }
                return false;
            }
            _ => return false,
        }

        tracing::info!("Disconnecting from sensor: {}", device_id);

        if let Some(cancel) = rec.cancel.take() {
            cancel.cancel();
        }

        if let Some(link) = rec.link.take() {
            for characteristic in rec.info.subscriptions.drain(..) {
                if let Err(e) = link.unsubscribe(characteristic).await {
                    tracing::debug!("Unsubscribe {} on {}: {}", characteristic, device_id, e);
                }
            }
            if let Err(e) = link.disconnect().await {
                tracing::warn!("Disconnect of {} reported: {}", device_id, e);
            }
        }

        if let Err(e) = rec.transition(ConnectionState::Disconnected) {
            tracing::error!("{}", e);
            return false;
        }
        self.pipeline.publish_connection_status(device_id, false);

        let pump = rec.pump.take();
        drop(rec);

        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                tracing::warn!("Notification task for {} ended abnormally: {}", device_id, e);
            }
        }

        true
    }

    /// Disconnect every connected peripheral and cancel running attempts.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        for id in ids {
            self.disconnect(&id).await;
        }
    }

    /// Write a control point command to a connected trainer.
    pub async fn send_control_command(
        &self,
        device_id: &str,
        command: ControlCommand,
    ) -> Result<(), CommandError> {
        let record = self
            .record(device_id)
            .await
            .ok_or_else(|| CommandError::NotConnected(device_id.to_string()))?;

        let link = {
            let rec = record.lock().await;
            match (&rec.link, rec.info.state) {
                (Some(link), ConnectionState::Connected) => Arc::clone(link),
                _ => return Err(CommandError::NotConnected(device_id.to_string())),
            }
        };

        if !link.has_characteristic(FTMS_CONTROL_POINT_UUID) {
            return Err(CommandError::NoControlPoint(device_id.to_string()));
        }

        let bytes = encode_control_command(&command);
        link.write(FTMS_CONTROL_POINT_UUID, &bytes).await?;

        tracing::debug!("Sent {:?} to {}", command, device_id);
        Ok(())
    }

    /// Current state of `device_id`, if the registry knows it.
    pub async fn connection_state(&self, device_id: &str) -> Option<ConnectionState> {
        let record = self.record(device_id).await?;
        let state = record.lock().await.info.state;
        Some(state)
    }

    pub async fn connection_info(&self, device_id: &str) -> Option<ConnectionInfo> {
        let record = self.record(device_id).await?;
        let info = record.lock().await.info.clone();
        Some(info)
    }

    /// Discovered peripherals, strongest signal first.
    pub async fn discovered(&self) -> Vec<PeripheralDescriptor> {
        let mut list: Vec<_> = self.discovered.read().await.values().cloned().collect();
        sort_by_signal(&mut list);
        list
    }

    /// Entries currently `Connected`.
    pub async fn connected(&self) -> Vec<ConnectionInfo> {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut connected = Vec::new();
        for record in records {
            let rec = record.lock().await;
            if rec.info.state == ConnectionState::Connected {
                connected.push(rec.info.clone());
            }
        }
        connected.sort_by(|a, b| a.descriptor.device_id.cmp(&b.descriptor.device_id));
        connected
    }
}

/// Collapse repeated sightings of an id to the strongest one, strongest
/// first.
pub fn dedup_by_signal(found: Vec<PeripheralDescriptor>) -> Vec<PeripheralDescriptor> {
    let mut by_id: HashMap<String, PeripheralDescriptor> = HashMap::new();
    for descriptor in found {
        match by_id.get(&descriptor.device_id) {
            Some(existing) if !descriptor.is_stronger_than(existing) => {}
            _ => {
                by_id.insert(descriptor.device_id.clone(), descriptor);
            }
        }
    }
    let mut list: Vec<_> = by_id.into_values().collect();
    sort_by_signal(&mut list);
    list
}

fn sort_by_signal(list: &mut [PeripheralDescriptor]) {
    list.sort_by(|a, b| {
        b.signal_strength
            .cmp(&a.signal_strength)
            .then_with(|| a.device_id.cmp(&b.device_id))
    });
}

/// Run `fut` until it finishes, `deadline` passes or `cancel` fires.
async fn guarded<T>(
    fut: impl Future<Output = Result<T, ConnectError>>,
    deadline: tokio::time::Instant,
    cancel: &CancellationToken,
) -> Result<T, ConnectError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
        r = tokio::time::timeout_at(deadline, fut) => r.unwrap_or(Err(ConnectError::Timeout)),
    }
}

/// Subscribe and read everything a new link needs before it counts as
/// connected.
async fn prepare_link(
    link: &dyn PeripheralLink,
    descriptor: &PeripheralDescriptor,
) -> Result<PreparedLink, ConnectError> {
    let measurement = descriptor.protocol.measurement_characteristic();
    if !link.has_characteristic(measurement) {
        return Err(ConnectError::NoMeasurementCharacteristic(
            descriptor.device_id.clone(),
        ));
    }

    let mut subscriptions = Vec::new();
    link.subscribe(measurement).await?;
    subscriptions.push(measurement);
    tracing::debug!("Subscribed to characteristic: {}", measurement);

    let mut features = None;
    if descriptor.protocol == Protocol::BleFtms {
        if link.has_characteristic(FTMS_CONTROL_POINT_UUID) {
            link.subscribe(FTMS_CONTROL_POINT_UUID).await?;
            subscriptions.push(FTMS_CONTROL_POINT_UUID);
        }
        if link.has_characteristic(FTMS_FEATURE_UUID) {
            let bytes = link.read(FTMS_FEATURE_UUID).await?;
            match decode_fitness_machine_feature(&bytes) {
                Ok(set) => features = Some(set),
                Err(e) => tracing::warn!(
                    "Unreadable feature set from {}: {}",
                    descriptor.device_id,
                    e
                ),
            }
        }
    }

    let device_info = read_device_info(link).await?;
    let notifications = link.notifications().await?;

    Ok(PreparedLink {
        subscriptions,
        features,
        device_info,
        notifications,
    })
}

async fn read_string(
    link: &dyn PeripheralLink,
    characteristic: Uuid,
) -> Result<Option<String>, TransportError> {
    if !link.has_characteristic(characteristic) {
        return Ok(None);
    }
    let value = decode_device_info_string(&link.read(characteristic).await?);
    Ok((!value.is_empty()).then_some(value))
}

async fn read_device_info(link: &dyn PeripheralLink) -> Result<DeviceInfo, TransportError> {
    Ok(DeviceInfo {
        manufacturer: read_string(link, MANUFACTURER_NAME_UUID).await?,
        model_number: read_string(link, MODEL_NUMBER_UUID).await?,
        serial_number: read_string(link, SERIAL_NUMBER_UUID).await?,
        firmware_revision: read_string(link, FIRMWARE_REVISION_UUID).await?,
        machine_type: link
            .has_characteristic(INDOOR_BIKE_DATA_UUID)
            .then_some(FitnessMachineType::IndoorBike),
    })
}

/// Decode one notification into a sample. `Ok(None)` for characteristics
/// that carry no telemetry.
fn decode_notification(
    device_id: &str,
    notification: &Notification,
    features: Option<&FeatureSet>,
) -> Result<Option<TelemetrySample>, DecodeError> {
    let value = &notification.value;
    let sample = match notification.characteristic {
        c if c == INDOOR_BIKE_DATA_UUID => {
            let data = decode_indoor_bike_data(value)?;
            if let Some(features) = features {
                let undeclared = features.undeclared_fields(data.flags);
                if !undeclared.is_empty() {
                    tracing::debug!("{} sent undeclared fields {:?}", device_id, undeclared);
                }
            }
            TelemetrySample::from_indoor_bike_data(device_id, &data)
        }
        c if c == HEART_RATE_MEASUREMENT_UUID => {
            TelemetrySample::from_heart_rate(device_id, &decode_heart_rate_measurement(value)?)
        }
        c if c == CYCLING_POWER_MEASUREMENT_UUID => TelemetrySample::from_cycling_power(
            device_id,
            &decode_cycling_power_measurement(value)?,
        ),
        c if c == FTMS_CONTROL_POINT_UUID => {
            let response = decode_control_point_response(value)?;
            if response.is_success() {
                tracing::debug!(
                    "{} accepted control opcode {:#04x}",
                    device_id,
                    response.request_opcode
                );
            } else {
                tracing::warn!(
                    "{} rejected control opcode {:#04x}: {:?}",
                    device_id,
                    response.request_opcode,
                    response.result
                );
            }
            return Ok(None);
        }
        other => {
            tracing::trace!("{}: ignoring notification on {}", device_id, other);
            return Ok(None);
        }
    };
    Ok(Some(sample))
}

/// Forward notifications of one peripheral to the pipeline until the link
/// drops or `cancel` fires.
async fn pump_notifications(
    device_id: String,
    mut notifications: NotificationStream,
    record: Arc<Mutex<ConnectionRecord>>,
    pipeline: Arc<MetricsPipeline>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            n = notifications.next() => n,
        };

        let Some(notification) = notification else {
            break;
        };

        let mut rec = record.lock().await;
        if rec.info.state != ConnectionState::Connected || cancel.is_cancelled() {
            return;
        }
        rec.info.last_notification_at = Some(Utc::now());

        match decode_notification(&device_id, &notification, rec.info.features.as_ref()) {
            Ok(Some(sample)) => {
                rec.info.last_sample = Some(sample.clone());
                pipeline.publish_sample(sample);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                "Dropping notification from {} ({} bytes): {}",
                device_id,
                notification.value.len(),
                e
            ),
        }
    }

    // Stream ended without a disconnect request: the link dropped.
    let mut rec = record.lock().await;
    if rec.info.state == ConnectionState::Connected && !cancel.is_cancelled() {
        tracing::warn!("Notification stream of {} ended", device_id);
        if rec.transition(ConnectionState::Failed).is_ok() {
            rec.link = None;
            rec.cancel = None;
            rec.pump = None;
            rec.info.subscriptions.clear();
            pipeline.publish_connection_status(&device_id, false);
        }
    }
}
