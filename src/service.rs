//! Telemetry service: one handle over backend resolution, the sensor
//! manager, the metrics pipeline and the simulation fallback.
//!
//! Simulation only starts after a real scan or connect attempt came up empty,
//! and a real connection stops it. Each switch between simulated and real
//! telemetry starts a new metrics session.

use crate::metrics::{ConnectionStatusEvent, MetricsPipeline, TelemetrySnapshot};
use crate::sensors::error::{
    CommandError, ConnectError, PlatformUnsupportedError, ScanError,
};
use crate::sensors::ftms::ControlCommand;
use crate::sensors::manager::{ConnectionInfo, SensorManager};
use crate::sensors::platform::{BleScanner, PlatformResolver};
use crate::sensors::simulation::{SimulationGenerator, SIMULATED_DEVICE_ID};
use crate::sensors::types::{DeviceInfo, PeripheralDescriptor};
use crate::storage::config::AppConfig;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Why hardware was not used.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// No backend for the host
    Unsupported(PlatformUnsupportedError),
    /// The scan itself failed
    ScanFailed(ScanError),
    /// The scan completed but heard no fitness peripheral
    NothingFound,
    /// Every candidate failed to connect
    ConnectFailed(Vec<(String, ConnectError)>),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Unsupported(e) => write!(f, "{}", e),
            FallbackReason::ScanFailed(e) => write!(f, "{}", e),
            FallbackReason::NothingFound => write!(f, "no sensors found"),
            FallbackReason::ConnectFailed(errors) => {
                write!(f, "{} sensor(s) failed to connect", errors.len())
            }
        }
    }
}

/// Where telemetry comes from after [`TelemetryService::scan_and_connect`].
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetrySource {
    /// At least one real peripheral is connected
    Hardware(Vec<PeripheralDescriptor>),
    /// Sensors were found but auto-connect is off
    Discovered(Vec<PeripheralDescriptor>),
    /// The simulation generator is running
    Simulated {
        device_info: DeviceInfo,
        reason: FallbackReason,
    },
    /// No hardware and simulation disabled: metrics stay invalid
    Unavailable(FallbackReason),
}

/// Summary answer to "are we connected".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Any source, real or simulated, is live
    pub connected: bool,
    /// The simulated trainer is the live source
    pub simulated: bool,
    /// Ids of live sources
    pub sources: Vec<String>,
}

/// Facade over the telemetry core.
pub struct TelemetryService {
    config: AppConfig,
    manager: SensorManager,
    pipeline: Arc<MetricsPipeline>,
    simulation: SimulationGenerator,
    shutdown: CancellationToken,
}

impl TelemetryService {
    /// Resolve the host backend and build the service.
    pub async fn start(config: AppConfig) -> Self {
        Self::with_resolver(&PlatformResolver::with_default_backends(), config).await
    }

    /// Build the service with a specific resolver.
    pub async fn with_resolver(resolver: &PlatformResolver, config: AppConfig) -> Self {
        let scanner = resolver.resolve().await;
        Self::new(scanner, config)
    }

    /// Build the service over an already resolved scanner, or the error that
    /// prevented resolving one.
    pub fn new(scanner: Result<Arc<dyn BleScanner>, ScanError>, config: AppConfig) -> Self {
        let pipeline = Arc::new(MetricsPipeline::new());
        let manager = SensorManager::new(
            scanner,
            Arc::clone(&pipeline),
            config.sensors.to_sensor_config(),
        );
        let simulation = SimulationGenerator::new(
            config.simulation.to_simulation_config(),
            Arc::clone(&pipeline),
        );

        Self {
            config,
            manager,
            pipeline,
            simulation,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &SensorManager {
        &self.manager
    }

    pub fn pipeline(&self) -> &Arc<MetricsPipeline> {
        &self.pipeline
    }

    /// Scan with the configured discovery timeout.
    pub async fn scan(&self) -> Result<Vec<PeripheralDescriptor>, ScanError> {
        self.manager
            .scan(self.manager.config().discovery_timeout(), &self.shutdown)
            .await
    }

    /// Connect to a discovered peripheral. A running simulation keeps going
    /// until the connection succeeds, then stops and the metrics session is
    /// reset so simulated values do not carry over.
    pub async fn connect(&self, device_id: &str) -> Result<PeripheralDescriptor, ConnectError> {
        let descriptor = self.manager.connect(device_id, &self.shutdown).await?;
        if self.simulation.stop().await {
            self.pipeline.reset_session();
            tracing::info!("Simulation stopped for real connection to {}", device_id);
        }
        Ok(descriptor)
    }

    pub async fn disconnect(&self, device_id: &str) -> bool {
        self.manager.disconnect(device_id).await
    }

    /// Disconnect every peripheral and stop simulation.
    pub async fn disconnect_all(&self) {
        self.manager.disconnect_all().await;
        self.simulation.stop().await;
    }

    pub async fn send_control_command(
        &self,
        device_id: &str,
        command: ControlCommand,
    ) -> Result<(), CommandError> {
        self.manager.send_control_command(device_id, command).await
    }

    /// Scan, connect to every candidate, and fall back to simulation when no
    /// hardware ends up connected.
    pub async fn scan_and_connect(&self) -> TelemetrySource {
        let candidates = match self.scan().await {
            Ok(found) if found.is_empty() => return self.fall_back(FallbackReason::NothingFound).await,
            Ok(found) => found,
            Err(ScanError::Unsupported(e)) => {
                return self.fall_back(FallbackReason::Unsupported(e)).await
            }
            Err(e) => return self.fall_back(FallbackReason::ScanFailed(e)).await,
        };

        if !self.config.sensors.auto_connect {
            return TelemetrySource::Discovered(candidates);
        }

        let mut connected = Vec::new();
        let mut failures = Vec::new();
        for candidate in candidates {
            match self.connect(&candidate.device_id).await {
                Ok(descriptor) => connected.push(descriptor),
                Err(ConnectError::AlreadyConnected(_)) => connected.push(candidate),
                Err(e) => failures.push((candidate.device_id, e)),
            }
        }

        if connected.is_empty() {
            self.fall_back(FallbackReason::ConnectFailed(failures)).await
        } else {
            TelemetrySource::Hardware(connected)
        }
    }

    async fn fall_back(&self, reason: FallbackReason) -> TelemetrySource {
        let live: Vec<PeripheralDescriptor> = self
            .manager
            .connected()
            .await
            .into_iter()
            .map(|info| info.descriptor)
            .collect();
        if !live.is_empty() {
            tracing::info!("No new hardware ({}), keeping {} connected sensor(s)", reason, live.len());
            return TelemetrySource::Hardware(live);
        }

        if !self.config.simulation.enabled {
            tracing::warn!("No hardware telemetry ({}), simulation disabled", reason);
            return TelemetrySource::Unavailable(reason);
        }

        if self.simulation.is_running().await {
            tracing::info!("No hardware telemetry ({}), simulation continues", reason);
        } else {
            tracing::info!("No hardware telemetry ({}), starting simulation", reason);
            self.pipeline.reset_session();
            self.simulation.start().await;
        }
        TelemetrySource::Simulated {
            device_info: DeviceInfo::simulated(),
            reason,
        }
    }

    pub async fn is_simulating(&self) -> bool {
        self.simulation.is_running().await
    }

    /// Latest merged snapshot, never absent.
    pub fn current_metrics(&self) -> TelemetrySnapshot {
        self.pipeline.current_metrics()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let sources = self.pipeline.connected_sources();
        ConnectionStatus {
            connected: !sources.is_empty(),
            simulated: sources.iter().any(|s| s == SIMULATED_DEVICE_ID),
            sources,
        }
    }

    pub async fn connected_devices(&self) -> Vec<ConnectionInfo> {
        self.manager.connected().await
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<TelemetrySnapshot> {
        self.pipeline.subscribe_metrics()
    }

    pub fn subscribe_connection_status(&self) -> broadcast::Receiver<ConnectionStatusEvent> {
        self.pipeline.subscribe_connection_status()
    }

    /// Cancel in-flight scans and connects, then close everything.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down telemetry service");
        self.shutdown.cancel();
        self.disconnect_all().await;
    }
}
