//! RideData - headless telemetry runner
//!
//! Scans for fitness sensors, connects to what it finds (or simulates a
//! trainer) and logs every metrics snapshot until Ctrl-C.

use anyhow::Context;
use ridedata::service::{TelemetryService, TelemetrySource};
use ridedata::storage::config::load_config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideData v{}", env!("CARGO_PKG_VERSION"));

    let service = TelemetryService::start(config).await;

    let metrics_task = service.pipeline().on_metrics_updated(|snapshot| {
        tracing::info!(
            power = snapshot.power_watts,
            cadence = snapshot.cadence_rpm,
            speed = snapshot.speed_kmh,
            heart_rate = snapshot.heart_rate_bpm,
            distance = snapshot.distance_m,
            "metrics"
        );
        Ok::<(), std::convert::Infallible>(())
    });
    let status_task = service.pipeline().on_connection_status_changed(|event| {
        tracing::info!(
            device = %event.device_id,
            connected = event.connected,
            "connection status"
        );
        Ok::<(), std::convert::Infallible>(())
    });

    match service.scan_and_connect().await {
        TelemetrySource::Hardware(devices) => {
            for device in &devices {
                tracing::info!("Streaming from {} ({})", device.name, device.protocol);
            }
        }
        TelemetrySource::Discovered(devices) => {
            tracing::info!("{} sensor(s) found, auto-connect is off", devices.len());
            for device in &devices {
                tracing::info!("  {} [{}] {:?} dBm", device.name, device.device_id, device.signal_strength);
            }
        }
        TelemetrySource::Simulated { device_info, reason } => {
            tracing::info!(
                "Simulating {} ({})",
                device_info.display_name().unwrap_or_default(),
                reason
            );
        }
        TelemetrySource::Unavailable(reason) => {
            tracing::warn!("No telemetry available: {}", reason);
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    service.shutdown().await;
    metrics_task.abort();
    status_task.abort();

    tracing::info!("Stopped");
    Ok(())
}
