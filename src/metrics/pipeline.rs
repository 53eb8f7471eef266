//! Metrics event pipeline.
//!
//! Samples from every source (connected peripherals and the simulation
//! generator) go through one [`MetricsPipeline`], which merges them into a
//! [`TelemetrySnapshot`] and fans the snapshot out over a broadcast channel.
//! Connection status changes travel on a second channel.

use crate::metrics::merge::MetricsMerger;
use crate::metrics::snapshot::{TelemetrySample, TelemetrySnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default capacity of each broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A source was connected or disconnected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusEvent {
    pub device_id: String,
    pub connected: bool,
    pub at: DateTime<Utc>,
}

/// Merges samples and publishes snapshots and connection events.
pub struct MetricsPipeline {
    merger: Mutex<MetricsMerger>,
    latest: RwLock<TelemetrySnapshot>,
    statuses: RwLock<HashMap<String, bool>>,
    metrics_tx: broadcast::Sender<TelemetrySnapshot>,
    status_tx: broadcast::Sender<ConnectionStatusEvent>,
}

impl MetricsPipeline {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Pipeline whose channels buffer `capacity` events per slow subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (metrics_tx, _) = broadcast::channel(capacity);
        let (status_tx, _) = broadcast::channel(capacity);

        Self {
            merger: Mutex::new(MetricsMerger::new()),
            latest: RwLock::new(TelemetrySnapshot::invalid()),
            statuses: RwLock::new(HashMap::new()),
            metrics_tx,
            status_tx,
        }
    }

    /// Merge `sample` and publish the resulting snapshot.
    ///
    /// A sample without any field changes nothing and publishes nothing.
    pub fn publish_sample(&self, sample: TelemetrySample) -> TelemetrySnapshot {
        if !sample.has_fields() {
            return self.current_metrics();
        }

        // The merger lock is held across the send so subscribers see
        // snapshots in merge order.
        let mut merger = self.merger.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = merger.apply(&sample);
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();

        tracing::trace!(
            "Metrics from {}: {}W {:.0}rpm {:.1}km/h {}bpm",
            sample.source_id,
            snapshot.power_watts,
            snapshot.cadence_rpm,
            snapshot.speed_kmh,
            snapshot.heart_rate_bpm
        );

        // No subscribers is not an error
        let _ = self.metrics_tx.send(snapshot.clone());
        snapshot
    }

    /// Record and publish a connection status change.
    pub fn publish_connection_status(&self, device_id: &str, connected: bool) {
        self.statuses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.to_string(), connected);

        tracing::debug!(
            "Connection status: {} {}",
            device_id,
            if connected { "connected" } else { "disconnected" }
        );

        let _ = self.status_tx.send(ConnectionStatusEvent {
            device_id: device_id.to_string(),
            connected,
            at: Utc::now(),
        });
    }

    /// Latest merged snapshot, or the invalid snapshot before any data.
    pub fn current_metrics(&self) -> TelemetrySnapshot {
        self.latest.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Last reported status for `device_id`, if it was ever reported.
    pub fn connection_status(&self, device_id: &str) -> Option<bool> {
        self.statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .copied()
    }

    /// Ids whose last reported status is connected.
    pub fn connected_sources(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, connected)| **connected)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<TelemetrySnapshot> {
        self.metrics_tx.subscribe()
    }

    pub fn subscribe_connection_status(&self) -> broadcast::Receiver<ConnectionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Run `handler` for every published snapshot on its own task.
    ///
    /// A handler error is logged and delivery continues. The task ends when
    /// the pipeline is dropped or the returned handle is aborted.
    pub fn on_metrics_updated<F, E>(&self, handler: F) -> JoinHandle<()>
    where
        F: FnMut(&TelemetrySnapshot) -> Result<(), E> + Send + 'static,
        E: Display,
    {
        spawn_handler("metrics", self.subscribe_metrics(), handler)
    }

    /// Run `handler` for every connection status event on its own task.
    pub fn on_connection_status_changed<F, E>(&self, handler: F) -> JoinHandle<()>
    where
        F: FnMut(&ConnectionStatusEvent) -> Result<(), E> + Send + 'static,
        E: Display,
    {
        spawn_handler("connection status", self.subscribe_connection_status(), handler)
    }

    /// Start a new session: forget merged values and publish nothing until
    /// the next sample.
    pub fn reset_session(&self) {
        let mut merger = self.merger.lock().unwrap_or_else(|e| e.into_inner());
        merger.reset();
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = TelemetrySnapshot::invalid();
        tracing::info!("Metrics session reset");
    }
}

impl Default for MetricsPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_handler<T, F, E>(
    channel: &'static str,
    mut rx: broadcast::Receiver<T>,
    mut handler: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: FnMut(&T) -> Result<(), E> + Send + 'static,
    E: Display,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = handler(&event) {
                        tracing::warn!("{} handler failed: {}", channel, e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} handler lagged, skipped {} events", channel, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
