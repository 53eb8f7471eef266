//! Simulated trainer used when no hardware is available.
//!
//! Produces samples with the same shape as a real FTMS trainer plus heart
//! rate, and publishes them through the same [`MetricsPipeline`], so
//! consumers do not need to know whether a device is real.
//!
//! Output is a pure function of the seed and the tick count. Each tick, with
//! `t` the elapsed seconds and `i = 0.7 + 0.3 sin(t / 30)`:
//!
//! ```text
//! power   = 180 + 50 i + 15 sin(t / 10) + U[-8, 8)    W
//! cadence =  85 + 15 i +  8 cos(t / 12) + U[-3, 3)    rpm
//! speed   =  28 +  8 i +  3 sin(t / 15) + U[-1, 1)    km/h
//! hr      = 135 + 25 i                  + U[-5, 8)    bpm
//! ```
//!
//! All values are clamped at zero and distance integrates speed.

use crate::metrics::{MetricsPipeline, TelemetrySample};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Source id the simulated trainer publishes under.
pub const SIMULATED_DEVICE_ID: &str = "simulated-trainer";

/// Simulation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Time between samples
    pub tick_interval: Duration,
    /// Jitter seed; equal seeds produce equal sequences
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            seed: 0x5EED,
        }
    }
}

/// Deterministic telemetry model. Advancing it does not depend on wall time.
#[derive(Debug, Clone)]
pub struct SimulationModel {
    rng: StdRng,
    tick: Duration,
    elapsed: Duration,
    distance_m: f64,
}

impl SimulationModel {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            tick: config.tick_interval,
            elapsed: Duration::ZERO,
            distance_m: 0.0,
        }
    }

    /// Simulated time covered so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Produce the sample for the current tick and advance by one tick.
    pub fn next_sample(&mut self) -> TelemetrySample {
        let t = self.elapsed.as_secs_f64();
        let intensity = 0.7 + 0.3 * (t / 30.0).sin();

        let power = 180.0 + 50.0 * intensity + 15.0 * (t / 10.0).sin()
            + self.rng.gen_range(-8.0..8.0);
        let cadence = 85.0 + 15.0 * intensity + 8.0 * (t / 12.0).cos()
            + self.rng.gen_range(-3.0..3.0);
        let speed = 28.0 + 8.0 * intensity + 3.0 * (t / 15.0).sin()
            + self.rng.gen_range(-1.0..1.0);
        let heart_rate = 135.0 + 25.0 * intensity + self.rng.gen_range(-5.0..8.0);

        let speed = speed.max(0.0);
        self.distance_m += speed / 3.6 * self.tick.as_secs_f64();

        let sample = TelemetrySample {
            power_watts: Some(power.max(0.0).round() as u16),
            cadence_rpm: Some(cadence.max(0.0) as f32),
            speed_kmh: Some(speed as f32),
            heart_rate_bpm: Some(heart_rate.max(0.0).round() as u16),
            distance_m: Some(self.distance_m),
            elapsed_time: Some(self.elapsed),
            ..TelemetrySample::new(SIMULATED_DEVICE_ID)
        };

        self.elapsed += self.tick;
        sample
    }
}

struct RunningSimulation {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs a [`SimulationModel`] on a background tick loop.
pub struct SimulationGenerator {
    config: SimulationConfig,
    pipeline: Arc<MetricsPipeline>,
    running: Mutex<Option<RunningSimulation>>,
}

impl SimulationGenerator {
    pub fn new(config: SimulationConfig, pipeline: Arc<MetricsPipeline>) -> Self {
        Self {
            config,
            pipeline,
            running: Mutex::new(None),
        }
    }

    /// Start ticking. Reports the simulated trainer as connected. Returns
    /// `false` if already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }

        tracing::info!(
            "Starting simulation (tick {:?}, seed {:#x})",
            self.config.tick_interval,
            self.config.seed
        );

        self.pipeline
            .publish_connection_status(SIMULATED_DEVICE_ID, true);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run(
            SimulationModel::new(&self.config),
            self.config.tick_interval,
            Arc::clone(&self.pipeline),
            cancel.clone(),
        ));

        *running = Some(RunningSimulation { cancel, task });
        true
    }

    /// Stop ticking and wait for the loop to exit. No sample is published
    /// after this returns. Returns `false` if not running.
    pub async fn stop(&self) -> bool {
        let Some(simulation) = self.running.lock().await.take() else {
            return false;
        };

        simulation.cancel.cancel();
        if let Err(e) = simulation.task.await {
            tracing::warn!("Simulation task ended abnormally: {}", e);
        }

        self.pipeline
            .publish_connection_status(SIMULATED_DEVICE_ID, false);
        tracing::info!("Simulation stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn run(
        mut model: SimulationModel,
        tick: Duration,
        pipeline: Arc<MetricsPipeline>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    pipeline.publish_sample(model.next_sample());
                }
            }
        }
    }
}
