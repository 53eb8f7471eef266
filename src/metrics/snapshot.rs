//! Telemetry samples (one per decoded notification or simulation tick) and
//! the merged snapshots published to consumers.

use crate::sensors::ftms::{CyclingPowerData, HeartRateData, IndoorBikeData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Partial telemetry from a single source. Unset fields were not reported.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// Device id (or simulation id) the sample came from
    pub source_id: String,
    /// Monotonic arrival time, used to decide which sample is newer
    pub received_at: Instant,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
    /// Power in watts
    pub power_watts: Option<u16>,
    /// Cadence in RPM
    pub cadence_rpm: Option<f32>,
    /// Speed in km/h
    pub speed_kmh: Option<f32>,
    /// Heart rate in BPM
    pub heart_rate_bpm: Option<u16>,
    /// Cumulative distance in meters
    pub distance_m: Option<f64>,
    /// Device-reported elapsed time
    pub elapsed_time: Option<Duration>,
    /// Total energy in kcal
    pub energy_kcal: Option<u16>,
    /// Trainer resistance level
    pub resistance_level: Option<i16>,
}

impl TelemetrySample {
    /// Empty sample stamped with the current time.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            received_at: Instant::now(),
            captured_at: Utc::now(),
            power_watts: None,
            cadence_rpm: None,
            speed_kmh: None,
            heart_rate_bpm: None,
            distance_m: None,
            elapsed_time: None,
            energy_kcal: None,
            resistance_level: None,
        }
    }

    /// Sample from a decoded Indoor Bike Data notification. Negative power
    /// readings are clamped to zero.
    pub fn from_indoor_bike_data(source_id: impl Into<String>, data: &IndoorBikeData) -> Self {
        Self {
            power_watts: data.power_watts.map(|p| p.max(0) as u16),
            cadence_rpm: data.cadence_rpm,
            speed_kmh: data.speed_kmh,
            heart_rate_bpm: data.heart_rate_bpm.map(u16::from),
            distance_m: data.total_distance_m.map(f64::from),
            elapsed_time: data.elapsed_time_s.map(|s| Duration::from_secs(s.into())),
            energy_kcal: data.energy.map(|e| e.total_kcal),
            resistance_level: data.resistance_level,
            ..Self::new(source_id)
        }
    }

    /// Sample from a decoded Heart Rate Measurement notification.
    pub fn from_heart_rate(source_id: impl Into<String>, data: &HeartRateData) -> Self {
        Self {
            heart_rate_bpm: Some(data.heart_rate_bpm),
            ..Self::new(source_id)
        }
    }

    /// Sample from a decoded Cycling Power Measurement notification.
    pub fn from_cycling_power(source_id: impl Into<String>, data: &CyclingPowerData) -> Self {
        Self {
            power_watts: Some(data.power_watts.max(0) as u16),
            ..Self::new(source_id)
        }
    }

    /// Whether any telemetry field is set.
    pub fn has_fields(&self) -> bool {
        self.power_watts.is_some()
            || self.cadence_rpm.is_some()
            || self.speed_kmh.is_some()
            || self.heart_rate_bpm.is_some()
            || self.distance_m.is_some()
            || self.elapsed_time.is_some()
            || self.energy_kcal.is_some()
            || self.resistance_level.is_some()
    }
}

/// Point-in-time view of the merged telemetry of every connected source.
///
/// The default value is the "no data yet" snapshot: all zeros and
/// `is_valid == false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Power in watts
    pub power_watts: u16,
    /// Cadence in RPM
    pub cadence_rpm: f32,
    /// Speed in km/h
    pub speed_kmh: f32,
    /// Heart rate in BPM
    pub heart_rate_bpm: u16,
    /// Distance in meters, non-decreasing within a session
    pub distance_m: f64,
    /// Elapsed session time
    pub elapsed_time: Duration,
    /// Total energy in kcal
    pub energy_kcal: Option<u16>,
    /// Trainer resistance level
    pub resistance_level: Option<i16>,
    /// Capture time of the newest contributing sample
    pub captured_at: DateTime<Utc>,
    /// `false` only for the "no data yet" snapshot
    pub is_valid: bool,
    /// Sources that contributed at least one field
    pub sources: Vec<String>,
}

impl TelemetrySnapshot {
    /// The explicit "no data yet" snapshot.
    pub fn invalid() -> Self {
        Self::default()
    }
}
