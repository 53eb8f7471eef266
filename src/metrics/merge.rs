//! Field-level merge of samples from several sources.
//!
//! Each field keeps the value of the newest sample that reported it, so a
//! trainer publishing power/cadence/speed and a strap publishing heart rate
//! combine into one snapshot. An older sample never overwrites a newer field.

use crate::metrics::snapshot::{TelemetrySample, TelemetrySnapshot};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Field<T> {
    value: T,
    at: Instant,
}

fn merge_field<T: Copy>(slot: &mut Option<Field<T>>, incoming: Option<T>, at: Instant) -> bool {
    let Some(value) = incoming else {
        return false;
    };
    match slot {
        Some(current) if current.at > at => false,
        _ => {
            *slot = Some(Field { value, at });
            true
        }
    }
}

fn value_or_default<T: Copy + Default>(slot: &Option<Field<T>>) -> T {
    slot.map(|f| f.value).unwrap_or_default()
}

/// Accumulates samples for one session.
#[derive(Debug, Default)]
pub struct MetricsMerger {
    power: Option<Field<u16>>,
    cadence: Option<Field<f32>>,
    speed: Option<Field<f32>>,
    heart_rate: Option<Field<u16>>,
    elapsed: Option<Field<Duration>>,
    energy: Option<Field<u16>>,
    resistance: Option<Field<i16>>,
    distance_m: Option<f64>,
    session_start: Option<Instant>,
    latest_at: Option<Instant>,
    captured_at: Option<DateTime<Utc>>,
    sources: BTreeSet<String>,
}

impl MetricsMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `sample` and return the resulting snapshot.
    pub fn apply(&mut self, sample: &TelemetrySample) -> TelemetrySnapshot {
        let at = sample.received_at;
        let mut contributed = false;

        contributed |= merge_field(&mut self.power, sample.power_watts, at);
        contributed |= merge_field(&mut self.cadence, sample.cadence_rpm, at);
        contributed |= merge_field(&mut self.speed, sample.speed_kmh, at);
        contributed |= merge_field(&mut self.heart_rate, sample.heart_rate_bpm, at);
        contributed |= merge_field(&mut self.elapsed, sample.elapsed_time, at);
        contributed |= merge_field(&mut self.energy, sample.energy_kcal, at);
        contributed |= merge_field(&mut self.resistance, sample.resistance_level, at);

        // Distance only ever grows within a session.
        if let Some(distance) = sample.distance_m {
            let current = self.distance_m.unwrap_or(0.0);
            self.distance_m = Some(current.max(distance));
            contributed = true;
        }

        if contributed {
            self.sources.insert(sample.source_id.clone());
            self.session_start = Some(self.session_start.map_or(at, |s| s.min(at)));
            self.latest_at = Some(self.latest_at.map_or(at, |l| l.max(at)));
            self.captured_at = Some(
                self.captured_at
                    .map_or(sample.captured_at, |c| c.max(sample.captured_at)),
            );
        }

        self.snapshot()
    }

    /// Current merged snapshot, or the invalid snapshot if nothing has been
    /// merged since the last reset.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let (Some(start), Some(latest)) = (self.session_start, self.latest_at) else {
            return TelemetrySnapshot::invalid();
        };

        let elapsed_time = self
            .elapsed
            .map(|f| f.value)
            .unwrap_or_else(|| latest.saturating_duration_since(start));

        TelemetrySnapshot {
            power_watts: value_or_default(&self.power),
            cadence_rpm: value_or_default(&self.cadence).max(0.0),
            speed_kmh: value_or_default(&self.speed).max(0.0),
            heart_rate_bpm: value_or_default(&self.heart_rate),
            distance_m: self.distance_m.unwrap_or(0.0),
            elapsed_time,
            energy_kcal: self.energy.map(|f| f.value),
            resistance_level: self.resistance.map(|f| f.value),
            captured_at: self.captured_at.unwrap_or_default(),
            is_valid: true,
            sources: self.sources.iter().cloned().collect(),
        }
    }

    /// Forget everything; the next snapshot is invalid until a sample arrives.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
