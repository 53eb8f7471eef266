//! Metrics module: sample merging and the snapshot event pipeline.

pub mod merge;
pub mod pipeline;
pub mod snapshot;

pub use merge::MetricsMerger;
pub use pipeline::{ConnectionStatusEvent, MetricsPipeline, EVENT_CHANNEL_CAPACITY};
pub use snapshot::{TelemetrySample, TelemetrySnapshot};
