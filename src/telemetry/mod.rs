//! Device telemetry correlation and Chrome Trace Event emission.

pub mod backend;
pub mod clock;
pub mod config;
pub mod engine;
pub mod records;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod writer;

pub use backend::{ClockSample, CompletionHandle, DeviceClockSource, DeviceKey, DeviceTimestamps, PollStatus};
pub use config::TraceConfig;
pub use engine::TelemetryEngine;
pub use stats::{DeviceStats, OperationStats, StatsBucket, StatsReport};
