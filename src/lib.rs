#![doc = include_str!("../README.md")]

pub mod telemetry;

pub use telemetry::{
    ClockSample, CompletionHandle, DeviceClockSource, DeviceKey, DeviceTimestamps, PollStatus,
    StatsReport, TelemetryEngine, TraceConfig,
};
