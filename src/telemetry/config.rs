//! Engine configuration.

use std::path::PathBuf;

/// Tunables for a [`TelemetryEngine`](crate::telemetry::engine::TelemetryEngine).
///
/// Defaults match the common case: everything tracked, 1024-record write
/// batches, plain execution records without stage expansion or flow arrows.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Destination trace file.
    pub output_path: PathBuf,
    /// Records held before a batched write. 0 disables batching.
    pub buffer_size: usize,
    /// Emit flow start/finish arrows linking host calls to device execution.
    pub flow_events: bool,
    /// Expand each device operation into Queued/Submitted/Execution records.
    pub stage_expansion: bool,
    /// First sequence number that is tracked.
    pub min_sequence: u64,
    /// Last sequence number that is tracked.
    pub max_sequence: u64,
    /// Process name shown in the trace viewer.
    pub process_name: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("trace.json"),
            buffer_size: 1024,
            flow_events: false,
            stage_expansion: false,
            min_sequence: 0,
            max_sequence: u64::MAX,
            process_name: "devtrace".to_string(),
        }
    }
}
