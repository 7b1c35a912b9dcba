//! Drain policy and completed-operation retirement.
//!
//! Drains never run in the hot submit path. They run after a blocking wait
//! (the backend has just quiesced, completions are likely), after a blocking
//! submission, and on explicit flush.

use smallvec::SmallVec;
use std::sync::Mutex;

use crate::telemetry::clock::{ClockCorrelator, DeviceClockCalibration};
use crate::telemetry::records::{Stage, TraceRecord, TrackId};
use crate::telemetry::registry::CompletedOperation;
use crate::telemetry::stats::StatsAggregator;
use crate::telemetry::writer::ChromeTraceWriter;

/// Decides which submissions are tracked and when drains happen.
///
/// The sampling window is a closed sequence-number interval; submissions
/// outside it pass through untouched, with no handle retained.
pub struct DrainScheduler {
    min_sequence: u64,
    max_sequence: u64,
}

impl DrainScheduler {
    pub fn new(min_sequence: u64, max_sequence: u64) -> Self {
        Self {
            min_sequence,
            max_sequence,
        }
    }

    pub fn should_track(&self, sequence: u64) -> bool {
        sequence >= self.min_sequence && sequence <= self.max_sequence
    }

    /// Submissions only trigger a drain when the caller is about to block
    /// anyway; a non-blocking submit must stay out of the drain path.
    pub fn drain_after_submission(&self, blocking: bool) -> bool {
        blocking
    }

    pub fn drain_after_blocking_wait(&self) -> bool {
        true
    }
}

/// Everything a drain pass needs to turn completed operations into trace
/// records and stats.
pub(crate) struct RetireContext<'a> {
    pub correlator: &'a ClockCorrelator,
    pub stats: &'a StatsAggregator,
    pub writer: &'a Mutex<ChromeTraceWriter>,
    pub flow_events: bool,
    pub stage_expansion: bool,
}

/// Retire one completed operation: align its device timestamps to the host
/// timeline, fold the execution duration into the stats, and emit its trace
/// records.
pub(crate) fn retire(ctx: &RetireContext<'_>, completed: CompletedOperation) {
    let CompletedOperation { op, timestamps } = completed;
    let calibration = ctx.correlator.calibrate(op.device);

    let execution_nanos =
        calibration.ticks_to_nanos(timestamps.ended_ticks.saturating_sub(timestamps.started_ticks));
    ctx.stats
        .record(op.device, &op.name, op.tag.as_deref(), execution_nanos);

    let display_name = match &op.tag {
        Some(tag) => format!("{}( {tag} )", op.name),
        None => op.name.clone(),
    };
    let track = TrackId::Queue(op.queue_number);

    let mut records: SmallVec<[TraceRecord; 4]> = SmallVec::new();
    let start = |ticks: u64| stage_start_nanos(&calibration, op.host_queued_nanos, &timestamps, ticks);

    if ctx.stage_expansion {
        for stage in Stage::ALL {
            let (from_ticks, to_ticks) = match stage {
                Stage::Queued => (timestamps.queued_ticks, timestamps.submitted_ticks),
                Stage::Submitted => (timestamps.submitted_ticks, timestamps.started_ticks),
                Stage::Execution => (timestamps.started_ticks, timestamps.ended_ticks),
            };
            records.push(TraceRecord::Duration {
                name: format!("{display_name} {}", stage.suffix()),
                tag: None,
                track,
                start_nanos: start(from_ticks),
                duration_nanos: calibration.ticks_to_nanos(to_ticks.saturating_sub(from_ticks)),
                link_id: Some(op.sequence),
                color: Some(stage.color()),
            });
        }
    } else {
        records.push(TraceRecord::Duration {
            name: display_name,
            tag: None,
            track,
            start_nanos: start(timestamps.started_ticks),
            duration_nanos: execution_nanos,
            link_id: Some(op.sequence),
            color: None,
        });
    }

    if ctx.flow_events {
        records.push(TraceRecord::FlowFinish {
            track,
            time_nanos: start(timestamps.started_ticks),
            link_id: op.sequence,
        });
    }

    ctx.writer.lock().unwrap().emit_all(records);
}

/// Host-timeline start for a device tick value. With a degraded calibration
/// absolute device time is meaningless, so stage starts are anchored to the
/// host submit time plus the tick delta from the queued timestamp.
fn stage_start_nanos(
    calibration: &DeviceClockCalibration,
    host_queued_nanos: i64,
    timestamps: &crate::telemetry::backend::DeviceTimestamps,
    ticks: u64,
) -> i64 {
    if calibration.degraded {
        let offset = calibration.ticks_to_nanos(ticks.saturating_sub(timestamps.queued_ticks));
        host_queued_nanos + offset as i64
    } else {
        calibration.to_host_aligned_nanos(ticks)
    }
}
