//! The engine object owning every telemetry component.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::telemetry::backend::{CompletionHandle, DeviceClockSource, DeviceKey};
use crate::telemetry::clock::{nanos_since, ClockCorrelator};
use crate::telemetry::config::TraceConfig;
use crate::telemetry::records::{current_tid, MetadataArgs, TraceRecord, TrackId};
use crate::telemetry::registry::{PendingOperation, PendingOperationRegistry};
use crate::telemetry::scheduler::{retire, DrainScheduler, RetireContext};
use crate::telemetry::stats::{StatsAggregator, StatsReport};
use crate::telemetry::writer::{ChromeTraceWriter, TRACE_START_TIME_NAME};

/// Host thread sort indices start here so queue tracks sort above them in
/// the viewer.
const HOST_THREAD_SORT_BASE: i64 = 10_000;

/// Correlates device completions with the host timeline and streams Chrome
/// Trace Event records to a file.
///
/// One engine per trace file. All methods take `&self` and are safe to call
/// from any thread; internal failures never reach the caller.
pub struct TelemetryEngine {
    epoch: Instant,
    pid: u32,
    sequence: AtomicU64,
    queue_counter: AtomicU32,
    thread_numbers: Mutex<HashMap<u64, u32>>,
    registry: PendingOperationRegistry,
    correlator: ClockCorrelator,
    stats: StatsAggregator,
    writer: Mutex<ChromeTraceWriter>,
    scheduler: DrainScheduler,
    flow_events: bool,
    stage_expansion: bool,
}

impl TelemetryEngine {
    /// Open the trace file named by `config` and write the header records.
    pub fn new(config: TraceConfig, source: Arc<dyn DeviceClockSource>) -> io::Result<Self> {
        Self::with_epoch(config, source, Instant::now())
    }

    /// As [`new`](Self::new), with a caller-supplied epoch. Timestamps in the
    /// trace are nanoseconds since this instant; sharing it with a test
    /// backend makes emitted times deterministic.
    pub fn with_epoch(
        config: TraceConfig,
        source: Arc<dyn DeviceClockSource>,
        epoch: Instant,
    ) -> io::Result<Self> {
        let pid = std::process::id();
        let writer = ChromeTraceWriter::create(&config.output_path, pid, config.buffer_size)?;
        Self::build(config, source, epoch, pid, writer)
    }

    /// Engine over an arbitrary sink, for in-memory tests.
    pub fn with_sink(
        config: TraceConfig,
        source: Arc<dyn DeviceClockSource>,
        epoch: Instant,
        sink: Box<dyn Write + Send>,
    ) -> io::Result<Self> {
        let pid = std::process::id();
        let writer = ChromeTraceWriter::with_sink(sink, pid, config.buffer_size)?;
        Self::build(config, source, epoch, pid, writer)
    }

    fn build(
        config: TraceConfig,
        source: Arc<dyn DeviceClockSource>,
        epoch: Instant,
        pid: u32,
        mut writer: ChromeTraceWriter,
    ) -> io::Result<Self> {
        let tid = current_tid();
        writer.emit(TraceRecord::Metadata {
            name: "process_name",
            track: TrackId::HostThread(tid),
            args: MetadataArgs::Name(config.process_name.clone()),
        });
        let start_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        writer.emit(TraceRecord::Metadata {
            name: TRACE_START_TIME_NAME,
            track: TrackId::HostThread(tid),
            args: MetadataArgs::StartTime(start_nanos),
        });

        Ok(Self {
            epoch,
            pid,
            sequence: AtomicU64::new(0),
            queue_counter: AtomicU32::new(0),
            thread_numbers: Mutex::new(HashMap::new()),
            registry: PendingOperationRegistry::new(),
            correlator: ClockCorrelator::new(epoch, source),
            stats: StatsAggregator::new(),
            writer: Mutex::new(writer),
            scheduler: DrainScheduler::new(config.min_sequence, config.max_sequence),
            flow_events: config.flow_events,
            stage_expansion: config.stage_expansion,
        })
    }

    /// Process id stamped into every record.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Nanoseconds since the engine epoch. Callers use this to bracket host
    /// calls for [`host_call_logged`](Self::host_call_logged).
    pub fn now_nanos(&self) -> i64 {
        nanos_since(self.epoch, Instant::now())
    }

    /// Assign the next queue number and emit the queue's track metadata.
    pub fn register_queue(&self, _device: DeviceKey, name: &str) -> u32 {
        let queue_number = self.queue_counter.fetch_add(1, Ordering::Relaxed);
        let track = TrackId::Queue(queue_number);
        let mut writer = self.writer.lock().unwrap();
        writer.emit(TraceRecord::Metadata {
            name: "thread_name",
            track,
            args: MetadataArgs::Name(name.to_string()),
        });
        writer.emit(TraceRecord::Metadata {
            name: "thread_sort_index",
            track,
            args: MetadataArgs::SortIndex(queue_number as i64),
        });
        queue_number
    }

    /// Track a freshly submitted backend operation. Hot path: one atomic for
    /// the sequence number, one registry append, no polling and no I/O unless
    /// the submission itself blocks.
    #[allow(clippy::too_many_arguments)]
    pub fn operation_submitted(
        &self,
        name: &str,
        device: DeviceKey,
        queue_number: u32,
        tag: Option<&str>,
        blocking: bool,
        handle: Box<dyn CompletionHandle>,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        if !self.scheduler.should_track(sequence) {
            return sequence;
        }
        self.registry.add(
            PendingOperation {
                name: name.to_string(),
                device,
                queue_number,
                sequence,
                host_queued_nanos: self.now_nanos(),
                tag: tag.map(str::to_string),
            },
            handle,
        );
        if self.scheduler.drain_after_submission(blocking) {
            self.drain();
        }
        sequence
    }

    /// Log a host-side API call as a duration record on the calling thread's
    /// track, with an optional flow-start arrow toward the device execution
    /// that `link` names.
    pub fn host_call_logged(
        &self,
        name: &str,
        tag: Option<&str>,
        link: Option<u64>,
        start_nanos: i64,
        end_nanos: i64,
    ) {
        let tid = current_tid();
        self.ensure_thread_metadata(tid);
        let track = TrackId::HostThread(tid);
        let mut writer = self.writer.lock().unwrap();
        writer.emit(TraceRecord::Duration {
            name: name.to_string(),
            tag: tag.map(str::to_string),
            track,
            start_nanos,
            duration_nanos: end_nanos.saturating_sub(start_nanos).max(0) as u64,
            link_id: link,
            color: None,
        });
        if self.flow_events {
            if let Some(link_id) = link {
                writer.emit(TraceRecord::FlowStart {
                    track,
                    time_nanos: start_nanos,
                    link_id,
                });
            }
        }
    }

    /// The caller just returned from a blocking wait; completions are likely,
    /// so drain now.
    pub fn after_blocking_wait(&self) {
        if self.scheduler.drain_after_blocking_wait() {
            self.drain();
        }
    }

    /// The caller just submitted work; drain only if the submission blocked.
    pub fn after_submission(&self, blocking: bool) {
        if self.scheduler.drain_after_submission(blocking) {
            self.drain();
        }
    }

    /// Drain whatever has completed, then push buffered records to the sink.
    pub fn flush(&self) {
        self.drain();
        self.writer.lock().unwrap().flush();
    }

    /// Point-in-time statistics plus engine health counters.
    pub fn stats_report(&self) -> StatsReport {
        StatsReport {
            devices: self.stats.snapshot(),
            degraded_devices: self.correlator.degraded_devices(),
            pending_operations: self.registry.len(),
            dropped_after_retries: self.registry.dropped_after_retries(),
        }
    }

    fn drain(&self) {
        let completed = self.registry.drain_completed();
        if completed.is_empty() {
            return;
        }
        let ctx = RetireContext {
            correlator: &self.correlator,
            stats: &self.stats,
            writer: &self.writer,
            flow_events: self.flow_events,
            stage_expansion: self.stage_expansion,
        };
        for operation in completed {
            retire(&ctx, operation);
        }
    }

    /// First sighting of a host thread assigns it a display number and emits
    /// its track metadata.
    fn ensure_thread_metadata(&self, tid: u64) {
        let mut numbers = self.thread_numbers.lock().unwrap();
        if numbers.contains_key(&tid) {
            return;
        }
        let thread_number = numbers.len() as u32;
        numbers.insert(tid, thread_number);
        drop(numbers);

        let track = TrackId::HostThread(tid);
        let mut writer = self.writer.lock().unwrap();
        writer.emit(TraceRecord::Metadata {
            name: "thread_name",
            track,
            args: MetadataArgs::Name(format!("Host Thread {tid}")),
        });
        writer.emit(TraceRecord::Metadata {
            name: "thread_sort_index",
            track,
            args: MetadataArgs::SortIndex(thread_number as i64 + HOST_THREAD_SORT_BASE),
        });
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        self.drain();
        self.writer.lock().unwrap().flush();
    }
}
