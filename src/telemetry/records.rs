//! In-memory trace records, not yet serialized.
//!
//! One enum case per record shape, so the compiler enforces what the payload
//! of each shape is. Records are created by the emit paths, immutable once
//! created, and consumed exactly once when the writer flushes them.

use std::fmt;

/// Track a record is placed on.
///
/// Host call-site activity sits on the OS thread id; device/queue activity
/// sits on a synthetic `<queueNumber>.1` sub-track so it renders separately
/// from host threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackId {
    HostThread(u64),
    Queue(u32),
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackId::HostThread(tid) => write!(f, "{tid}"),
            TrackId::Queue(queue) => write!(f, "{queue}.1"),
        }
    }
}

/// Lifecycle stage of a device operation, for staged timing expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Queued,
    Submitted,
    Execution,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Queued, Stage::Submitted, Stage::Execution];

    /// Name suffix appended to the operation name for this stage's record.
    pub fn suffix(self) -> &'static str {
        match self {
            Stage::Queued => "(Queued)",
            Stage::Submitted => "(Submitted)",
            Stage::Execution => "(Execution)",
        }
    }

    /// Fixed trace-viewer color name for this stage.
    pub fn color(self) -> &'static str {
        match self {
            Stage::Queued => "thread_state_runnable",
            Stage::Submitted => "cq_build_running",
            Stage::Execution => "thread_state_iowait",
        }
    }
}

/// Argument payload of a metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataArgs {
    /// `{"name":"..."}` — process/thread/track naming.
    Name(String),
    /// `{"sort_index":"N"}` — track ordering hint.
    SortIndex(i64),
    /// `{"start_time":N}` — process-wide start-time marker.
    StartTime(u64),
}

/// One trace record awaiting serialization.
///
/// Times are host-aligned nanoseconds since the engine epoch; the writer
/// converts to microseconds at the wire boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceRecord {
    /// A complete duration event (`"ph":"X"`).
    Duration {
        name: String,
        /// Rendered as `name( tag )`, mirroring host-observed classification.
        tag: Option<String>,
        track: TrackId,
        start_nanos: i64,
        duration_nanos: u64,
        /// Correlatable identifier, emitted as `args.id`.
        link_id: Option<u64>,
        /// Fixed color name (`cname`), used by staged device timing.
        color: Option<&'static str>,
    },
    /// Flow-arrow origin (`"ph":"s"`), at a host submit point.
    FlowStart {
        track: TrackId,
        time_nanos: i64,
        link_id: u64,
    },
    /// Flow-arrow target (`"ph":"f"`), at a device execution point.
    FlowFinish {
        track: TrackId,
        time_nanos: i64,
        link_id: u64,
    },
    /// Naming/ordering metadata (`"ph":"M"`).
    Metadata {
        name: &'static str,
        track: TrackId,
        args: MetadataArgs,
    },
}

/// OS thread id of the calling thread via `gettid()`.
pub fn current_tid() -> u64 {
    // SAFETY: SYS_gettid takes no arguments and always succeeds; unsafe is
    // required because syscall() is a raw FFI function with no type checking.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}
