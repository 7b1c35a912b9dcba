//! Traits and types at the execution-backend boundary.
//!
//! The backend itself is an external collaborator: it runs submitted
//! operations asynchronously and exposes only a non-blocking completion query
//! plus, once completed, four device-clock timestamps. Everything here is the
//! narrow surface the engine needs from it.

use serde::Serialize;
use std::fmt;
use std::io;
use std::time::Instant;

/// Opaque identifier for the device (or device queue) that executes an
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceKey(u64);

impl Serialize for DeviceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl DeviceKey {
    pub const fn from_u64(val: u64) -> Self {
        DeviceKey(val)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four device-clock timestamps the backend reports for a completed
/// operation, in ticks of the device's own timestamp counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTimestamps {
    pub queued_ticks: u64,
    pub submitted_ticks: u64,
    pub started_ticks: u64,
    pub ended_ticks: u64,
}

/// Result of a non-blocking completion query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Completed,
}

/// Owned reference to the backend's completion object for one submitted
/// operation.
///
/// The pending-operation registry owns the handle exclusively until the
/// operation is drained. Dropping the handle releases the backend's reference
/// exactly once; the registry never retains a handle after yielding its
/// operation.
pub trait CompletionHandle: Send {
    /// Non-blocking completion query. Must never wait for the backend.
    fn poll(&mut self) -> io::Result<PollStatus>;

    /// The operation's device timestamps. Only valid after [`poll`] has
    /// returned [`PollStatus::Completed`].
    ///
    /// [`poll`]: CompletionHandle::poll
    fn timestamps(&self) -> io::Result<DeviceTimestamps>;
}

/// A simultaneous (host, device) clock reading used for calibration.
#[derive(Debug, Clone, Copy)]
pub struct ClockSample {
    /// Host time at which `device_ticks` was read.
    pub host_time: Instant,
    /// Device timestamp-counter value at `host_time`.
    pub device_ticks: u64,
    /// Duration of one device tick, in nanoseconds.
    pub nanos_per_tick: f64,
}

/// Source of per-device calibration samples, implemented by the backend.
pub trait DeviceClockSource: Send + Sync {
    /// Best-effort simultaneous host/device clock reading for `device`.
    ///
    /// Returns `None` when the backend cannot provide one; device durations
    /// remain measurable, but absolute start times degrade to host-side
    /// approximations.
    fn clock_sample(&self, device: DeviceKey) -> Option<ClockSample>;
}
