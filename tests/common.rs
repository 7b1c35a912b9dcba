//! Shared helpers for the integration suites: an in-memory trace sink and a
//! scriptable simulated execution backend.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use devtrace::{
    ClockSample, CompletionHandle, DeviceClockSource, DeviceKey, DeviceTimestamps, PollStatus,
};

/// Sink that appends into a shared buffer so tests can inspect trace output
/// while the engine still owns the writer.
#[derive(Clone)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        (Self(buf.clone()), buf)
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn sink_contents(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}

struct DeviceClock {
    device_ticks_at_epoch: u64,
    nanos_per_tick: f64,
}

struct SimOp {
    timestamps: Option<DeviceTimestamps>,
    failing_polls: u32,
    releases: u32,
}

#[derive(Default)]
struct SimState {
    clocks: HashMap<DeviceKey, DeviceClock>,
    ops: HashMap<u64, SimOp>,
    next_op: u64,
}

/// Simulated execution backend with controllable completion order and
/// per-handle release counting.
///
/// Timestamps handed to [`complete`](Self::complete) are device ticks; the
/// per-device clock set via [`set_clock`](Self::set_clock) defines how they
/// map onto host time from the shared epoch. Devices with no clock entry
/// force a degraded calibration.
#[derive(Clone)]
pub struct SimBackend {
    epoch: Instant,
    state: Arc<Mutex<SimState>>,
}

impl SimBackend {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    pub fn set_clock(&self, device: DeviceKey, device_ticks_at_epoch: u64, nanos_per_tick: f64) {
        self.state.lock().unwrap().clocks.insert(
            device,
            DeviceClock {
                device_ticks_at_epoch,
                nanos_per_tick,
            },
        );
    }

    /// Start a new backend operation; returns its id and the completion
    /// handle to hand to the engine.
    pub fn submit(&self) -> (u64, Box<dyn CompletionHandle>) {
        let mut state = self.state.lock().unwrap();
        let op_id = state.next_op;
        state.next_op += 1;
        state.ops.insert(
            op_id,
            SimOp {
                timestamps: None,
                failing_polls: 0,
                releases: 0,
            },
        );
        (
            op_id,
            Box::new(SimHandle {
                state: self.state.clone(),
                op_id,
            }),
        )
    }

    /// Mark an operation complete with the given device-tick timestamps.
    pub fn complete(&self, op_id: u64, timestamps: DeviceTimestamps) {
        self.state
            .lock()
            .unwrap()
            .ops
            .get_mut(&op_id)
            .unwrap()
            .timestamps = Some(timestamps);
    }

    /// Make the next `count` polls of this operation return an error.
    pub fn fail_polls(&self, op_id: u64, count: u32) {
        self.state
            .lock()
            .unwrap()
            .ops
            .get_mut(&op_id)
            .unwrap()
            .failing_polls = count;
    }

    /// How many times this operation's handle has been dropped. Anything
    /// other than 1 after retirement is a release bug.
    pub fn releases(&self, op_id: u64) -> u32 {
        self.state.lock().unwrap().ops[&op_id].releases
    }

    /// Handles not yet dropped.
    pub fn live_handles(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .ops
            .values()
            .filter(|op| op.releases == 0)
            .count()
    }
}

impl DeviceClockSource for SimBackend {
    fn clock_sample(&self, device: DeviceKey) -> Option<ClockSample> {
        let state = self.state.lock().unwrap();
        state.clocks.get(&device).map(|clock| ClockSample {
            host_time: self.epoch,
            device_ticks: clock.device_ticks_at_epoch,
            nanos_per_tick: clock.nanos_per_tick,
        })
    }
}

struct SimHandle {
    state: Arc<Mutex<SimState>>,
    op_id: u64,
}

impl CompletionHandle for SimHandle {
    fn poll(&mut self) -> io::Result<PollStatus> {
        let mut state = self.state.lock().unwrap();
        let op = state.ops.get_mut(&self.op_id).unwrap();
        if op.failing_polls > 0 {
            op.failing_polls -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "simulated poll error"));
        }
        Ok(match op.timestamps {
            Some(_) => PollStatus::Completed,
            None => PollStatus::Pending,
        })
    }

    fn timestamps(&self) -> io::Result<DeviceTimestamps> {
        self.state.lock().unwrap().ops[&self.op_id]
            .timestamps
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "not complete"))
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(op) = state.ops.get_mut(&self.op_id) {
                op.releases += 1;
            }
        }
    }
}

pub fn timestamps(queued: u64, submitted: u64, started: u64, ended: u64) -> DeviceTimestamps {
    DeviceTimestamps {
        queued_ticks: queued,
        submitted_ticks: submitted,
        started_ticks: started,
        ended_ticks: ended,
    }
}
