//! Registry of submitted operations awaiting backend completion.
//!
//! Each tracked submission parks its completion handle here until a drain
//! pass observes it complete, at which point the handle's device timestamps
//! are captured and the handle is dropped, releasing the backend reference
//! exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::telemetry::backend::{CompletionHandle, DeviceKey, DeviceTimestamps, PollStatus};

/// A handle whose poll keeps failing is dropped after this many attempts so
/// a wedged backend object cannot pin the registry forever.
const MAX_POLL_RETRIES: u32 = 3;

/// Host-side description of one tracked submission, captured at submit time.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub name: String,
    pub device: DeviceKey,
    pub queue_number: u32,
    pub sequence: u64,
    pub host_queued_nanos: i64,
    pub tag: Option<String>,
}

struct PendingEntry {
    op: PendingOperation,
    handle: Box<dyn CompletionHandle>,
    poll_failures: u32,
}

/// A drained operation with its device-clock timestamps, ready for record
/// expansion and stats aggregation.
pub struct CompletedOperation {
    pub op: PendingOperation,
    pub timestamps: DeviceTimestamps,
}

/// Holds pending entries across submit and drain calls from any thread.
///
/// Entry order is not meaningful; drains use `swap_remove` and callers must
/// not assume completion ordering follows submission ordering.
#[derive(Default)]
pub struct PendingOperationRegistry {
    entries: Mutex<Vec<PendingEntry>>,
    dropped_after_retries: AtomicU64,
}

impl PendingOperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, op: PendingOperation, handle: Box<dyn CompletionHandle>) {
        self.entries.lock().unwrap().push(PendingEntry {
            op,
            handle,
            poll_failures: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operations abandoned after `MAX_POLL_RETRIES` consecutive poll errors.
    pub fn dropped_after_retries(&self) -> u64 {
        self.dropped_after_retries.load(Ordering::Relaxed)
    }

    /// Poll every pending entry once, removing those that completed (or
    /// exhausted their retries) and returning the completed set.
    ///
    /// The registry lock is held for the whole pass; polls are expected to be
    /// cheap status queries.
    pub fn drain_completed(&self) -> Vec<CompletedOperation> {
        let mut entries = self.entries.lock().unwrap();
        let mut completed = Vec::new();
        let mut index = 0;
        while index < entries.len() {
            match entries[index].handle.poll() {
                Ok(PollStatus::Completed) => {
                    let entry = entries.swap_remove(index);
                    match entry.handle.timestamps() {
                        Ok(timestamps) => completed.push(CompletedOperation {
                            op: entry.op,
                            timestamps,
                        }),
                        Err(err) => {
                            eprintln!(
                                "devtrace: dropping completed operation '{}' (seq {}): \
                                 timestamp query failed ({err})",
                                entry.op.name, entry.op.sequence
                            );
                            self.dropped_after_retries.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    // swap_remove moved a new entry into `index`; revisit it.
                }
                Ok(PollStatus::Pending) => {
                    entries[index].poll_failures = 0;
                    index += 1;
                }
                Err(err) => {
                    entries[index].poll_failures += 1;
                    if entries[index].poll_failures >= MAX_POLL_RETRIES {
                        let entry = entries.swap_remove(index);
                        eprintln!(
                            "devtrace: dropping operation '{}' (seq {}) after {} failed \
                             polls ({err})",
                            entry.op.name, entry.op.sequence, MAX_POLL_RETRIES
                        );
                        self.dropped_after_retries.fetch_add(1, Ordering::Relaxed);
                    } else {
                        index += 1;
                    }
                }
            }
        }
        completed
    }
}
