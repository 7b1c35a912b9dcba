//! Per-device, per-operation execution-time aggregation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;

use crate::telemetry::backend::DeviceKey;

/// Running aggregate for one operation name on one device. Durations are
/// execution-stage nanoseconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsBucket {
    pub call_count: u64,
    pub min_nanos: u64,
    pub max_nanos: u64,
    pub total_nanos: u64,
}

impl Default for StatsBucket {
    fn default() -> Self {
        Self {
            call_count: 0,
            min_nanos: u64::MAX,
            max_nanos: 0,
            total_nanos: 0,
        }
    }
}

impl StatsBucket {
    fn record(&mut self, duration_nanos: u64) {
        self.call_count += 1;
        self.min_nanos = self.min_nanos.min(duration_nanos);
        self.max_nanos = self.max_nanos.max(duration_nanos);
        self.total_nanos += duration_nanos;
    }

    pub fn average_nanos(&self) -> u64 {
        if self.call_count == 0 {
            0
        } else {
            self.total_nanos / self.call_count
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OperationStats {
    pub name: String,
    #[serde(flatten)]
    pub bucket: StatsBucket,
}

#[derive(Debug, Serialize)]
pub struct DeviceStats {
    pub device: DeviceKey,
    pub operations: Vec<OperationStats>,
}

/// Point-in-time stats view plus engine health counters.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub devices: Vec<DeviceStats>,
    /// Devices running with relative-only clock alignment.
    pub degraded_devices: Vec<DeviceKey>,
    pub pending_operations: usize,
    pub dropped_after_retries: u64,
}

/// Accumulates execution durations keyed by device and display name.
///
/// Tagged operations aggregate separately from untagged ones under the key
/// `name( tag )`, matching the name the trace records carry.
#[derive(Default)]
pub struct StatsAggregator {
    buckets: Mutex<BTreeMap<DeviceKey, HashMap<String, StatsBucket>>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, device: DeviceKey, name: &str, tag: Option<&str>, duration_nanos: u64) {
        let key = match tag {
            Some(tag) => format!("{name}( {tag} )"),
            None => name.to_string(),
        };
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .entry(device)
            .or_default()
            .entry(key)
            .or_default()
            .record(duration_nanos);
    }

    /// Copy out every bucket, sorted by device then operation name so report
    /// output is stable across runs.
    pub fn snapshot(&self) -> Vec<DeviceStats> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .iter()
            .map(|(device, ops)| {
                let mut operations: Vec<OperationStats> = ops
                    .iter()
                    .map(|(name, bucket)| OperationStats {
                        name: name.clone(),
                        bucket: *bucket,
                    })
                    .collect();
                operations.sort_by(|a, b| a.name.cmp(&b.name));
                DeviceStats {
                    device: *device,
                    operations,
                }
            })
            .collect()
    }
}
