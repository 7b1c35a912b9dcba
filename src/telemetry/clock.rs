//! Per-device clock calibration.
//!
//! The backend's device clock ticks independently of the host wall clock. A
//! calibration is a single (host time, device ticks) reference pair plus a
//! tick-to-nanosecond ratio, taken lazily the first time a device is seen and
//! never revisited. When two threads race to calibrate the same device, the
//! first writer wins and the loser's sample is discarded; both observe one
//! consistent calibration.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::telemetry::backend::{DeviceClockSource, DeviceKey};

/// Maps device-clock ticks to host-aligned nanoseconds for one device.
/// Immutable once created; shared by every pending operation on that device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceClockCalibration {
    /// Host time of the reference sample, in nanos since the engine epoch.
    pub host_reference_nanos: i64,
    /// Device timestamp-counter value at the reference sample.
    pub device_reference_ticks: u64,
    /// Duration of one device tick, in nanoseconds.
    pub nanos_per_tick: f64,
    /// Set when the backend could not provide a reference pair. Durations are
    /// still valid (ticks are assumed to be nanoseconds); absolute start times
    /// must be approximated from host queued time instead.
    pub degraded: bool,
}

impl DeviceClockCalibration {
    /// Translate an absolute device-tick reading into host-aligned nanos
    /// since the engine epoch.
    pub fn to_host_aligned_nanos(&self, ticks: u64) -> i64 {
        let delta_ticks = ticks as i64 - self.device_reference_ticks as i64;
        self.host_reference_nanos + (delta_ticks as f64 * self.nanos_per_tick).round() as i64
    }

    /// Convert a device-tick interval into nanoseconds.
    pub fn ticks_to_nanos(&self, delta_ticks: u64) -> u64 {
        (delta_ticks as f64 * self.nanos_per_tick).round() as u64
    }
}

/// Lazy per-device calibration cache.
///
/// Reads are lock-free on the drain path (`ArcSwap` snapshot); the map is
/// rebuilt under a mutex the first time a device is seen. Clone cost on
/// populate is negligible: the key space is the handful of devices in the
/// system.
pub struct ClockCorrelator {
    epoch: Instant,
    source: Arc<dyn DeviceClockSource>,
    calibrations: ArcSwap<HashMap<DeviceKey, Arc<DeviceClockCalibration>>>,
    populate: Mutex<()>,
}

impl ClockCorrelator {
    pub fn new(epoch: Instant, source: Arc<dyn DeviceClockSource>) -> Self {
        Self {
            epoch,
            source,
            calibrations: ArcSwap::from_pointee(HashMap::new()),
            populate: Mutex::new(()),
        }
    }

    /// Calibration for `device`, obtaining the backend's reference pair on
    /// first use and returning the cached value thereafter. Safe to call
    /// concurrently for the same or different devices.
    pub fn calibrate(&self, device: DeviceKey) -> Arc<DeviceClockCalibration> {
        if let Some(cal) = self.calibrations.load().get(&device) {
            return cal.clone();
        }

        let _guard = self.populate.lock().unwrap();
        // Re-check: another thread may have calibrated while we waited.
        if let Some(cal) = self.calibrations.load().get(&device) {
            return cal.clone();
        }

        let cal = Arc::new(match self.source.clock_sample(device) {
            Some(sample) => DeviceClockCalibration {
                host_reference_nanos: nanos_since(self.epoch, sample.host_time),
                device_reference_ticks: sample.device_ticks,
                nanos_per_tick: sample.nanos_per_tick,
                degraded: false,
            },
            None => {
                eprintln!(
                    "devtrace: no host/device timer sample for device {device}; \
                     absolute times for that device fall back to host queued time"
                );
                DeviceClockCalibration {
                    host_reference_nanos: 0,
                    device_reference_ticks: 0,
                    nanos_per_tick: 1.0,
                    degraded: true,
                }
            }
        });

        let mut next: HashMap<_, _> = (**self.calibrations.load()).clone();
        next.insert(device, cal.clone());
        self.calibrations.store(Arc::new(next));
        cal
    }

    /// Devices whose calibration fell back to relative-only timing, sorted.
    pub fn degraded_devices(&self) -> Vec<DeviceKey> {
        let mut devices: Vec<DeviceKey> = self
            .calibrations
            .load()
            .iter()
            .filter(|(_, cal)| cal.degraded)
            .map(|(device, _)| *device)
            .collect();
        devices.sort();
        devices
    }
}

/// Signed nanoseconds from `epoch` to `t`.
pub(crate) fn nanos_since(epoch: Instant, t: Instant) -> i64 {
    if t >= epoch {
        t.duration_since(epoch).as_nanos() as i64
    } else {
        -(epoch.duration_since(t).as_nanos() as i64)
    }
}
