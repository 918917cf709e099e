//! Thread-safe time-series store
//!
//! One fixed-capacity ring buffer per signal name. The capture thread appends,
//! any number of consumer threads copy out time windows.
//!
//! # Locking
//!
//! - The signal map sits behind a `RwLock`. Appends to an already registered
//!   signal only take the shared side; the exclusive side is taken once per
//!   signal, on first sighting, and by [`TimeSeriesStore::clear`].
//! - Each ring has its own `Mutex`. A reader holds it for a binary search plus
//!   the copy of the requested window, never for the whole ring and never
//!   while the caller renders or serializes the result.
//! - The store-wide latest timestamp is an `AtomicU64` holding `f64` bits.

use crate::types::StoreError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default ring capacity per signal
pub const DEFAULT_BUFFER_CAPACITY: usize = 50_000;

/// Bit pattern meaning "no sample yet" (a NaN never produced by `f64::to_bits`
/// of a finite timestamp)
const NO_TIMESTAMP: u64 = u64::MAX;

/// Caller-owned copy of a signal's samples inside a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalSeries {
    /// Session-relative timestamps, ascending
    pub timestamps: Vec<f64>,
    /// Physical values, index-aligned with `timestamps`
    pub values: Vec<f64>,
}

impl SignalSeries {
    /// Number of samples in the series
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True if the series holds no samples
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Minimum and maximum value, for manual Y-range management
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values.iter().fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Most recent sample, if any
    pub fn last(&self) -> Option<(f64, f64)> {
        Some((*self.timestamps.last()?, *self.values.last()?))
    }
}

/// Fixed-capacity ring of (timestamp, value) pairs
///
/// Storage is allocated once at registration; pushes only overwrite slots.
#[derive(Debug)]
struct SignalBuffer {
    times: Vec<f64>,
    values: Vec<f64>,
    /// Next write position
    head: usize,
    /// Number of valid samples
    len: usize,
}

impl SignalBuffer {
    fn with_capacity(signal: &str, capacity: usize) -> Result<Self, StoreError> {
        let alloc_error = || StoreError::Allocation {
            signal: signal.to_string(),
            capacity,
        };

        let mut times = Vec::new();
        times.try_reserve_exact(capacity).map_err(|_| alloc_error())?;
        times.resize(capacity, 0.0);

        let mut values = Vec::new();
        values.try_reserve_exact(capacity).map_err(|_| alloc_error())?;
        values.resize(capacity, 0.0);

        Ok(Self {
            times,
            values,
            head: 0,
            len: 0,
        })
    }

    fn capacity(&self) -> usize {
        self.times.len()
    }

    /// Physical index of the oldest sample
    fn oldest(&self) -> usize {
        if self.len < self.capacity() {
            0
        } else {
            self.head
        }
    }

    fn physical(&self, logical: usize) -> usize {
        (self.oldest() + logical) % self.capacity()
    }

    fn newest_timestamp(&self) -> Option<f64> {
        if self.len == 0 {
            None
        } else {
            Some(self.times[self.physical(self.len - 1)])
        }
    }

    /// Append a sample, returning the timestamp actually stored
    ///
    /// Timestamps older than the newest sample are clamped so the ring stays
    /// sorted.
    fn push(&mut self, timestamp: f64, value: f64) -> f64 {
        let timestamp = match self.newest_timestamp() {
            Some(newest) if timestamp < newest => newest,
            _ => timestamp,
        };

        let capacity = self.capacity();
        self.times[self.head] = timestamp;
        self.values[self.head] = value;
        self.head = (self.head + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
        timestamp
    }

    /// First logical index for which `pred` is false (binary search)
    fn partition_point(&self, pred: impl Fn(f64) -> bool) -> usize {
        let (mut lo, mut hi) = (0, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.times[self.physical(mid)]) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Copy every sample with `start <= t <= end`
    fn window(&self, start: f64, end: f64) -> SignalSeries {
        let lo = self.partition_point(|t| t < start);
        let hi = self.partition_point(|t| t <= end);
        if hi <= lo {
            return SignalSeries::default();
        }

        let count = hi - lo;
        let mut series = SignalSeries {
            timestamps: Vec::with_capacity(count),
            values: Vec::with_capacity(count),
        };

        // At most two contiguous runs: up to the end of storage, then from 0
        let first = self.physical(lo);
        let first_run = count.min(self.capacity() - first);
        series
            .timestamps
            .extend_from_slice(&self.times[first..first + first_run]);
        series
            .values
            .extend_from_slice(&self.values[first..first + first_run]);

        let rest = count - first_run;
        if rest > 0 {
            series.timestamps.extend_from_slice(&self.times[..rest]);
            series.values.extend_from_slice(&self.values[..rest]);
        }
        series
    }
}

/// Thread-safe map of signal name to ring buffer
pub struct TimeSeriesStore {
    buffers: RwLock<HashMap<String, Arc<Mutex<SignalBuffer>>>>,
    capacity: usize,
    latest: AtomicU64,
}

impl TimeSeriesStore {
    /// Create a store whose rings hold `capacity` samples each
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            log::warn!("Buffer capacity 0 requested, using 1");
        }
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            latest: AtomicU64::new(NO_TIMESTAMP),
        }
    }

    /// Ring capacity per signal
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one sample to a signal's ring
    ///
    /// Registers the signal on first sighting. Non-finite timestamps are
    /// dropped. The only error is failure to allocate a new ring.
    pub fn append(&self, signal_name: &str, timestamp: f64, value: f64) -> Result<(), StoreError> {
        if !timestamp.is_finite() {
            log::trace!("Dropping sample for '{}' with non-finite timestamp", signal_name);
            return Ok(());
        }

        let buffer = self.buffer_for(signal_name)?;
        let stored = buffer.lock().push(timestamp, value);
        self.advance_latest(stored);
        Ok(())
    }

    fn buffer_for(&self, signal_name: &str) -> Result<Arc<Mutex<SignalBuffer>>, StoreError> {
        if let Some(buffer) = self.buffers.read().get(signal_name) {
            return Ok(Arc::clone(buffer));
        }

        let mut buffers = self.buffers.write();
        // Another writer may have registered it between the two locks
        if let Some(buffer) = buffers.get(signal_name) {
            return Ok(Arc::clone(buffer));
        }

        let buffer = Arc::new(Mutex::new(SignalBuffer::with_capacity(
            signal_name,
            self.capacity,
        )?));
        buffers.insert(signal_name.to_string(), Arc::clone(&buffer));
        log::debug!("Registered signal buffer '{}' ({} samples)", signal_name, self.capacity);
        Ok(buffer)
    }

    fn advance_latest(&self, timestamp: f64) {
        let _ = self
            .latest
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                if bits == NO_TIMESTAMP || timestamp > f64::from_bits(bits) {
                    Some(timestamp.to_bits())
                } else {
                    None
                }
            });
    }

    /// Copy the samples of each named signal that fall in `[window_start, window_end]`
    ///
    /// Every requested name gets an entry. Unknown signals and invalid windows
    /// (`window_start > window_end`, NaN bounds) yield empty series.
    pub fn get_arrays<S: AsRef<str>>(
        &self,
        signal_names: &[S],
        window_start: f64,
        window_end: f64,
    ) -> HashMap<String, SignalSeries> {
        let valid_window = window_start <= window_end;

        signal_names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let series = if valid_window {
                    self.series(name, window_start, window_end)
                        .unwrap_or_default()
                } else {
                    SignalSeries::default()
                };
                (name.to_string(), series)
            })
            .collect()
    }

    /// Copy one signal's window, or `None` if the signal is unknown
    pub fn series(
        &self,
        signal_name: &str,
        window_start: f64,
        window_end: f64,
    ) -> Option<SignalSeries> {
        // The map lock is released before the ring is locked
        let buffer = self.buffers.read().get(signal_name).map(Arc::clone)?;
        let series = buffer.lock().window(window_start, window_end);
        Some(series)
    }

    /// Most recent session-relative timestamp across all signals
    pub fn get_latest_timestamp(&self) -> Option<f64> {
        match self.latest.load(Ordering::Acquire) {
            NO_TIMESTAMP => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Drop all buffers and reset the latest timestamp
    ///
    /// Callers must stop the writer first; an append racing a clear may land
    /// in a buffer that is about to be discarded.
    pub fn clear(&self) {
        self.buffers.write().clear();
        self.latest.store(NO_TIMESTAMP, Ordering::Release);
    }

    /// Sorted names of all registered signals
    pub fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buffers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of samples currently held for a signal
    pub fn len(&self, signal_name: &str) -> usize {
        let buffer = self.buffers.read().get(signal_name).map(Arc::clone);
        match buffer {
            Some(buffer) => {
                let len = buffer.lock().len;
                len
            }
            None => 0,
        }
    }

    /// True if no signal has been registered
    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl std::fmt::Debug for TimeSeriesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesStore")
            .field("capacity", &self.capacity)
            .field("signals", &self.buffers.read().len())
            .field("latest", &self.get_latest_timestamp())
            .finish()
    }
}
