//! Snapshot reader and windowing math
//!
//! The consumer side of the store: compute the visible time window from the
//! store's latest timestamp and copy every selected signal out of it. Nothing
//! here holds a lock of its own; the only locking happens inside
//! [`TimeSeriesStore::get_arrays`].
//!
//! [`PeriodicSnapshot`] drives a reader on a fixed cadence from a dedicated
//! thread, for consumers that have no event loop of their own.

use crate::store::{SignalSeries, TimeSeriesStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Refresh rate presets offered to users (Hz)
pub const REFRESH_RATES_HZ: [u32; 4] = [5, 10, 20, 30];

/// Default refresh rate (Hz)
pub const DEFAULT_REFRESH_HZ: u32 = 30;

/// Visible portion of each signal's history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeWindow {
    /// The last N seconds up to the latest sample
    Trailing(f64),
    /// Everything still held by the rings
    All,
}

impl TimeWindow {
    /// Window presets offered to users
    pub const PRESETS: [TimeWindow; 6] = [
        TimeWindow::Trailing(10.0),
        TimeWindow::Trailing(30.0),
        TimeWindow::Trailing(60.0),
        TimeWindow::Trailing(120.0),
        TimeWindow::Trailing(300.0),
        TimeWindow::All,
    ];

    /// Window length in seconds, `None` for [`TimeWindow::All`]
    pub fn seconds(&self) -> Option<f64> {
        match self {
            TimeWindow::Trailing(seconds) => Some(*seconds),
            TimeWindow::All => None,
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        TimeWindow::Trailing(30.0)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::Trailing(seconds) => write!(f, "{}s", seconds),
            TimeWindow::All => write!(f, "all"),
        }
    }
}

/// Error returned when a window string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time window '{0}' (expected e.g. \"30s\", \"30\" or \"all\")")]
pub struct ParseWindowError(String);

impl FromStr for TimeWindow {
    type Err = ParseWindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(TimeWindow::All);
        }

        let number = trimmed.strip_suffix('s').unwrap_or(trimmed);
        match number.trim().parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds > 0.0 => {
                Ok(TimeWindow::Trailing(seconds))
            }
            _ => Err(ParseWindowError(s.to_string())),
        }
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = ParseWindowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeWindow> for String {
    fn from(window: TimeWindow) -> Self {
        window.to_string()
    }
}

/// Compute `(window_start, window_end)` for the latest store timestamp
///
/// Returns `None` while the store is empty.
pub fn window_bounds(window: TimeWindow, latest: Option<f64>) -> Option<(f64, f64)> {
    let end = latest?;
    let start = match window {
        TimeWindow::Trailing(seconds) => (end - seconds).max(0.0),
        TimeWindow::All => 0.0,
    };
    Some((start, end))
}

/// Signals a reader copies out on each snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SignalSelection {
    /// Every signal registered in the store at snapshot time
    #[default]
    All,
    /// A fixed list of names
    Named(Vec<String>),
}

/// One consumer tick worth of data
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Latest store timestamp when the snapshot was taken
    pub latest: Option<f64>,
    pub window_start: f64,
    pub window_end: f64,
    /// Copied series, keyed by signal name
    pub series: BTreeMap<String, SignalSeries>,
}

impl Snapshot {
    /// Combined value range of all series, for a shared Y axis
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.series
            .values()
            .filter_map(SignalSeries::value_range)
            .reduce(|(lo, hi), (l, h)| (lo.min(l), hi.max(h)))
    }
}

/// Copies the visible window of selected signals out of a store
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    store: Arc<TimeSeriesStore>,
    signals: SignalSelection,
    window: TimeWindow,
}

impl SnapshotReader {
    pub fn new(store: Arc<TimeSeriesStore>, signals: SignalSelection, window: TimeWindow) -> Self {
        Self {
            store,
            signals,
            window,
        }
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn set_window(&mut self, window: TimeWindow) {
        self.window = window;
    }

    pub fn set_signals(&mut self, signals: SignalSelection) {
        self.signals = signals;
    }

    /// Take a snapshot of the current window
    ///
    /// An empty store yields a snapshot with no timestamp; every selected
    /// signal is present, with an empty series.
    pub fn snapshot(&self) -> Snapshot {
        let names = match &self.signals {
            SignalSelection::All => self.store.signal_names(),
            SignalSelection::Named(names) => names.clone(),
        };

        let latest = self.store.get_latest_timestamp();
        let Some((window_start, window_end)) = window_bounds(self.window, latest) else {
            return Snapshot {
                latest: None,
                window_start: 0.0,
                window_end: 0.0,
                series: names
                    .into_iter()
                    .map(|name| (name, SignalSeries::default()))
                    .collect(),
            };
        };

        let series = self
            .store
            .get_arrays(names.as_slice(), window_start, window_end)
            .into_iter()
            .collect();

        Snapshot {
            latest,
            window_start,
            window_end,
            series,
        }
    }
}

/// Convert a refresh rate to a tick interval (rates below 1 Hz are raised to 1 Hz)
pub fn refresh_interval(hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(hz.max(1)))
}

/// Runs a [`SnapshotReader`] on a fixed cadence from a dedicated thread
///
/// Ticks never overlap: the consumer runs to completion before the next tick
/// is scheduled, and ticks missed while it ran are dropped rather than queued.
pub struct PeriodicSnapshot {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicSnapshot {
    pub fn spawn<F>(reader: SnapshotReader, interval: Duration, mut consumer: F) -> io::Result<Self>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("snapshot-refresh".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now();
                while !thread_stop.load(Ordering::Acquire) {
                    consumer(reader.snapshot());

                    next_tick += interval;
                    let now = Instant::now();
                    if next_tick <= now {
                        next_tick = now;
                        continue;
                    }
                    // Woken early by stop()
                    thread::park_timeout(next_tick - now);
                }
                log::debug!("Snapshot refresh thread exiting");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop ticking and wait for the in-flight tick to finish
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("Snapshot refresh thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeriodicSnapshot {
    fn drop(&mut self) {
        self.stop();
    }
}
