//! Real-time ingest listener
//!
//! The capture thread calls the listener once per received frame. The
//! listener decodes the frame against the catalog and appends every sample to
//! the store. It does no I/O and takes no locks beyond the store's own, so a
//! slow consumer can never stall the transport.
//!
//! Transport faults arrive through [`FrameListener::on_error`]; they are
//! latched on the [`ErrorSurface`] and never propagate past the callback.

use crate::error_surface::ErrorSurface;
use crate::frame_decoder::FrameDecoder;
use crate::signals::SignalCatalog;
use crate::store::TimeSeriesStore;
use crate::types::{CaptureError, FaultKind, RawFrame};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callbacks invoked by the capture subsystem
///
/// Calls for one listener are serialized (never concurrent with each other)
/// but run concurrently with consumer threads.
pub trait FrameListener: Send {
    /// Called for each received frame
    fn on_frame(&mut self, frame: RawFrame);

    /// Called when the transport reports a fault
    fn on_error(&mut self, error: CaptureError);

    /// Called once when the capture loop exits
    fn on_stop(&mut self) {}
}

/// Receives names of signals seen for the first time in this session
pub type DiscoveryCallback = Box<dyn FnMut(Vec<String>) + Send>;

/// Ingest counters, updated by the capture thread and readable anywhere
#[derive(Debug, Default)]
pub struct IngestCounters {
    frames_received: AtomicU64,
    frames_decoded: AtomicU64,
    frames_ignored: AtomicU64,
    samples_appended: AtomicU64,
    decode_errors: AtomicU64,
    faults: AtomicU64,
}

impl IngestCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_ignored: self.frames_ignored.load(Ordering::Relaxed),
            samples_appended: self.samples_appended.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Ingest statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Frames handed to the listener
    pub frames_received: u64,
    /// Frames that produced at least one sample
    pub frames_decoded: u64,
    /// Frames with no decode rule or a non-finite timestamp
    pub frames_ignored: u64,
    /// Samples written to the store
    pub samples_appended: u64,
    /// Signals skipped because the payload was too short
    pub decode_errors: u64,
    /// Faults latched on the error surface
    pub faults: u64,
}

/// Decodes frames into the time-series store
pub struct IngestListener {
    catalog: Arc<SignalCatalog>,
    store: Arc<TimeSeriesStore>,
    errors: Arc<ErrorSurface>,
    counters: Arc<IngestCounters>,
    /// Bus timestamp of the first frame of this session
    session_start: Option<f64>,
    /// Frame IDs already reported as having no decode rule
    no_decode: HashSet<u32>,
    known_signals: HashSet<String>,
    on_new_signals: Option<DiscoveryCallback>,
}

impl IngestListener {
    pub fn new(
        catalog: Arc<SignalCatalog>,
        store: Arc<TimeSeriesStore>,
        errors: Arc<ErrorSurface>,
    ) -> Self {
        Self {
            catalog,
            store,
            errors,
            counters: Arc::new(IngestCounters::default()),
            session_start: None,
            no_decode: HashSet::new(),
            known_signals: HashSet::new(),
            on_new_signals: None,
        }
    }

    /// Builder method: report newly discovered signal names
    pub fn with_discovery(mut self, callback: DiscoveryCallback) -> Self {
        self.on_new_signals = Some(callback);
        self
    }

    /// Builder method: share counters with the caller
    pub fn with_counters(mut self, counters: Arc<IngestCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Handle to this listener's counters
    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    /// Bus timestamp the session clock is anchored to
    pub fn session_start(&self) -> Option<f64> {
        self.session_start
    }
}

impl FrameListener for IngestListener {
    fn on_frame(&mut self, frame: RawFrame) {
        IngestCounters::bump(&self.counters.frames_received, 1);
        if !frame.timestamp.is_finite() {
            log::debug!("Dropping frame 0x{:03X} with non-finite timestamp", frame.id);
            IngestCounters::bump(&self.counters.frames_ignored, 1);
            return;
        }
        let session_start = *self.session_start.get_or_insert(frame.timestamp);

        if !self.catalog.has_frame(frame.id) {
            if self.no_decode.insert(frame.id) {
                log::info!("Cannot decode ID {} (0x{:03X}), skipping", frame.id, frame.id);
            }
            IngestCounters::bump(&self.counters.frames_ignored, 1);
            return;
        }

        let decoder = FrameDecoder::new(&self.catalog);
        let mut decoded = decoder.decode(&frame, session_start);
        let mut appended = 0u64;
        let mut discovered = Vec::new();

        for sample in decoded.by_ref() {
            let name = sample.name();
            if let Err(e) = self
                .store
                .append(name, sample.point.timestamp, sample.point.value)
            {
                log::error!("Failed to store sample: {}", e);
                self.errors.report(FaultKind::Storage, e.to_string());
                IngestCounters::bump(&self.counters.faults, 1);
                continue;
            }
            appended += 1;

            if !self.known_signals.contains(name) {
                self.known_signals.insert(name.to_string());
                discovered.push(name.to_string());
            }
        }

        let skipped = decoded.skipped() as u64;
        if skipped > 0 {
            IngestCounters::bump(&self.counters.decode_errors, skipped);
        }
        if appended > 0 {
            IngestCounters::bump(&self.counters.frames_decoded, 1);
            IngestCounters::bump(&self.counters.samples_appended, appended);
        }

        if !discovered.is_empty() {
            if let Some(callback) = self.on_new_signals.as_mut() {
                callback(discovered);
            }
        }
    }

    fn on_error(&mut self, error: CaptureError) {
        log::error!("CAN bus error in capture thread: {}", error);
        self.errors
            .report(FaultKind::Transport, format!("CAN bus error: {}", error));
        IngestCounters::bump(&self.counters.faults, 1);
    }

    fn on_stop(&mut self) {
        let stats = self.counters.snapshot();
        log::debug!(
            "Ingest stopped: {} frames, {} samples, {} ignored, {} decode errors",
            stats.frames_received,
            stats.samples_appended,
            stats.frames_ignored,
            stats.decode_errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalSpec;
    use std::sync::Mutex;

    fn listener() -> (IngestListener, Arc<TimeSeriesStore>, Arc<ErrorSurface>) {
        let catalog = SignalCatalog::new()
            .with_signal(SignalSpec::new("RPM", 0x100, 0, 16).with_scale(0.25, 0.0))
            .unwrap()
            .with_signal(SignalSpec::new("Throttle", 0x100, 16, 8))
            .unwrap();
        let store = Arc::new(TimeSeriesStore::new(64));
        let errors = Arc::new(ErrorSurface::new());
        let listener =
            IngestListener::new(Arc::new(catalog), Arc::clone(&store), Arc::clone(&errors));
        (listener, store, errors)
    }

    #[test]
    fn test_frames_land_in_store() {
        let (mut listener, store, _) = listener();
        listener.on_frame(RawFrame::new(0x100, vec![0x10, 0x27, 0x20], 5.0));
        listener.on_frame(RawFrame::new(0x100, vec![0x00, 0x00, 0x40], 5.5));

        assert_eq!(listener.session_start(), Some(5.0));
        let rpm = store.series("RPM", 0.0, 1.0).unwrap();
        assert_eq!(rpm.timestamps, vec![0.0, 0.5]);
        assert_eq!(rpm.values, vec![2500.0, 0.0]);
        assert_eq!(store.series("Throttle", 0.0, 1.0).unwrap().values, vec![32.0, 64.0]);
        assert_eq!(store.get_latest_timestamp(), Some(0.5));

        let stats = listener.counters().snapshot();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_decoded, 2);
        assert_eq!(stats.samples_appended, 4);
    }

    #[test]
    fn test_non_finite_first_frame_does_not_anchor_session() {
        let (mut listener, store, _) = listener();
        listener.on_frame(RawFrame::new(0x100, vec![1, 0], f64::NAN));
        listener.on_frame(RawFrame::new(0x100, vec![1, 0], f64::INFINITY));
        for i in 1..=10 {
            listener.on_frame(RawFrame::new(0x100, vec![1, 0], f64::from(i)));
        }

        assert_eq!(listener.session_start(), Some(1.0));
        assert_eq!(store.len("RPM"), 10);
        assert_eq!(store.get_latest_timestamp(), Some(9.0));

        let stats = listener.counters().snapshot();
        assert_eq!(stats.frames_received, 12);
        assert_eq!(stats.frames_ignored, 2);
        assert_eq!(stats.frames_decoded, 10);
    }

    #[test]
    fn test_unknown_ids_ignored() {
        let (mut listener, store, errors) = listener();
        listener.on_frame(RawFrame::new(0x555, vec![1, 2, 3], 1.0));
        listener.on_frame(RawFrame::new(0x555, vec![1, 2, 3], 1.1));

        assert!(store.is_empty());
        assert!(errors.latest().is_none());
        let stats = listener.counters().snapshot();
        assert_eq!(stats.frames_ignored, 2);
        assert_eq!(stats.frames_decoded, 0);
    }

    #[test]
    fn test_short_payload_counted_not_surfaced() {
        let (mut listener, store, errors) = listener();
        // Throttle needs 3 bytes
        listener.on_frame(RawFrame::new(0x100, vec![0x10, 0x27], 1.0));

        assert_eq!(store.len("RPM"), 1);
        assert_eq!(store.len("Throttle"), 0);
        assert!(errors.latest().is_none());
        assert_eq!(listener.counters().snapshot().decode_errors, 1);
    }

    #[test]
    fn test_discovery_reports_new_names_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (listener, _, _) = listener();
        let mut listener = listener.with_discovery(Box::new(move |names| {
            sink.lock().unwrap().push(names);
        }));

        listener.on_frame(RawFrame::new(0x100, vec![0, 0], 0.0));
        listener.on_frame(RawFrame::new(0x100, vec![0, 0, 0], 0.1));
        listener.on_frame(RawFrame::new(0x100, vec![0, 0, 0], 0.2));

        let batches = seen.lock().unwrap().clone();
        assert_eq!(
            batches,
            vec![vec!["RPM".to_string()], vec!["Throttle".to_string()]]
        );
    }

    #[test]
    fn test_error_is_latched() {
        let (mut listener, _, errors) = listener();
        listener.on_error(CaptureError::Disconnected("USB adapter removed".into()));

        let fault = errors.latest().unwrap();
        assert_eq!(fault.kind, FaultKind::Transport);
        assert!(fault.message.contains("USB adapter removed"));
        assert_eq!(listener.counters().snapshot().faults, 1);
    }
}
