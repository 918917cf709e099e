//! Capture thread and connection lifecycle
//!
//! [`CaptureThread`] is the notifier loop: it pulls frames from a
//! [`FrameSource`] on its own thread and hands each one to a
//! [`FrameListener`]. [`CaptureSession`] owns the thread together with the
//! shared store, catalog and error surface, and implements start / stop /
//! restart so that the store is only ever cleared once the writer is gone.

use crate::config::StreamConfig;
use crate::error_surface::ErrorSurface;
use crate::ingest::{FrameListener, IngestCounters, IngestListener, IngestStats};
use crate::signals::SignalCatalog;
use crate::store::TimeSeriesStore;
use crate::types::{CaptureError, FaultKind, RawFrame, SessionError};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Outcome of one receive on a frame source
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A frame arrived
    Frame(RawFrame),
    /// Nothing arrived within the timeout
    Timeout,
    /// The source has no more frames (end of log, bus closed cleanly)
    Closed,
}

/// A bus transport delivering raw frames
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame
    fn recv(&mut self, timeout: Duration) -> Result<Received, CaptureError>;

    /// Release the underlying transport
    fn shutdown(&mut self) {}
}

/// Background thread dispatching frames from a source to a listener
///
/// The stop flag is checked between receives: a frame already handed to the
/// listener is fully processed, and nothing is dispatched after the flag is
/// seen.
pub struct CaptureThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    pub fn spawn<S, L>(source: S, listener: L, recv_timeout: Duration) -> io::Result<Self>
    where
        S: FrameSource + 'static,
        L: FrameListener + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("can-capture".to_string())
            .spawn(move || run_capture(source, listener, recv_timeout, &thread_stop))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the loop to exit without waiting for it
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the loop and wait for the in-flight frame to finish
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
    }

    /// True once the loop has exited (stopped, source closed, or faulted)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture<S, L>(mut source: S, mut listener: L, recv_timeout: Duration, stop: &AtomicBool)
where
    S: FrameSource,
    L: FrameListener,
{
    log::debug!("Capture thread started");

    while !stop.load(Ordering::Acquire) {
        match source.recv(recv_timeout) {
            Ok(Received::Frame(frame)) => listener.on_frame(frame),
            Ok(Received::Timeout) => continue,
            Ok(Received::Closed) => {
                log::info!("Frame source closed");
                break;
            }
            Err(e) => {
                listener.on_error(e);
                break;
            }
        }
    }

    listener.on_stop();
    source.shutdown();
    log::debug!("Capture thread exiting");
}

type SharedDiscovery = Arc<dyn Fn(Vec<String>) + Send + Sync>;

/// Connection lifecycle around one shared store
pub struct CaptureSession {
    store: Arc<TimeSeriesStore>,
    errors: Arc<ErrorSurface>,
    catalog: Option<Arc<SignalCatalog>>,
    counters: Arc<IngestCounters>,
    recv_timeout: Duration,
    discovery: Option<SharedDiscovery>,
    capture: Option<CaptureThread>,
}

impl CaptureSession {
    pub fn new(store: Arc<TimeSeriesStore>, errors: Arc<ErrorSurface>) -> Self {
        Self {
            store,
            errors,
            catalog: None,
            counters: Arc::new(IngestCounters::default()),
            recv_timeout: Duration::from_millis(1000),
            discovery: None,
            capture: None,
        }
    }

    /// Create a session with a fresh store sized by the configuration
    pub fn from_config(config: &StreamConfig) -> Self {
        let store = Arc::new(TimeSeriesStore::new(config.buffer_capacity));
        let mut session = Self::new(store, Arc::new(ErrorSurface::new()));
        session.recv_timeout = config.recv_timeout();
        session
    }

    /// Load a DBC file as the session catalog
    ///
    /// Takes effect on the next [`CaptureSession::start`].
    pub fn load_dbc(&mut self, path: &Path) -> Result<(), SessionError> {
        let catalog = SignalCatalog::from_dbc_file(path)?;
        let stats = catalog.stats();
        log::info!(
            "DBC loaded: {:?} ({} frames, {} signals)",
            path,
            stats.num_frames,
            stats.num_signals
        );
        self.catalog = Some(Arc::new(catalog));
        Ok(())
    }

    pub fn set_catalog(&mut self, catalog: Arc<SignalCatalog>) {
        self.catalog = Some(catalog);
    }

    pub fn catalog(&self) -> Option<&Arc<SignalCatalog>> {
        self.catalog.as_ref()
    }

    /// Report signals seen for the first time in each session
    ///
    /// The callback runs on the capture thread and must not block.
    pub fn on_new_signals<F>(&mut self, callback: F)
    where
        F: Fn(Vec<String>) + Send + Sync + 'static,
    {
        self.discovery = Some(Arc::new(callback));
    }

    pub fn set_recv_timeout(&mut self, timeout: Duration) {
        self.recv_timeout = timeout;
    }

    /// Start streaming from a source
    ///
    /// A running capture is stopped first. The store is cleared before the
    /// new writer starts, so readers never see data from the previous
    /// session mixed with the new one.
    pub fn start<S>(&mut self, source: S) -> Result<(), SessionError>
    where
        S: FrameSource + 'static,
    {
        if self.capture.is_some() {
            log::warn!("start() called while already running, stopping first");
            self.stop();
        }

        let Some(catalog) = self.catalog.clone() else {
            self.errors.report(FaultKind::Session, "No catalog loaded");
            return Err(SessionError::NoCatalog);
        };

        // Writer is confirmed stopped at this point
        self.store.clear();
        self.counters = Arc::new(IngestCounters::default());

        let mut listener =
            IngestListener::new(catalog, Arc::clone(&self.store), Arc::clone(&self.errors))
            .with_counters(Arc::clone(&self.counters));
        if let Some(discovery) = &self.discovery {
            let discovery = Arc::clone(discovery);
            listener = listener.with_discovery(Box::new(move |names| discovery(names)));
        }

        let capture = CaptureThread::spawn(source, listener, self.recv_timeout).map_err(|e| {
            log::error!("Failed to start capture: {}", e);
            self.errors
                .report(FaultKind::Session, format!("Failed to start capture: {}", e));
            SessionError::Spawn(e)
        })?;

        self.capture = Some(capture);
        log::info!("CAN capture started");
        Ok(())
    }

    /// Stop streaming
    ///
    /// Safe to call when not running, in which case it does nothing. The
    /// store keeps its contents until the next start.
    pub fn stop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
            log::info!("CAN capture stopped");
        }
    }

    /// True while the capture loop is alive
    ///
    /// Becomes false on its own when the source closes or faults.
    pub fn is_running(&self) -> bool {
        self.capture.as_ref().is_some_and(|c| !c.is_finished())
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub fn errors(&self) -> &Arc<ErrorSurface> {
        &self.errors
    }

    /// Ingest statistics of the current (or last) session
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
