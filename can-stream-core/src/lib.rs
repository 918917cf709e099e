//! CAN Stream Core Library
//!
//! Live CAN ingest for real-time plotting: decodes frames arriving on a
//! capture thread into named signals and keeps the recent history of every
//! signal in bounded ring buffers that a separately clocked consumer can copy
//! from without ever stalling the capture side.
//!
//! # Architecture
//!
//! Write path (capture thread):
//! `FrameSource` → [`CaptureThread`] → [`IngestListener`] → [`FrameDecoder`]
//! → [`TimeSeriesStore::append`]
//!
//! Read path (consumer clock):
//! [`SnapshotReader`] → [`TimeSeriesStore::get_arrays`]
//!
//! The two paths share nothing but the store. Transport faults are latched on
//! an [`ErrorSurface`] for the UI to poll.
//!
//! The library does NOT:
//! - Render or plot anything
//! - Enumerate or open CAN hardware (sources are supplied by the caller)
//! - Record frames to disk
//!
//! # Example Usage
//!
//! ```no_run
//! use can_stream_core::{
//!     CaptureSession, SignalSelection, SnapshotReader, StreamConfig, TimeWindow,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # use can_stream_core::{CaptureError, FrameSource, Received};
//! # struct Bus;
//! # impl FrameSource for Bus {
//! #     fn recv(&mut self, _: std::time::Duration) -> Result<Received, CaptureError> {
//! #         Ok(Received::Closed)
//! #     }
//! # }
//! let config = StreamConfig::new().with_window(TimeWindow::Trailing(30.0));
//! let mut session = CaptureSession::from_config(&config);
//! session.load_dbc(Path::new("powertrain.dbc")).unwrap();
//! session.start(Bus).unwrap();
//!
//! let reader = SnapshotReader::new(
//!     Arc::clone(session.store()),
//!     SignalSelection::Named(vec!["EngineSpeed".into()]),
//!     config.window,
//! );
//! let snapshot = reader.snapshot();
//! if let Some(series) = snapshot.series.get("EngineSpeed") {
//!     println!("{} samples in view", series.len());
//! }
//! ```

// Public modules
pub mod capture;
pub mod config;
pub mod error_surface;
pub mod frame_decoder;
pub mod ingest;
pub mod signals;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use capture::{CaptureSession, CaptureThread, FrameSource, Received};
pub use config::StreamConfig;
pub use error_surface::{CaptureFault, ErrorSurface};
pub use frame_decoder::{DecodedSample, FrameDecoder};
pub use ingest::{FrameListener, IngestListener, IngestStats};
pub use signals::{ByteOrder, CatalogStats, Multiplexing, SignalCatalog, SignalSpec, ValueType};
pub use snapshot::{
    window_bounds, PeriodicSnapshot, SignalSelection, Snapshot, SnapshotReader, TimeWindow,
};
pub use store::{SignalSeries, TimeSeriesStore, DEFAULT_BUFFER_CAPACITY};
pub use types::{
    CaptureError, CatalogError, FaultKind, RawFrame, SamplePoint, SessionError, StoreError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty catalog and store are usable
        let catalog = SignalCatalog::new();
        assert_eq!(catalog.stats().num_signals, 0);
        let store = TimeSeriesStore::default();
        assert_eq!(store.get_latest_timestamp(), None);
    }
}
