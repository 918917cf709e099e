//! Core types for the CAN stream core library
//!
//! This module defines the values that travel through the ingest pipeline
//! (raw frames in, sample points out) and the error types of every layer.

use std::fmt;

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Raw CAN frame as delivered by the bus transport
///
/// Produced once by the capture layer and consumed once by the ingest
/// listener. Never mutated after it has been handed off.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// CAN message ID (11-bit or 29-bit)
    pub id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
    /// Bus timestamp in seconds (monotonic source clock)
    pub timestamp: f64,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// True if this is a CAN-FD frame
    pub is_fd: bool,
}

impl RawFrame {
    /// Create a classic CAN frame with a standard identifier
    pub fn new(id: u32, data: impl Into<Vec<u8>>, timestamp: f64) -> Self {
        Self {
            id,
            data: data.into(),
            timestamp,
            is_extended: id > 0x7FF,
            is_fd: false,
        }
    }

    /// Builder method: mark the frame as CAN-FD
    pub fn with_fd(mut self, is_fd: bool) -> Self {
        self.is_fd = is_fd;
        self
    }

    /// Builder method: mark the identifier as extended (29-bit)
    pub fn with_extended(mut self, is_extended: bool) -> Self {
        self.is_extended = is_extended;
        self
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// A single decoded value on the session-relative time axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    /// Seconds since the first frame of the session
    pub timestamp: f64,
    /// Physical value after scale and offset
    pub value: f64,
}

/// Errors raised while building or loading a signal catalog
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to parse DBC file: {0}")]
    DbcParseError(String),

    #[error("Duplicate signal name: {0}")]
    DuplicateSignal(String),

    #[error("Invalid signal definition: {0}")]
    InvalidSignalDefinition(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by the time-series store
///
/// Only resource exhaustion is fatal; everything else is contained inside
/// the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to allocate ring buffer of {capacity} samples for signal '{signal}'")]
    Allocation { signal: String, capacity: usize },
}

/// Errors reported by a frame source (transport layer)
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Bus disconnected: {0}")]
    Disconnected(String),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Errors raised by the capture session lifecycle
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No catalog loaded")]
    NoCatalog,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Category of a fault latched on the error surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FaultKind {
    /// Transport-level fault (disconnect, hardware error)
    Transport,
    /// The store could not register a new signal buffer
    Storage,
    /// Session lifecycle problem (e.g. start without catalog)
    Session,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Transport => write!(f, "Transport"),
            FaultKind::Storage => write!(f, "Storage"),
            FaultKind::Session => write!(f, "Session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frame_defaults() {
        let frame = RawFrame::new(0x100, vec![1, 2, 3], 1.5);
        assert_eq!(frame.dlc(), 3);
        assert!(!frame.is_extended);
        assert!(!frame.is_fd);

        let ext = RawFrame::new(0x18FF_0001, vec![], 0.0);
        assert!(ext.is_extended);
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::Allocation {
            signal: "RPM".to_string(),
            capacity: 10,
        };
        assert_eq!(
            err.to_string(),
            "Failed to allocate ring buffer of 10 samples for signal 'RPM'"
        );
        assert_eq!(SessionError::NoCatalog.to_string(), "No catalog loaded");
        assert_eq!(FaultKind::Transport.to_string(), "Transport");
    }
}
