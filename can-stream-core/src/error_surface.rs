//! Consumer-facing error surface
//!
//! The capture thread latches faults here; the UI layer polls them. A version
//! counter lets a poller detect a new fault without taking the lock.

use crate::types::FaultKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A latched fault
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureFault {
    /// What kind of fault occurred
    pub kind: FaultKind,
    /// Human-readable description
    pub message: String,
    /// Wall-clock time the fault was reported
    pub occurred_at: DateTime<Utc>,
}

impl fmt::Display for CaptureFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Latched last-error value plus a version counter
#[derive(Debug, Default)]
pub struct ErrorSurface {
    last: Mutex<Option<CaptureFault>>,
    version: AtomicU64,
}

impl ErrorSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a fault, replacing any previous one
    pub fn report(&self, kind: FaultKind, message: impl Into<String>) {
        let fault = CaptureFault {
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        };
        *self.last.lock() = Some(fault);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of faults reported so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn has_changed_since(&self, version: u64) -> bool {
        self.version() != version
    }

    /// The last latched fault, left in place
    pub fn latest(&self) -> Option<CaptureFault> {
        self.last.lock().clone()
    }

    /// The last latched fault, cleared from the surface
    pub fn take(&self) -> Option<CaptureFault> {
        self.last.lock().take()
    }
}
