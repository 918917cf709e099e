//! Signal catalog and DBC parser
//!
//! This module contains the read-only signal catalog and the DBC loader
//! that populates it.

pub mod catalog;
pub mod dbc;

// Re-export key types for convenience
pub use catalog::{
    ByteOrder, CatalogStats, Multiplexing, SignalCatalog, SignalSpec, ValueType,
};
