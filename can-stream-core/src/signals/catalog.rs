//! Signal catalog
//!
//! Maps frame identifiers to the extraction rules of every signal they carry.
//! The catalog is built once (from DBC files or in code) and is read-only
//! afterwards, so it can be shared between threads through an `Arc` without
//! any synchronization.

use crate::types::{CatalogError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    #[default]
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    #[default]
    Unsigned,
}

/// Multiplexing role of a signal inside its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiplexing {
    /// Always present
    #[default]
    None,
    /// This signal selects which multiplexed signals are present
    Multiplexor,
    /// Present only when the multiplexor carries this raw value
    Multiplexed(u64),
}

/// Extraction rule for a single named signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    /// Signal name, unique within the catalog
    pub name: String,
    /// CAN ID of the frame carrying this signal
    pub frame_id: u32,
    /// Start bit in the frame (LSB for Intel, MSB for Motorola)
    pub start_bit: u16,
    /// Length in bits (1..=64)
    pub length: u16,
    /// Byte order of the raw bits
    pub byte_order: ByteOrder,
    /// Signed/unsigned interpretation of the raw bits
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "rpm", "V")
    pub unit: Option<String>,
    /// Multiplexing role
    pub multiplexing: Multiplexing,
}

impl SignalSpec {
    /// Create an unsigned little-endian signal with unit scale
    pub fn new(name: impl Into<String>, frame_id: u32, start_bit: u16, length: u16) -> Self {
        Self {
            name: name.into(),
            frame_id,
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: None,
            multiplexing: Multiplexing::None,
        }
    }

    /// Builder method: set scale factor and offset
    pub fn with_scale(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// Builder method: set byte order
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Builder method: interpret raw bits as two's complement
    pub fn signed(mut self) -> Self {
        self.value_type = ValueType::Signed;
        self
    }

    /// Builder method: set engineering unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Builder method: set physical range
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Builder method: set multiplexing role
    pub fn with_multiplexing(mut self, multiplexing: Multiplexing) -> Self {
        self.multiplexing = multiplexing;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CatalogError::InvalidSignalDefinition(format!(
                "signal on frame 0x{:X} has an empty name",
                self.frame_id
            )));
        }
        if self.length == 0 || self.length > 64 {
            return Err(CatalogError::InvalidSignalDefinition(format!(
                "signal '{}' has length {} (expected 1..=64)",
                self.name, self.length
            )));
        }
        if !self.factor.is_finite() || !self.offset.is_finite() {
            return Err(CatalogError::InvalidSignalDefinition(format!(
                "signal '{}' has a non-finite scale or offset",
                self.name
            )));
        }
        Ok(())
    }
}

/// The signal catalog
#[derive(Debug, Default)]
pub struct SignalCatalog {
    /// Key: CAN ID, Value: every signal carried by that frame
    by_frame: HashMap<u32, Vec<SignalSpec>>,

    /// Key: signal name, Value: CAN ID of the carrying frame
    by_name: HashMap<String, u32>,
}

impl SignalCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from one DBC file
    pub fn from_dbc_file(path: &Path) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.add_dbc(path)?;
        Ok(catalog)
    }

    /// Load a DBC file and add its signals to the catalog
    ///
    /// Signal names already present in the catalog are skipped (the first
    /// definition wins) with a warning.
    pub fn add_dbc(&mut self, path: &Path) -> Result<()> {
        log::info!("Loading DBC file: {:?}", path);
        let specs = crate::signals::dbc::parse_dbc_file(path)?;
        let added = self.add_signals_lenient(specs);
        log::info!("DBC file loaded: {:?} ({} signals added)", path, added);
        Ok(())
    }

    /// Parse DBC text and add its signals to the catalog
    pub fn add_dbc_str(&mut self, content: &str) -> Result<()> {
        let specs = crate::signals::dbc::parse_dbc_str(content, "<inline>")?;
        self.add_signals_lenient(specs);
        Ok(())
    }

    fn add_signals_lenient(&mut self, specs: Vec<SignalSpec>) -> usize {
        let mut added = 0;
        for spec in specs {
            match self.add_signal(spec) {
                Ok(()) => added += 1,
                Err(e) => log::warn!("Skipping signal: {}", e),
            }
        }
        added
    }

    /// Add a single signal definition
    pub fn add_signal(&mut self, spec: SignalSpec) -> Result<()> {
        spec.validate()?;
        if self.by_name.contains_key(&spec.name) {
            return Err(CatalogError::DuplicateSignal(spec.name));
        }

        self.by_name.insert(spec.name.clone(), spec.frame_id);
        self.by_frame.entry(spec.frame_id).or_default().push(spec);
        Ok(())
    }

    /// Builder method: add a signal, returning the catalog
    pub fn with_signal(mut self, spec: SignalSpec) -> Result<Self> {
        self.add_signal(spec)?;
        Ok(self)
    }

    /// All signals carried by a frame (empty for unknown IDs)
    pub fn signals_for(&self, frame_id: u32) -> &[SignalSpec] {
        self.by_frame
            .get(&frame_id)
            .map(|specs| specs.as_slice())
            .unwrap_or(&[])
    }

    /// True if at least one signal is decoded from this frame
    pub fn has_frame(&self, frame_id: u32) -> bool {
        self.by_frame.contains_key(&frame_id)
    }

    /// Look up a signal definition by name
    pub fn get(&self, name: &str) -> Option<&SignalSpec> {
        let frame_id = self.by_name.get(name)?;
        self.signals_for(*frame_id).iter().find(|s| s.name == name)
    }

    /// All signal names, sorted
    pub fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// All frame IDs with at least one signal, sorted
    pub fn frame_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.by_frame.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Get catalog statistics
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            num_frames: self.by_frame.len(),
            num_signals: self.by_name.len(),
        }
    }

    /// True if the catalog holds no signals
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Catalog statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    /// Number of frame IDs with at least one signal
    pub num_frames: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
}
