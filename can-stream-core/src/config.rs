//! Stream configuration types
//!
//! This module defines the knobs of the live pipeline: ring depth, the
//! consumer's window and refresh cadence, and the capture receive timeout.
//! Front ends load it from TOML and layer command-line overrides on top.

use crate::snapshot::{refresh_interval, SignalSelection, TimeWindow, DEFAULT_REFRESH_HZ};
use crate::store::DEFAULT_BUFFER_CAPACITY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the live stream pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Samples kept per signal ring
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Visible window of each snapshot
    #[serde(default)]
    pub window: TimeWindow,

    /// Snapshot refresh rate in Hz
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: u32,

    /// How long one receive on the frame source may block (default: 1000ms)
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_ms: u64,

    /// Optional: only show these signals (default: every discovered signal)
    #[serde(default)]
    pub signals: Option<Vec<String>>,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_refresh_hz() -> u32 {
    DEFAULT_REFRESH_HZ
}

fn default_recv_timeout() -> u64 {
    1000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            window: TimeWindow::default(),
            refresh_hz: default_refresh_hz(),
            recv_timeout_ms: default_recv_timeout(),
            signals: None,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set ring capacity per signal
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Builder method: set the visible window
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    /// Builder method: set the refresh rate
    pub fn with_refresh_hz(mut self, hz: u32) -> Self {
        self.refresh_hz = hz;
        self
    }

    /// Builder method: set the capture receive timeout
    pub fn with_recv_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.recv_timeout_ms = timeout_ms;
        self
    }

    /// Builder method: restrict snapshots to these signals
    pub fn with_signals(mut self, signals: Vec<String>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        refresh_interval(self.refresh_hz)
    }

    /// Signal selection for snapshot readers
    pub fn signal_selection(&self) -> SignalSelection {
        match &self.signals {
            Some(names) if !names.is_empty() => SignalSelection::Named(names.clone()),
            _ => SignalSelection::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_builder() {
        let config = StreamConfig::new()
            .with_buffer_capacity(1000)
            .with_window(TimeWindow::Trailing(10.0))
            .with_refresh_hz(10)
            .with_recv_timeout_ms(250)
            .with_signals(vec!["RPM".into()]);

        assert_eq!(config.buffer_capacity, 1000);
        assert_eq!(config.window, TimeWindow::Trailing(10.0));
        assert_eq!(config.refresh_interval(), Duration::from_millis(100));
        assert_eq!(config.recv_timeout(), Duration::from_millis(250));
        assert_eq!(
            config.signal_selection(),
            SignalSelection::Named(vec!["RPM".into()])
        );
    }

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_capacity, 50_000);
        assert_eq!(config.window, TimeWindow::Trailing(30.0));
        assert_eq!(config.refresh_hz, 30);
        assert_eq!(config.signal_selection(), SignalSelection::All);
    }

    #[test]
    fn test_empty_signal_list_means_all() {
        let config = StreamConfig::new().with_signals(Vec::new());
        assert_eq!(config.signal_selection(), SignalSelection::All);
    }
}
