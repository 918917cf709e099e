//! Snapshot output
//!
//! Renders each refresh tick either as a human-readable block or as one JSON
//! object per line. Both forms summarize the visible window of every signal
//! (sample count, last value, value range) rather than dumping raw arrays.

use crate::config::OutputFormat;
use can_stream_core::{CaptureFault, IngestStats, SignalCatalog, SignalSeries, Snapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

/// Per-signal summary of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary<'a> {
    pub samples: usize,
    /// Timestamp of the newest visible sample
    pub last_time: Option<f64>,
    pub last_value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'a str>,
}

impl<'a> SeriesSummary<'a> {
    pub fn new(series: &SignalSeries, unit: Option<&'a str>) -> Self {
        let last = series.last();
        let range = series.value_range();
        Self {
            samples: series.len(),
            last_time: last.map(|(t, _)| t),
            last_value: last.map(|(_, v)| v),
            min: range.map(|(lo, _)| lo),
            max: range.map(|(_, hi)| hi),
            unit,
        }
    }
}

/// One JSON line per tick
#[derive(Debug, Serialize)]
struct TickRecord<'a> {
    tick: u64,
    latest: Option<f64>,
    window_start: f64,
    window_end: f64,
    signals: BTreeMap<&'a str, SeriesSummary<'a>>,
}

/// Writes snapshots in the selected output format
pub struct SnapshotPrinter<W> {
    out: W,
    format: OutputFormat,
    catalog: Option<Arc<SignalCatalog>>,
}

impl<W: Write> SnapshotPrinter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            catalog: None,
        }
    }

    /// Builder method: look up units in this catalog
    pub fn with_catalog(mut self, catalog: Arc<SignalCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Write one refresh tick
    pub fn write_snapshot(&mut self, tick: u64, snapshot: &Snapshot) -> io::Result<()> {
        let catalog = self.catalog.clone();
        let signals: BTreeMap<&str, SeriesSummary<'_>> = snapshot
            .series
            .iter()
            .map(|(name, series)| {
                let unit = unit_of(catalog.as_deref(), name);
                (name.as_str(), SeriesSummary::new(series, unit))
            })
            .collect();

        match self.format {
            OutputFormat::Json => {
                let record = TickRecord {
                    tick,
                    latest: snapshot.latest,
                    window_start: snapshot.window_start,
                    window_end: snapshot.window_end,
                    signals,
                };
                serde_json::to_writer(&mut self.out, &record)?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => {
                match snapshot.latest {
                    Some(latest) => writeln!(
                        self.out,
                        "-- tick {} | t = {:.3}s | window [{:.3}, {:.3}]",
                        tick, latest, snapshot.window_start, snapshot.window_end
                    )?,
                    None => writeln!(self.out, "-- tick {} | waiting for data", tick)?,
                }
                for (name, summary) in &signals {
                    write_text_row(&mut self.out, name, summary)?;
                }
            }
        }
        self.out.flush()
    }

    /// Report a newly latched fault
    pub fn write_fault(&mut self, fault: &CaptureFault) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, &serde_json::json!({ "fault": fault }))?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => writeln!(
                self.out,
                "!! {} ({})",
                fault,
                fault.occurred_at.format("%H:%M:%S")
            )?,
        }
        self.out.flush()
    }

    /// Write end-of-run ingest statistics
    pub fn write_summary(&mut self, stats: &IngestStats) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, &serde_json::json!({ "summary": stats }))?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => {
                writeln!(self.out, "\nIngest summary:")?;
                writeln!(self.out, "  Frames received:  {}", stats.frames_received)?;
                writeln!(self.out, "  Frames decoded:   {}", stats.frames_decoded)?;
                writeln!(self.out, "  Frames ignored:   {}", stats.frames_ignored)?;
                writeln!(self.out, "  Samples appended: {}", stats.samples_appended)?;
                writeln!(self.out, "  Decode errors:    {}", stats.decode_errors)?;
                writeln!(self.out, "  Faults:           {}", stats.faults)?;
            }
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn unit_of<'a>(catalog: Option<&'a SignalCatalog>, name: &str) -> Option<&'a str> {
    catalog
        .and_then(|catalog| catalog.get(name))
        .and_then(|spec| spec.unit.as_deref())
        .filter(|unit| !unit.is_empty())
}

fn write_text_row<W: Write>(
    out: &mut W,
    name: &str,
    summary: &SeriesSummary<'_>,
) -> io::Result<()> {
    let unit = summary.unit.unwrap_or("");
    match (summary.last_value, summary.min, summary.max) {
        (Some(last), Some(min), Some(max)) => writeln!(
            out,
            "   {:<28} {:>14.3} {:<6} ({} samples, {:.3} .. {:.3})",
            name, last, unit, summary.samples, min, max
        ),
        _ => writeln!(out, "   {:<28} {:>14} {:<6} (no samples)", name, "-", unit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_stream_core::{FaultKind, SignalSpec};

    fn snapshot() -> Snapshot {
        let mut series = BTreeMap::new();
        series.insert(
            "RPM".to_string(),
            SignalSeries {
                timestamps: vec![1.0, 2.0, 3.0],
                values: vec![800.0, 2500.0, 1200.0],
            },
        );
        series.insert("Gear".to_string(), SignalSeries::default());
        Snapshot {
            latest: Some(3.0),
            window_start: 0.0,
            window_end: 3.0,
            series,
        }
    }

    fn catalog() -> Arc<SignalCatalog> {
        Arc::new(
            SignalCatalog::new()
                .with_signal(SignalSpec::new("RPM", 0x100, 0, 16).with_unit("rpm"))
                .unwrap(),
        )
    }

    #[test]
    fn test_series_summary() {
        let series = SignalSeries {
            timestamps: vec![0.5, 1.5],
            values: vec![-3.0, 7.0],
        };
        let summary = SeriesSummary::new(&series, Some("V"));
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.last_time, Some(1.5));
        assert_eq!(summary.last_value, Some(7.0));
        assert_eq!((summary.min, summary.max), (Some(-3.0), Some(7.0)));

        let empty = SeriesSummary::new(&SignalSeries::default(), None);
        assert_eq!(empty.samples, 0);
        assert_eq!(empty.last_value, None);
    }

    #[test]
    fn test_json_line() {
        let mut printer =
            SnapshotPrinter::new(Vec::new(), OutputFormat::Json).with_catalog(catalog());
        printer.write_snapshot(7, &snapshot()).unwrap();
        let out = String::from_utf8(printer.into_inner()).unwrap();

        assert_eq!(out.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["tick"], 7);
        assert_eq!(value["latest"], 3.0);
        assert_eq!(value["signals"]["RPM"]["samples"], 3);
        assert_eq!(value["signals"]["RPM"]["last_value"], 1200.0);
        assert_eq!(value["signals"]["RPM"]["max"], 2500.0);
        assert_eq!(value["signals"]["RPM"]["unit"], "rpm");
        assert_eq!(value["signals"]["Gear"]["samples"], 0);
        assert!(value["signals"]["Gear"].get("unit").is_none());
    }

    #[test]
    fn test_text_block() {
        let mut printer =
            SnapshotPrinter::new(Vec::new(), OutputFormat::Text).with_catalog(catalog());
        printer.write_snapshot(1, &snapshot()).unwrap();
        let out = String::from_utf8(printer.into_inner()).unwrap();

        assert!(out.is_ascii());
        assert!(out.starts_with("-- tick 1 | t = 3.000s | window [0.000, 3.000]"));
        assert!(out.contains("RPM"));
        assert!(out.contains("1200.000 rpm"));
        assert!(out.contains("3 samples"));
        assert!(out.contains("no samples"));
    }

    #[test]
    fn test_waiting_and_summary() {
        let mut printer = SnapshotPrinter::new(Vec::new(), OutputFormat::Text);
        printer.write_snapshot(0, &Snapshot::default()).unwrap();
        printer
            .write_summary(&IngestStats {
                frames_received: 10,
                ..Default::default()
            })
            .unwrap();
        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert!(out.contains("waiting for data"));
        assert!(out.contains("Frames received:  10"));
    }

    #[test]
    fn test_fault_json() {
        let surface = can_stream_core::ErrorSurface::new();
        surface.report(FaultKind::Transport, "bus off");
        let fault = surface.latest().unwrap();

        let mut printer = SnapshotPrinter::new(Vec::new(), OutputFormat::Json);
        printer.write_fault(&fault).unwrap();
        let out = String::from_utf8(printer.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["fault"]["message"], "bus off");
    }
}
