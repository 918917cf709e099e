//! CAN Stream CLI Application
//!
//! Command-line front end for the can-stream-core library:
//! - Loads one or more DBC files into a signal catalog
//! - Streams frames from a candump log (file or stdin) on a capture thread
//! - Refreshes the visible window on a fixed cadence and prints it
//!   (text or JSON lines)

use anyhow::{bail, Context, Result};
use can_stream_core::{
    CaptureSession, FaultKind, PeriodicSnapshot, SignalCatalog, SnapshotReader, TimeWindow,
};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;

mod candump;
mod config;
mod report;

use candump::CandumpSource;
use config::{AppConfig, OutputFormat};
use report::SnapshotPrinter;

/// CAN Stream - Live CAN signal viewer
#[derive(Parser, Debug)]
#[command(name = "can-stream")]
#[command(about = "Decode a live or recorded CAN stream and print the visible signal window")]
#[command(long_about = None)]
#[command(version)]
struct Args {
    /// Path to DBC file(s) (can be repeated)
    #[arg(long, value_name = "FILE")]
    dbc: Vec<PathBuf>,

    /// candump log to replay ("-" or absent reads stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Signals to show, comma separated (default: every discovered signal)
    #[arg(short, long, value_name = "NAME,...", value_delimiter = ',')]
    signals: Vec<String>,

    /// Visible time window: seconds ("30s", "120") or "all"
    #[arg(short, long, value_name = "WINDOW")]
    window: Option<TimeWindow>,

    /// Refresh rate in Hz (presets: 5, 10, 20, 30)
    #[arg(long, value_name = "HZ")]
    refresh_hz: Option<u32>,

    /// Samples kept per signal
    #[arg(long, value_name = "SAMPLES")]
    capacity: Option<usize>,

    /// Print one JSON object per refresh tick
    #[arg(long)]
    json: bool,

    /// Stop after this many refresh ticks
    #[arg(long, value_name = "COUNT")]
    max_ticks: Option<u64>,

    /// Replay the log at its recorded pace
    #[arg(long)]
    realtime: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    /// Also write the application log to a timestamped file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let log_file = init_logging(args.verbose, args.quiet, args.log_dir.as_deref())?;

    log::info!("CAN Stream CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using core library v{}", can_stream_core::VERSION);
    if let Some(path) = &log_file {
        log::info!("Writing log file: {:?}", path);
    }

    let config = resolve_config(&args)?;

    if config.catalog.dbc_files.is_empty() {
        println!("CAN Stream - No DBC specified");
        println!("\nQuick Start:");
        println!("  can-stream --dbc powertrain.dbc --input trace.log");
        println!("  candump -L can0 | can-stream --dbc powertrain.dbc --window 60s");
        println!("\nWith a configuration file:");
        println!("  can-stream --config config.toml");
        println!("\nUse --help for more options");
        return Ok(());
    }

    stream(&config)
}

/// Merge the optional TOML file with command-line overrides
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    config.catalog.dbc_files.extend(args.dbc.iter().cloned());
    if let Some(input) = &args.input {
        config.input.path = Some(input.clone());
    }
    if args.realtime {
        config.input.realtime = true;
    }
    if !args.signals.is_empty() {
        config.stream.signals = Some(args.signals.clone());
    }
    if let Some(window) = args.window {
        config.stream.window = window;
    }
    if let Some(hz) = args.refresh_hz {
        config.stream.refresh_hz = hz;
    }
    if let Some(capacity) = args.capacity {
        config.stream.buffer_capacity = capacity;
    }
    if args.json {
        config.output.format = OutputFormat::Json;
    }
    if args.max_ticks.is_some() {
        config.output.max_ticks = args.max_ticks;
    }

    log::debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Load every DBC into one catalog
fn load_catalog(paths: &[PathBuf]) -> Result<SignalCatalog> {
    let mut catalog = SignalCatalog::new();
    for path in paths {
        catalog
            .add_dbc(path)
            .with_context(|| format!("Failed to load DBC: {:?}", path))?;
    }

    let stats = catalog.stats();
    log::info!(
        "Signal catalog: {} frames, {} signals",
        stats.num_frames,
        stats.num_signals
    );
    if catalog.is_empty() {
        log::warn!("Loaded DBC files define no signals; nothing will be decoded");
    }
    Ok(catalog)
}

/// Run one capture session until the source ends or the tick limit is reached
fn stream(config: &AppConfig) -> Result<()> {
    let catalog = Arc::new(load_catalog(&config.catalog.dbc_files)?);

    let mut session = CaptureSession::from_config(&config.stream);
    session.set_catalog(Arc::clone(&catalog));
    session.on_new_signals(|names| {
        log::info!("Discovered {} new signal(s): {}", names.len(), names.join(", "));
    });

    let source = match config.input.file() {
        Some(path) => {
            log::info!("Replaying candump log: {:?}", path);
            CandumpSource::open(path).with_context(|| format!("Failed to open log: {:?}", path))?
        }
        None => {
            log::info!("Reading candump frames from stdin");
            CandumpSource::stdin().context("Failed to start stdin reader")?
        }
    };
    session
        .start(source.with_realtime(config.input.realtime))
        .context("Failed to start capture")?;

    let reader = SnapshotReader::new(
        Arc::clone(session.store()),
        config.stream.signal_selection(),
        config.stream.window,
    );
    let final_reader = reader.clone();
    let interval = config.stream.refresh_interval();
    log::info!(
        "Window {}, refreshing every {:?}",
        config.stream.window,
        interval
    );

    let (tx, rx) = mpsc::channel();
    let mut ticker = PeriodicSnapshot::spawn(reader, interval, move |snapshot| {
        let _ = tx.send(snapshot);
    })
    .context("Failed to start refresh thread")?;

    let mut printer =
        SnapshotPrinter::new(io::stdout(), config.output.format).with_catalog(catalog);
    let errors = Arc::clone(session.errors());
    let mut seen_fault = errors.version();
    let mut tick = 0u64;

    loop {
        match rx.recv_timeout(interval * 2) {
            Ok(snapshot) => {
                printer.write_snapshot(tick, &snapshot)?;
                tick += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if errors.has_changed_since(seen_fault) {
            seen_fault = errors.version();
            if let Some(fault) = errors.latest() {
                printer.write_fault(&fault)?;
            }
        }

        if config.output.max_ticks.is_some_and(|max| tick >= max) {
            log::info!("Reached {} ticks, stopping", tick);
            break;
        }
        if !session.is_running() {
            log::info!("Frame source finished");
            break;
        }
    }

    ticker.stop();
    session.stop();

    // Last frame may have landed after the final periodic tick
    if config.output.max_ticks.map_or(true, |max| tick < max) {
        printer.write_snapshot(tick, &final_reader.snapshot())?;
    }
    printer.write_summary(&session.stats())?;

    match errors.latest() {
        Some(fault) if fault.kind == FaultKind::Transport => bail!("Capture ended with {}", fault),
        _ => Ok(()),
    }
}

/// Initialize logging based on verbosity level
///
/// With a log directory, records go to stderr and to a timestamped file
/// whose path is returned.
fn init_logging(verbose: u8, quiet: bool, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} [{} {}] {}",
            chrono::Local::now().format("%d-%b-%Y %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    let log_path = match log_dir {
        Some(dir) => {
            let (path, file) = create_log_file(dir)
                .with_context(|| format!("Failed to create log file in {:?}", dir))?;
            builder.target(Target::Pipe(Box::new(TeeWriter { file })));
            Some(path)
        }
        None => None,
    };

    builder.init();
    Ok(log_path)
}

/// Create `can_stream_<timestamp>.log` in `dir`, creating the directory if needed
fn create_log_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let path = dir.join(format!("can_stream_{}.log", timestamp));
    let file = File::create(&path)?;
    Ok((path, file))
}

/// Log sink writing every record to stderr and to the log file
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_overrides() {
        let args = Args::parse_from([
            "can-stream",
            "--dbc",
            "a.dbc",
            "--dbc",
            "b.dbc",
            "--signals",
            "RPM,Speed",
            "--window",
            "all",
            "--refresh-hz",
            "10",
            "--capacity",
            "500",
            "--json",
            "--max-ticks",
            "3",
        ]);
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.catalog.dbc_files.len(), 2);
        assert_eq!(config.input.file(), None);
        assert_eq!(
            config.stream.signals,
            Some(vec!["RPM".to_string(), "Speed".to_string()])
        );
        assert_eq!(config.stream.window, TimeWindow::All);
        assert_eq!(config.stream.refresh_hz, 10);
        assert_eq!(config.stream.buffer_capacity, 500);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.output.max_ticks, Some(3));
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[catalog]\ndbc_files = [\"base.dbc\"]\n[stream]\nwindow = \"60s\"\nrefresh_hz = 5"
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let args = Args::parse_from(["can-stream", "--config", &path, "--window", "10s"]);
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.catalog.dbc_files, vec![PathBuf::from("base.dbc")]);
        assert_eq!(config.stream.window, TimeWindow::Trailing(10.0));
        assert_eq!(config.stream.refresh_hz, 5);
    }

    #[test]
    fn test_invalid_window_rejected() {
        assert!(Args::try_parse_from(["can-stream", "--window", "soon"]).is_err());
    }

    #[test]
    fn test_log_file_created_in_new_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("logs");

        let (path, _file) = create_log_file(&dir).unwrap();
        assert!(path.exists());
        assert_eq!(path.parent(), Some(dir.as_path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("can_stream_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_tee_writer_copies_to_file() {
        let root = tempfile::tempdir().unwrap();
        let (path, file) = create_log_file(root.path()).unwrap();

        let mut tee = TeeWriter { file };
        tee.write_all(b"[INFO can_stream] started\n").unwrap();
        tee.flush().unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "[INFO can_stream] started\n");
    }

    #[test]
    fn test_log_dir_flag() {
        let args = Args::parse_from(["can-stream", "--log-dir", "logs"]);
        assert_eq!(args.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn test_load_catalog_missing_file() {
        assert!(load_catalog(&[PathBuf::from("/nonexistent/bus.dbc")]).is_err());
    }
}
