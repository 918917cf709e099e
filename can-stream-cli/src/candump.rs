//! candump log frame source
//!
//! Reads SocketCAN `candump -l` style logs, one frame per line:
//!
//! ```text
//! (1700000000.123456) can0 123#DEADBEEF        classic frame
//! (1700000000.123999) can0 18FF0001#0102       extended (8 hex digit) ID
//! (1700000000.124500) can0 123##1DEADBEEF      CAN-FD frame, flags nibble 1
//! (1700000000.125000) can0 123#R               remote frame (skipped)
//! ```
//!
//! The source reads from a file, stdin or any buffered reader. In real-time
//! mode it sleeps to honor the log's inter-frame timing.

use can_stream_core::{CaptureError, FrameSource, RawFrame, Received};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const MAX_STANDARD_ID: u32 = 0x7FF;
const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
const MAX_CLASSIC_LEN: usize = 8;
const MAX_FD_LEN: usize = 64;

/// Errors for lines that do not follow the candump log format
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandumpParseError {
    #[error("missing or malformed timestamp")]
    Timestamp,

    #[error("missing interface or frame field")]
    MissingField,

    #[error("invalid CAN ID '{0}'")]
    Identifier(String),

    #[error("invalid payload '{0}'")]
    Payload(String),
}

/// Parse one candump log line
///
/// Returns `Ok(None)` for lines that are valid but carry no data frame
/// (blank lines, remote frames).
pub fn parse_candump_line(line: &str) -> Result<Option<RawFrame>, CandumpParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut parts = line.split_whitespace();
    let timestamp = parts
        .next()
        .and_then(|s| s.strip_prefix('('))
        .and_then(|s| s.strip_suffix(')'))
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .ok_or(CandumpParseError::Timestamp)?;
    let _interface = parts.next().ok_or(CandumpParseError::MissingField)?;
    let frame = parts.next().ok_or(CandumpParseError::MissingField)?;

    let (id_str, rest) = frame
        .split_once('#')
        .ok_or_else(|| CandumpParseError::Identifier(frame.to_string()))?;

    let id = u32::from_str_radix(id_str, 16)
        .map_err(|_| CandumpParseError::Identifier(id_str.to_string()))?;
    let is_extended = id_str.len() > 3;
    let id_limit = if is_extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
    if id > id_limit {
        return Err(CandumpParseError::Identifier(id_str.to_string()));
    }

    let (is_fd, hex) = match rest.strip_prefix('#') {
        Some(fd) => {
            // First character is the FD flags nibble
            let mut chars = fd.chars();
            match chars.next() {
                Some(flags) if flags.is_ascii_hexdigit() => (true, chars.as_str()),
                _ => return Err(CandumpParseError::Payload(rest.to_string())),
            }
        }
        None => (false, rest),
    };

    if !is_fd && hex.starts_with('R') {
        return Ok(None);
    }

    let data = decode_hex(hex).ok_or_else(|| CandumpParseError::Payload(hex.to_string()))?;
    let max_len = if is_fd { MAX_FD_LEN } else { MAX_CLASSIC_LEN };
    if data.len() > max_len {
        return Err(CandumpParseError::Payload(hex.to_string()));
    }

    Ok(Some(
        RawFrame::new(id, data, timestamp)
            .with_extended(is_extended)
            .with_fd(is_fd),
    ))
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Where log lines come from
enum Lines {
    Reader(Box<dyn BufRead + Send>),
    /// Lines pumped from a blocking reader on a helper thread
    Pumped(Receiver<io::Result<String>>),
}

enum Next {
    Frame(RawFrame),
    Timeout,
    End,
}

/// Frame source over a candump log
pub struct CandumpSource {
    lines: Lines,
    line: String,
    line_no: usize,
    realtime: bool,
    /// (first log timestamp, wall clock at first frame)
    pacing_origin: Option<(f64, Instant)>,
    /// Frame read ahead of its real-time due date
    pending: Option<RawFrame>,
}

impl CandumpSource {
    /// Open a log file
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    /// Read frames from standard input (e.g. `candump -L can0 | can-stream ...`)
    ///
    /// Stdin is read on a helper thread so that the receive timeout holds
    /// while the pipe is idle.
    pub fn stdin() -> io::Result<Self> {
        Self::pumped(BufReader::new(io::stdin()))
    }

    /// Read directly from a buffered reader (blocking reads)
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self::with_lines(Lines::Reader(Box::new(reader)))
    }

    /// Read from a buffered reader through a helper thread
    pub fn pumped<R: BufRead + Send + 'static>(mut reader: R) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("candump-reader".to_string())
            .spawn(move || loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            })?;
        Ok(Self::with_lines(Lines::Pumped(rx)))
    }

    fn with_lines(lines: Lines) -> Self {
        Self {
            lines,
            line: String::new(),
            line_no: 0,
            realtime: false,
            pacing_origin: None,
            pending: None,
        }
    }

    /// Builder method: replay at the log's original pace
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Read one line into `self.line`; `false` at end of input
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<bool>> {
        self.line.clear();
        match &mut self.lines {
            Lines::Reader(reader) => Ok(Some(reader.read_line(&mut self.line)? > 0)),
            Lines::Pumped(rx) => match rx.recv_timeout(timeout) {
                Ok(line) => {
                    self.line = line?;
                    Ok(Some(true))
                }
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Ok(Some(false)),
            },
        }
    }

    /// Next data frame, skipping lines that carry none
    fn next_frame(&mut self, timeout: Duration) -> io::Result<Next> {
        loop {
            match self.read_line(timeout)? {
                None => return Ok(Next::Timeout),
                Some(false) => return Ok(Next::End),
                Some(true) => {}
            }
            self.line_no += 1;

            match parse_candump_line(&self.line) {
                Ok(Some(frame)) => return Ok(Next::Frame(frame)),
                Ok(None) => continue,
                Err(e) => log::debug!("Skipping line {}: {}", self.line_no, e),
            }
        }
    }

    /// Wall-clock instant at which a frame is due
    fn due_at(&mut self, frame: &RawFrame) -> Instant {
        let (log_start, wall_start) = *self
            .pacing_origin
            .get_or_insert_with(|| (frame.timestamp, Instant::now()));
        let offset = (frame.timestamp - log_start).max(0.0);
        wall_start + Duration::from_secs_f64(offset)
    }
}

impl FrameSource for CandumpSource {
    fn recv(&mut self, timeout: Duration) -> Result<Received, CaptureError> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => match self.next_frame(timeout)? {
                Next::Frame(frame) => frame,
                Next::Timeout => return Ok(Received::Timeout),
                Next::End => return Ok(Received::Closed),
            },
        };

        if !self.realtime {
            return Ok(Received::Frame(frame));
        }

        let due = self.due_at(&frame);
        let now = Instant::now();
        if due <= now {
            return Ok(Received::Frame(frame));
        }

        let wait = due - now;
        if wait <= timeout {
            thread::sleep(wait);
            Ok(Received::Frame(frame))
        } else {
            thread::sleep(timeout);
            self.pending = Some(frame);
            Ok(Received::Timeout)
        }
    }

    fn shutdown(&mut self) {
        log::debug!("candump source closed after {} lines", self.line_no);
    }
}
