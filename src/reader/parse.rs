//! Line-oriented parsing of raw sensor logs.
//!
//! Known hardware failure records are turned into scan-error measurements;
//! anything else that does not match the stream grammar is a [`ParseError`]
//! and is either skipped or fatal, depending on the [`ParsePolicy`].

use crate::reader::types::{Measurement, StreamKind};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Failure record emitted when the WiFi interface refuses to scan. The next
/// line carries the driver message, the line after that the timestamp.
const SCAN_UNSUPPORTED: &str = "Interface doesn't support scanning";

/// Failure record emitted by the capture daemon; the timestamp is embedded.
const SCAN_SIZE_MISMATCH: &str = "lists do not match";

/// Spurious luminosity value produced by a SensorTag firmware bug.
const LUX_GLITCH_VALUE: f64 = 13.6;

/// How to deal with lines that match neither grammar nor a failure record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsePolicy {
    /// Log the line and continue
    #[default]
    Skip,
    /// Abort reading the file
    FailFast,
}

/// A single malformed line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line_number: usize,
    pub line: String,
    pub reason: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    FieldCount(usize),
    InvalidSignal(String),
    InvalidValue(String),
    InvalidTimestamp(String),
    TruncatedScanError,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::FieldCount(n) => write!(f, "unexpected field count {n}"),
            ParseErrorKind::InvalidSignal(s) => write!(f, "invalid signal strength '{s}'"),
            ParseErrorKind::InvalidValue(s) => write!(f, "invalid value '{s}'"),
            ParseErrorKind::InvalidTimestamp(s) => write!(f, "invalid timestamp '{s}'"),
            ParseErrorKind::TruncatedScanError => write!(f, "scan error record cut short"),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line_number, self.reason, self.line)
    }
}

impl std::error::Error for ParseError {}

/// Errors that abort reading a whole log.
#[derive(Debug)]
pub enum ReadError {
    Io { path: PathBuf, message: String },
    Parse { source: String, error: ParseError },
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Io { path, message } => write!(f, "IO error reading {path:?}: {message}"),
            ReadError::Parse { source, error } => write!(f, "Parse error in {source}: {error}"),
        }
    }
}

impl std::error::Error for ReadError {}

/// The measurements of one log plus what was dropped or flagged on the way.
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub measurements: Vec<Measurement>,
    pub skipped_lines: usize,
    pub scan_errors: usize,
}

/// Reads logs of one stream kind.
#[derive(Debug, Clone)]
pub struct LogReader {
    kind: StreamKind,
    policy: ParsePolicy,
    clean_lux_glitches: bool,
}

/// Where we are inside a multi-line scan failure record.
#[derive(Clone, Copy)]
enum ScanState {
    Normal,
    ExpectMessage,
    ExpectTimestamp,
}

impl LogReader {
    pub fn new(kind: StreamKind, policy: ParsePolicy) -> Self {
        Self {
            kind,
            policy,
            clean_lux_glitches: false,
        }
    }

    /// Replace isolated 13.6 readings with the previous value.
    pub fn with_lux_cleaning(mut self, enabled: bool) -> Self {
        self.clean_lux_glitches = enabled;
        self
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Read and parse a log file.
    pub fn read_path(&self, path: &Path) -> Result<ParsedLog, ReadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ReadError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.read_str(&content, &path.display().to_string())
    }

    /// Parse log content. `source` is only used in log messages and errors.
    pub fn read_str(&self, content: &str, source: &str) -> Result<ParsedLog, ReadError> {
        let mut parsed = ParsedLog::default();
        let mut state = ScanState::Normal;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            let line_number = index + 1;

            let result = match state {
                ScanState::ExpectMessage => {
                    state = ScanState::ExpectTimestamp;
                    continue;
                }
                ScanState::ExpectTimestamp => {
                    state = ScanState::Normal;
                    parse_timestamp(line)
                        .map(Measurement::scan_error)
                        .ok_or_else(|| ParseErrorKind::InvalidTimestamp(line.to_string()))
                }
                ScanState::Normal if line.is_empty() => continue,
                ScanState::Normal if self.kind == StreamKind::Set => {
                    if line.contains(SCAN_UNSUPPORTED) {
                        state = ScanState::ExpectMessage;
                        continue;
                    }
                    if line.contains(SCAN_SIZE_MISMATCH) {
                        embedded_timestamp(line)
                            .map(Measurement::scan_error)
                            .ok_or_else(|| ParseErrorKind::InvalidTimestamp(line.to_string()))
                    } else {
                        parse_set_line(line)
                    }
                }
                ScanState::Normal => parse_scalar_line(line),
            };

            match result {
                Ok(measurement) => {
                    if measurement.is_scan_error() {
                        parsed.scan_errors += 1;
                    }
                    parsed.measurements.push(measurement);
                }
                Err(reason) => {
                    let error = ParseError {
                        line_number,
                        line: line.to_string(),
                        reason,
                    };
                    self.handle_error(source, error, &mut parsed)?;
                }
            }
        }

        if !matches!(state, ScanState::Normal) {
            let error = ParseError {
                line_number: content.lines().count(),
                line: String::new(),
                reason: ParseErrorKind::TruncatedScanError,
            };
            self.handle_error(source, error, &mut parsed)?;
        }

        if self.clean_lux_glitches && self.kind == StreamKind::Scalar {
            clean_lux_glitches(&mut parsed.measurements);
        }

        Ok(parsed)
    }

    fn handle_error(
        &self,
        source: &str,
        error: ParseError,
        parsed: &mut ParsedLog,
    ) -> Result<(), ReadError> {
        match self.policy {
            ParsePolicy::Skip => {
                tracing::warn!("Skipping malformed line in {}: {}", source, error);
                parsed.skipped_lines += 1;
                Ok(())
            }
            ParsePolicy::FailFast => Err(ReadError::Parse {
                source: source.to_string(),
                error,
            }),
        }
    }
}

/// Parse `<identifier> <signal><unit> <timestamp>`.
fn parse_set_line(line: &str) -> Result<Measurement, ParseErrorKind> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(ParseErrorKind::FieldCount(fields.len()));
    }

    let signal = parse_signal(fields[1])?;
    let timestamp = parse_timestamp(fields[2])
        .ok_or_else(|| ParseErrorKind::InvalidTimestamp(fields[2].to_string()))?;

    Ok(Measurement::beacon(fields[0], signal, timestamp))
}

/// Parse `<value> <timestamp>`.
fn parse_scalar_line(line: &str) -> Result<Measurement, ParseErrorKind> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(ParseErrorKind::FieldCount(fields.len()));
    }

    let value: f64 = fields[0]
        .parse()
        .map_err(|_| ParseErrorKind::InvalidValue(fields[0].to_string()))?;
    let timestamp = parse_timestamp(fields[1])
        .ok_or_else(|| ParseErrorKind::InvalidTimestamp(fields[1].to_string()))?;

    Ok(Measurement::scalar(value, timestamp))
}

/// Strip the unit suffix (`-71dBm` -> `-71`).
fn parse_signal(field: &str) -> Result<f64, ParseErrorKind> {
    let numeric_len = field
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.')))
        .map(|(i, _)| i)
        .unwrap_or(field.len());

    field[..numeric_len]
        .parse()
        .map_err(|_| ParseErrorKind::InvalidSignal(field.to_string()))
}

/// Find the timestamp embedded in a failure record line.
fn embedded_timestamp(line: &str) -> Option<NaiveDateTime> {
    line.split_whitespace().rev().find_map(parse_timestamp)
}

/// Parse the ISO-8601 timestamps written by the capture daemons.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

fn clean_lux_glitches(measurements: &mut [Measurement]) {
    for i in 1..measurements.len() {
        let (Some(prev), Some(current)) = (measurements[i - 1].value(), measurements[i].value())
        else {
            continue;
        };
        if current == LUX_GLITCH_VALUE && (prev - current).abs() > 1.0 {
            tracing::debug!(
                "Replacing luminosity glitch at {} with {}",
                measurements[i].timestamp,
                prev
            );
            measurements[i] = Measurement::scalar(prev, measurements[i].timestamp);
        }
    }
}
