//! Raw log reading for the feature extractor.
//!
//! This module turns capture-daemon log files into ordered, typed
//! measurement sequences.

pub mod parse;
pub mod types;

// Re-export commonly used types
pub use parse::{
    parse_timestamp, LogReader, ParseError, ParseErrorKind, ParsePolicy, ParsedLog, ReadError,
};
pub use types::{Measurement, Reading, StreamKind};
