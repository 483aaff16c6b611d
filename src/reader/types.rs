//! Typed measurements read from raw sensor logs.
//!
//! Set-type streams (WiFi, BLE) carry a beacon identifier next to the signal
//! strength. Scalar streams (luminosity, temperature, humidity, pressure) only
//! carry a value. A hardware scan failure is kept as an explicit reading so it
//! can be told apart from "nothing observed".

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The kind of stream a log file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// `<identifier> <signal><unit> <timestamp>` lines
    Set,
    /// `<value> <timestamp>` lines
    Scalar,
}

/// A single observed value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    /// A measured value
    Value(f64),
    /// The device reported that the scan itself failed
    ScanError,
    /// The identifier was not observed on this side
    Missing,
}

impl Reading {
    /// The measured value, if there is one.
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::ScanError | Reading::Missing => None,
        }
    }

    /// Resolve the reading to a number, substituting `default` for anything
    /// that is not a measured value.
    pub fn or_default(&self, default: f64) -> f64 {
        self.value().unwrap_or(default)
    }
}

/// One line of a sensor log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Beacon identifier for set-type streams
    pub identifier: Option<String>,
    /// The observed reading
    pub reading: Reading,
    /// Device-local capture time
    pub timestamp: NaiveDateTime,
}

impl Measurement {
    /// A set-type observation of one beacon.
    pub fn beacon(identifier: impl Into<String>, signal: f64, timestamp: NaiveDateTime) -> Self {
        Self {
            identifier: Some(identifier.into()),
            reading: Reading::Value(signal),
            timestamp,
        }
    }

    /// A scalar observation.
    pub fn scalar(value: f64, timestamp: NaiveDateTime) -> Self {
        Self {
            identifier: None,
            reading: Reading::Value(value),
            timestamp,
        }
    }

    /// A recorded hardware scan failure.
    pub fn scan_error(timestamp: NaiveDateTime) -> Self {
        Self {
            identifier: None,
            reading: Reading::ScanError,
            timestamp,
        }
    }

    pub fn is_scan_error(&self) -> bool {
        matches!(self.reading, Reading::ScanError)
    }

    /// The measured value, if any.
    pub fn value(&self) -> Option<f64> {
        self.reading.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 8, 10)
            .unwrap()
            .and_hms_micro_opt(21, 57, 25, 716306)
            .unwrap()
    }

    #[test]
    fn test_scan_error_has_no_value() {
        let m = Measurement::scan_error(ts());
        assert!(m.is_scan_error());
        assert_eq!(m.value(), None);
        assert!(m.identifier.is_none());
    }

    #[test]
    fn test_reading_default_substitution() {
        assert_eq!(Reading::Value(-71.0).or_default(-100.0), -71.0);
        assert_eq!(Reading::Missing.or_default(-100.0), -100.0);
        assert_eq!(Reading::ScanError.or_default(-100.0), -100.0);
    }

    #[test]
    fn test_beacon_construction() {
        let m = Measurement::beacon("aa:bb:cc:dd:ee:ff", -71.0, ts());
        assert_eq!(m.identifier.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(m.value(), Some(-71.0));
        assert!(!m.is_scan_error());
    }
}
