//! Luminosity change fingerprints for a single sensor.
//!
//! The luminosity stream is averaged per timeslot; each pair of consecutive
//! slots contributes one bit, set when the average changed by more than both
//! a relative and an absolute threshold.

use crate::core::windowing::{slot_label, TimeslotBinner};
use crate::reader::types::Measurement;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Divisor used in place of a zero previous average.
const ZERO_AVERAGE_SUBSTITUTE: f64 = 0.000001;

/// Thresholds for the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FingerprintParams {
    pub delta_rel: f64,
    pub delta_abs: f64,
    pub fp_len: usize,
}

impl Default for FingerprintParams {
    fn default() -> Self {
        Self {
            delta_rel: 0.1,
            delta_abs: 10.0,
            fp_len: 128,
        }
    }
}

/// A fingerprint and the slot it ends in.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    /// Label of the last slot contributing to the fingerprint
    pub last_slot: String,
    pub bits: String,
}

/// One fingerprint bit from the averages of two consecutive slots.
pub fn fingerprint_bit(current: f64, previous: f64, delta_rel: f64, delta_abs: f64) -> bool {
    let divisor = if previous == 0.0 {
        ZERO_AVERAGE_SUBSTITUTE
    } else {
        previous
    };
    (current / divisor - 1.0).abs() > delta_rel && (current - previous).abs() > delta_abs
}

/// Build the fingerprint of a luminosity stream. Returns `None` for an
/// empty stream.
pub fn fingerprint(
    measurements: &[Measurement],
    binner: &TimeslotBinner,
    params: &FingerprintParams,
) -> Option<Fingerprint> {
    let averages: Vec<(String, f64)> = binner
        .bin(measurements)
        .iter()
        .filter_map(|(slot, population)| {
            let values: Vec<f64> = population.iter().filter_map(|m| m.value()).collect();
            if values.is_empty() {
                None
            } else {
                Some((slot_label(slot), values.iter().mean()))
            }
        })
        .collect();

    let last_slot = averages.last()?.0.clone();
    let bits = averages
        .windows(2)
        .map(|w| {
            if fingerprint_bit(w[1].1, w[0].1, params.delta_rel, params.delta_abs) {
                '1'
            } else {
                '0'
            }
        })
        .collect();

    Some(Fingerprint { last_slot, bits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    #[test]
    fn test_fingerprint_bit() {
        assert!(!fingerprint_bit(3.0, 3.0, 0.1, 0.1));
        assert!(fingerprint_bit(3.0, 33.0, 0.1, 0.1));
        assert!(!fingerprint_bit(0.0001, 0.09, 0.1, 0.1));
        assert!(!fingerprint_bit(0.0, 0.1, 0.1, 0.1));
        assert!(fingerprint_bit(0.0, 0.1, 0.1, 0.09));
        assert!(!fingerprint_bit(1000.0, 1000.2, 0.1, 0.09));
    }

    #[test]
    fn test_zero_previous_average() {
        assert!(fingerprint_bit(50.0, 0.0, 0.1, 10.0));
    }

    #[test]
    fn test_fingerprint_over_slots() {
        let start = NaiveDate::from_ymd_opt(2017, 8, 16)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let levels = [100.0, 100.0, 300.0, 305.0, 20.0];
        let measurements: Vec<Measurement> = levels
            .iter()
            .enumerate()
            .flat_map(|(slot, &level)| {
                (0..3).map(move |k| {
                    Measurement::scalar(
                        level,
                        start + Duration::seconds(slot as i64 * 10 + k * 3),
                    )
                })
            })
            .collect();

        let fp = fingerprint(
            &measurements,
            &TimeslotBinner::new(10),
            &FingerprintParams::default(),
        )
        .unwrap();
        assert_eq!(fp.bits, "0101");
        assert_eq!(fp.last_slot, "2017-08-16 12:00:40");
    }

    #[test]
    fn test_empty_stream_has_no_fingerprint() {
        let params = FingerprintParams::default();
        assert!(fingerprint(&[], &TimeslotBinner::new(10), &params).is_none());
    }
}
