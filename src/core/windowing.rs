//! Fixed-width timeslot binning of measurement streams.
//!
//! Measurements are grouped by `floor(timestamp / S) * S`. Repeated sightings
//! of one identifier inside a slot collapse into their mean, and every slot
//! between the first and last observed one is present in the output, empty if
//! nothing was seen in it.

use crate::reader::types::{Measurement, Reading};
use chrono::{Duration, NaiveDateTime};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Slot key (start of the slot) to the measurements observed in it.
pub type TimeslotMap = BTreeMap<NaiveDateTime, Vec<Measurement>>;

/// Label format for slot keys in result artifacts.
pub const SLOT_LABEL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a slot key the way result artifacts expect it.
pub fn slot_label(slot: &NaiveDateTime) -> String {
    slot.format(SLOT_LABEL_FORMAT).to_string()
}

/// Groups measurements into fixed-width timeslots.
#[derive(Debug, Clone, Copy)]
pub struct TimeslotBinner {
    slot_secs: i64,
}

impl TimeslotBinner {
    /// Create a binner with the given slot width in seconds.
    ///
    /// The width must be non-zero; `Config::validate` rejects zero widths.
    pub fn new(slot_secs: u64) -> Self {
        debug_assert!(slot_secs > 0, "timeslot width must be positive");
        Self {
            slot_secs: slot_secs.max(1) as i64,
        }
    }

    pub fn slot_secs(&self) -> u64 {
        self.slot_secs as u64
    }

    /// Truncate a timestamp to the start of its slot.
    pub fn slot_key(&self, timestamp: NaiveDateTime) -> NaiveDateTime {
        let utc = timestamp.and_utc();
        let into_slot = utc.timestamp().rem_euclid(self.slot_secs);
        timestamp
            - Duration::seconds(into_slot)
            - Duration::nanoseconds(i64::from(utc.timestamp_subsec_nanos()))
    }

    /// Bin a measurement stream: group, merge duplicate identifiers, gap-fill.
    pub fn bin(&self, measurements: &[Measurement]) -> TimeslotMap {
        let mut slots = TimeslotMap::new();
        for measurement in measurements {
            slots
                .entry(self.slot_key(measurement.timestamp))
                .or_default()
                .push(measurement.clone());
        }

        for (slot, population) in slots.iter_mut() {
            *population = merge_duplicates(*slot, std::mem::take(population));
        }

        self.fill_gaps(&mut slots);
        slots
    }

    /// Insert an empty population for every missing slot between the first
    /// and the last key.
    fn fill_gaps(&self, slots: &mut TimeslotMap) {
        let (Some(first), Some(last)) = (
            slots.keys().next().copied(),
            slots.keys().next_back().copied(),
        ) else {
            return;
        };

        let step = Duration::seconds(self.slot_secs);
        let mut current = first + step;
        while current < last {
            slots.entry(current).or_default();
            current += step;
        }
    }
}

/// Replace repeated sightings of one identifier by a single measurement
/// holding the mean value, stamped with the slot start. Scan errors are kept
/// once; anonymous scalar readings pass through untouched.
fn merge_duplicates(slot: NaiveDateTime, population: Vec<Measurement>) -> Vec<Measurement> {
    let mut order: Vec<String> = Vec::new();
    let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut merged = Vec::with_capacity(population.len());
    let mut saw_scan_error = false;

    for measurement in population {
        match (&measurement.identifier, measurement.reading) {
            (Some(identifier), Reading::Value(v)) => {
                let seen = values.entry(identifier.clone()).or_default();
                if seen.is_empty() {
                    order.push(identifier.clone());
                }
                seen.push(v);
            }
            (_, Reading::ScanError) => {
                if !saw_scan_error {
                    saw_scan_error = true;
                    merged.push(measurement);
                }
            }
            _ => merged.push(measurement),
        }
    }

    for identifier in order {
        let observed = &values[&identifier];
        let value = if observed.len() == 1 {
            observed[0]
        } else {
            observed.iter().mean()
        };
        merged.push(Measurement::beacon(identifier, value, slot));
    }

    merged
}
