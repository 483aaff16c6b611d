//! Distance metrics between two sensors' observations.
//!
//! Populations are compared by beacon identifier. Union-based metrics
//! substitute a default value for the side that did not see an identifier;
//! the rank metric only looks at identifiers both sides saw. All functions
//! are pure.

use crate::reader::types::{Measurement, Reading};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default signal strength for a beacon one side did not observe (dBm).
pub const DEFAULT_RSSI: f64 = -100.0;

/// Result of a distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Distance {
    Value(f64),
    /// The metric has no meaningful value for these inputs
    Undefined,
}

impl Distance {
    pub fn value(&self) -> Option<f64> {
        match self {
            Distance::Value(v) => Some(*v),
            Distance::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Distance::Undefined)
    }
}

impl From<Distance> for Option<f64> {
    fn from(d: Distance) -> Self {
        d.value()
    }
}

impl From<Option<f64>> for Distance {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Distance::Undefined, Distance::Value)
    }
}

/// Which metrics to compute for a set-type stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSet {
    /// Jaccard and Euclidean only
    Basic,
    /// Basic plus mean Hamming, mean exponential and rank metrics
    Full,
}

/// Named metric values for one timeslot.
pub type FeatureDict = BTreeMap<String, Distance>;

/// One identifier with the reading each side had for it.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPair {
    pub identifier: String,
    pub first: Reading,
    pub second: Reading,
}

impl MeasurementPair {
    fn abs_diff(&self, default: f64) -> f64 {
        (self.first.or_default(default) - self.second.or_default(default)).abs()
    }
}

/// Measurements that carry an identifier and a value.
fn identified(population: &[Measurement]) -> impl Iterator<Item = (&str, Reading)> {
    population.iter().filter_map(|m| match (&m.identifier, m.reading) {
        (Some(id), reading @ Reading::Value(_)) => Some((id.as_str(), reading)),
        _ => None,
    })
}

fn is_empty(population: &[Measurement]) -> bool {
    identified(population).next().is_none()
}

/// Identifiers seen by both populations, in the first population's order.
pub fn intersection(first: &[Measurement], second: &[Measurement]) -> Vec<MeasurementPair> {
    let lookup: HashMap<&str, Reading> = identified(second).collect();
    let mut seen = HashSet::new();

    identified(first)
        .filter(|(id, _)| seen.insert(*id))
        .filter_map(|(id, reading)| {
            lookup.get(id).map(|&other| MeasurementPair {
                identifier: id.to_string(),
                first: reading,
                second: other,
            })
        })
        .collect()
}

/// Identifiers seen by either population. The side that did not see an
/// identifier gets [`Reading::Missing`].
pub fn union(first: &[Measurement], second: &[Measurement]) -> Vec<MeasurementPair> {
    let lookup: HashMap<&str, Reading> = identified(second).collect();
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();

    for (id, reading) in identified(first) {
        if seen.insert(id) {
            pairs.push(MeasurementPair {
                identifier: id.to_string(),
                first: reading,
                second: lookup.get(id).copied().unwrap_or(Reading::Missing),
            });
        }
    }
    for (id, reading) in identified(second) {
        if seen.insert(id) {
            pairs.push(MeasurementPair {
                identifier: id.to_string(),
                first: Reading::Missing,
                second: reading,
            });
        }
    }

    pairs
}

/// `1 - |intersection| / |union|`; two empty populations are at distance 0.
pub fn jaccard(first: &[Measurement], second: &[Measurement]) -> Distance {
    let union_size = union(first, second).len();
    if union_size == 0 {
        return Distance::Value(0.0);
    }
    let shared = intersection(first, second).len();
    Distance::Value(1.0 - shared as f64 / union_size as f64)
}

/// Mean absolute signal difference over the union.
pub fn mean_hamming(first: &[Measurement], second: &[Measurement], default: f64) -> Distance {
    let pairs = union(first, second);
    if pairs.is_empty() {
        return Distance::Value(0.0);
    }
    let sum: f64 = pairs.iter().map(|p| p.abs_diff(default)).sum();
    Distance::Value(sum / pairs.len() as f64)
}

/// Square root of the summed squared signal differences over the union.
pub fn euclidean(first: &[Measurement], second: &[Measurement], default: f64) -> Distance {
    let sum: f64 = union(first, second)
        .iter()
        .map(|p| p.abs_diff(default).powi(2))
        .sum();
    Distance::Value(sum.sqrt())
}

/// Mean of `exp(|difference|)` over the union.
pub fn mean_exp_difference(
    first: &[Measurement],
    second: &[Measurement],
    default: f64,
) -> Distance {
    let pairs = union(first, second);
    if pairs.is_empty() {
        return Distance::Value(0.0);
    }
    let sum: f64 = pairs.iter().map(|p| p.abs_diff(default).exp()).sum();
    Distance::Value(sum / pairs.len() as f64)
}

/// Rank of each shared identifier within one population, ordered by
/// descending signal strength. Ties keep population order.
fn ranks<'a>(population: &'a [Measurement], shared: &HashSet<&str>) -> HashMap<&'a str, usize> {
    let mut members: Vec<(&str, f64)> = identified(population)
        .filter(|(id, _)| shared.contains(id))
        .filter_map(|(id, reading)| reading.value().map(|v| (id, v)))
        .collect();
    members.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut by_id = HashMap::new();
    for (position, (id, _)) in members.into_iter().enumerate() {
        by_id.entry(id).or_insert(position + 1);
    }
    by_id
}

/// Sum of squared rank differences over the intersection.
///
/// Undefined when the populations share no identifier, unless both are empty
/// (nothing to disagree about, distance 0).
pub fn sum_squared_ranks(first: &[Measurement], second: &[Measurement]) -> Distance {
    if is_empty(first) && is_empty(second) {
        return Distance::Value(0.0);
    }

    let shared_pairs = intersection(first, second);
    if shared_pairs.is_empty() {
        return Distance::Undefined;
    }

    let shared: HashSet<&str> = shared_pairs.iter().map(|p| p.identifier.as_str()).collect();
    let first_ranks = ranks(first, &shared);
    let second_ranks = ranks(second, &shared);

    let sum: f64 = shared_pairs
        .iter()
        .map(|p| {
            let r1 = first_ranks[p.identifier.as_str()] as f64;
            let r2 = second_ranks[p.identifier.as_str()] as f64;
            (r1 - r2).powi(2)
        })
        .sum();
    Distance::Value(sum)
}

/// Absolute difference of two synchronized scalar samples.
pub fn abs_difference(a: f64, b: f64) -> f64 {
    (a - b).abs()
}

/// Convert barometric pressure (hPa) to altitude in metres.
pub fn pressure_to_meters(pressure: f64) -> f64 {
    (1.0 - (pressure / 1013.25).powf(0.190284)) * 145336.45 * 0.3048
}

/// Compute the metric set for one pair of timeslot populations.
pub fn compute_slot_features(
    first: &[Measurement],
    second: &[Measurement],
    default: f64,
    metrics: MetricSet,
) -> FeatureDict {
    let mut features = FeatureDict::new();
    features.insert("jaccard".to_string(), jaccard(first, second));
    features.insert("euclidean".to_string(), euclidean(first, second, default));

    if metrics == MetricSet::Full {
        features.insert(
            "mean_hamming".to_string(),
            mean_hamming(first, second, default),
        );
        features.insert(
            "mean_exp".to_string(),
            mean_exp_difference(first, second, default),
        );
        features.insert(
            "sum_squared_ranks".to_string(),
            sum_squared_ranks(first, second),
        );
    }

    features
}
