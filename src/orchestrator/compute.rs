//! The computation behind one task.
//!
//! Every path through [`compute`] ends in an artifact: read failures and
//! synchronization failures are recorded in the artifact's `results`.

use crate::config::Config;
use crate::core::artifact::{MetadataBuilder, ResultEntry, SensorPairResult};
use crate::core::features::{abs_difference, compute_slot_features, pressure_to_meters};
use crate::core::lux::fingerprint;
use crate::core::sync::Synchronizer;
use crate::core::windowing::{slot_label, TimeslotBinner};
use crate::orchestrator::modality::Modality;
use crate::orchestrator::plan::{SensorLog, Task, TaskKind};
use crate::reader::parse::{LogReader, ReadError};
use crate::reader::types::Measurement;
use crate::report::stats::RunStats;
use std::collections::BTreeMap;

/// Result entry for a slot where either sensor reported a scan failure.
pub const SCAN_ERROR_MESSAGE: &str = "Scan error in sample, no feature computed";

/// Key format of synchronized scalar samples.
pub const SAMPLE_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

type Results = BTreeMap<String, ResultEntry>;

/// Compute the artifact of one task.
pub fn compute(
    task: &Task,
    config: &Config,
    metadata: &MetadataBuilder,
    stats: &RunStats,
) -> SensorPairResult {
    let mut meta = metadata.start(
        task.modality.family(),
        &task.inputs(),
        task.metadata_parameters(config),
    );

    let results = match (task.kind, &task.second) {
        (TaskKind::SetPair { slot_secs }, Some(second)) => {
            set_pair(task.modality, &task.first, second, slot_secs, config, stats)
        }
        (TaskKind::ScalarPair, Some(second)) => {
            scalar_pair(task.modality, &task.first, second, config, stats)
        }
        (TaskKind::Fingerprint { slot_secs }, _) => {
            luminosity(&task.first, slot_secs, config, stats)
        }
        (_, None) => Err("Pair task without a second sensor".to_string()),
    };

    meta.finish();
    match results {
        Ok(results) => SensorPairResult::new(meta, results),
        Err(reason) => {
            tracing::warn!("{}: {}", task.label(), reason);
            SensorPairResult::failed(meta, reason)
        }
    }
}

fn read(
    log: &SensorLog,
    modality: Modality,
    config: &Config,
    stats: &RunStats,
) -> Result<Vec<Measurement>, ReadError> {
    let reader = LogReader::new(modality.stream_kind(), config.parse_policy)
        .with_lux_cleaning(modality == Modality::Lux && config.lux.clean_outliers);
    let parsed = reader.read_path(&log.path)?;

    stats.record_lines_skipped(parsed.skipped_lines as u64);
    stats.record_scan_errors(parsed.scan_errors as u64);
    Ok(parsed.measurements)
}

fn read_both(
    modality: Modality,
    first: &SensorLog,
    second: &SensorLog,
    config: &Config,
    stats: &RunStats,
) -> Result<(Vec<Measurement>, Vec<Measurement>), String> {
    let a = read(first, modality, config, stats).map_err(|e| e.to_string())?;
    let b = read(second, modality, config, stats).map_err(|e| e.to_string())?;
    Ok((a, b))
}

/// Per-slot metrics over the slots of the first sensor.
fn set_pair(
    modality: Modality,
    first: &SensorLog,
    second: &SensorLog,
    slot_secs: u64,
    config: &Config,
    stats: &RunStats,
) -> Result<Results, String> {
    let (a, b) = read_both(modality, first, second, config, stats)?;
    let binner = TimeslotBinner::new(slot_secs);
    let slots_a = binner.bin(&a);
    let slots_b = binner.bin(&b);

    let mut results = Results::new();
    for (slot, population_a) in &slots_a {
        let entry = match slots_b.get(slot) {
            None => ResultEntry::Features(Default::default()),
            Some(population_b) => {
                let scan_error = population_a
                    .iter()
                    .chain(population_b.iter())
                    .any(|m| m.is_scan_error());
                if scan_error {
                    ResultEntry::slot_error(SCAN_ERROR_MESSAGE)
                } else {
                    ResultEntry::Features(compute_slot_features(
                        population_a,
                        population_b,
                        config.rssi_default,
                        modality.metric_set(),
                    ))
                }
            }
        };
        results.insert(slot_label(slot), entry);
    }

    Ok(results)
}

/// Absolute differences of synchronized samples.
fn scalar_pair(
    modality: Modality,
    first: &SensorLog,
    second: &SensorLog,
    config: &Config,
    stats: &RunStats,
) -> Result<Results, String> {
    let (a, b) = read_both(modality, first, second, config, stats)?;
    let synced = Synchronizer::new(config.sync_tolerance_ms)
        .sync(&a, &b)
        .map_err(|e| e.to_string())?;
    stats.record_samples_skipped(synced.skipped_samples as u64);

    let convert = |v: f64| {
        if modality == Modality::Press {
            pressure_to_meters(v)
        } else {
            v
        }
    };

    let mut results = Results::new();
    for (x, y) in synced.first.iter().zip(&synced.second) {
        let (Some(vx), Some(vy)) = (x.value(), y.value()) else {
            continue;
        };
        results.insert(
            x.timestamp.format(SAMPLE_KEY_FORMAT).to_string(),
            ResultEntry::Value(abs_difference(convert(vx), convert(vy))),
        );
    }

    Ok(results)
}

/// Fingerprint of one luminosity log.
fn luminosity(
    log: &SensorLog,
    slot_secs: u64,
    config: &Config,
    stats: &RunStats,
) -> Result<Results, String> {
    let measurements = read(log, Modality::Lux, config, stats).map_err(|e| e.to_string())?;
    let fp = fingerprint(
        &measurements,
        &TimeslotBinner::new(slot_secs),
        &config.lux.params(),
    )
    .ok_or_else(|| "No luminosity samples".to_string())?;

    let mut results = Results::new();
    results.insert(fp.last_slot, ResultEntry::Text(fp.bits));
    Ok(results)
}
