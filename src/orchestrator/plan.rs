//! Discovery of sensor logs and enumeration of the work of a run.

use crate::config::Config;
use crate::core::artifact::{artifact_path, Parameters};
use crate::orchestrator::modality::{Modality, TaskShape};
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of every sensor directory below the input root.
pub const SENSOR_PREFIX: &str = "Sensor-";

/// Errors that prevent a run from being planned.
#[derive(Debug)]
pub enum PlanError {
    InputRoot { path: PathBuf, message: String },
    /// An explicit pair names a sensor without a directory
    UnknownSensor(String),
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::InputRoot { path, message } => {
                write!(f, "Cannot list input root {path:?}: {message}")
            }
            PlanError::UnknownSensor(sensor) => write!(f, "Unknown sensor: {sensor}"),
        }
    }
}

impl std::error::Error for PlanError {}

/// The log file of one sensor for one modality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorLog {
    /// Sensor directory name, e.g. `Sensor-01`
    pub sensor: String,
    pub path: PathBuf,
}

/// What a task computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Per-slot metrics between two set-type logs
    SetPair { slot_secs: u64 },
    /// Sample differences between two synchronized scalar logs
    ScalarPair,
    /// Luminosity fingerprint of one sensor
    Fingerprint { slot_secs: u64 },
}

/// One unit of work: exactly one artifact (plus an optional mirror).
#[derive(Debug, Clone)]
pub struct Task {
    pub modality: Modality,
    pub kind: TaskKind,
    pub first: SensorLog,
    pub second: Option<SensorLog>,
}

impl Task {
    /// Human readable identification for logs and reports.
    pub fn label(&self) -> String {
        let sensors = match &self.second {
            Some(second) => format!("{}/{}", self.first.sensor, second.sensor),
            None => self.first.sensor.clone(),
        };
        match self.kind {
            TaskKind::SetPair { slot_secs } | TaskKind::Fingerprint { slot_secs } => {
                format!("{} {} {}s", self.modality, sensors, slot_secs)
            }
            TaskKind::ScalarPair => format!("{} {}", self.modality, sensors),
        }
    }

    /// Files read by the task.
    pub fn inputs(&self) -> Vec<PathBuf> {
        let mut inputs = vec![self.first.path.clone()];
        if let Some(second) = &self.second {
            inputs.push(second.path.clone());
        }
        inputs
    }

    /// Parameters that select the artifact directory.
    pub fn tag_parameters(&self, config: &Config) -> Parameters {
        let mut params = Parameters::new();
        match self.kind {
            TaskKind::SetPair { slot_secs } => {
                params.insert("chunk_len".to_string(), slot_secs.into());
            }
            TaskKind::ScalarPair => {}
            TaskKind::Fingerprint { slot_secs } => {
                params.insert("chunk_len".to_string(), slot_secs.into());
                params.insert("fp_len".to_string(), config.lux.fp_len.into());
                params.insert("delta_rel".to_string(), config.lux.delta_rel.into());
                params.insert("delta_abs".to_string(), config.lux.delta_abs.into());
            }
        }
        params
    }

    /// Everything that influenced the result, recorded in the metadata.
    pub fn metadata_parameters(&self, config: &Config) -> Parameters {
        let mut params = self.tag_parameters(config);
        match self.kind {
            TaskKind::SetPair { .. } => {
                params.insert("default".to_string(), config.rssi_default.into());
            }
            TaskKind::ScalarPair => {
                params.insert(
                    "sync_tolerance_ms".to_string(),
                    config.sync_tolerance_ms.into(),
                );
            }
            TaskKind::Fingerprint { .. } => {}
        }
        params
    }

    /// Where the artifact is written.
    pub fn output_path(&self, config: &Config) -> PathBuf {
        artifact_path(
            &config.output_root,
            &self.first.sensor,
            self.modality.name(),
            self.modality.family(),
            &self.tag_parameters(config),
            self.second.as_ref().map(|s| s.sensor.as_str()),
        )
    }

    /// Where the artifact is duplicated for lookup from the second sensor.
    pub fn mirror_path(&self, config: &Config) -> Option<PathBuf> {
        let second = self.second.as_ref()?;
        if !config.modalities.get(self.modality).mirror {
            return None;
        }
        Some(artifact_path(
            &config.output_root,
            &second.sensor,
            self.modality.name(),
            self.modality.family(),
            &self.tag_parameters(config),
            Some(&self.first.sensor),
        ))
    }
}

/// Accept `Sensor-01` as well as `01`.
pub fn sensor_name(s: &str) -> String {
    let s = s.trim();
    if s.starts_with(SENSOR_PREFIX) {
        s.to_string()
    } else {
        format!("{SENSOR_PREFIX}{s}")
    }
}

/// Parse a `A,B` pair argument.
pub fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once(',') {
        Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
            Ok((sensor_name(a), sensor_name(b)))
        }
        _ => Err(format!("expected two sensors separated by a comma, got '{s}'")),
    }
}

/// Sorted names of the `Sensor-*` directories below `input_root`.
pub fn discover_sensors(input_root: &Path) -> Result<Vec<String>, PlanError> {
    let entries = std::fs::read_dir(input_root).map_err(|e| PlanError::InputRoot {
        path: input_root.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut sensors: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(SENSOR_PREFIX))
        .collect();
    sensors.sort();
    Ok(sensors)
}

/// Whether `name` matches a pattern with at most one `*`.
fn matches_wildcard(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => pattern == name,
    }
}

/// Resolve a log pattern inside one sensor directory. With several matches
/// the first in sorted order wins.
pub fn find_log(sensor_dir: &Path, pattern: &str) -> Option<PathBuf> {
    let relative = Path::new(pattern);
    let file_pattern = relative.file_name()?.to_str()?;
    let dir = match relative.parent() {
        Some(parent) => sensor_dir.join(parent),
        None => sensor_dir.to_path_buf(),
    };

    if !file_pattern.contains('*') {
        let path = dir.join(file_pattern);
        return path.is_file().then_some(path);
    }

    let mut matches: Vec<PathBuf> = std::fs::read_dir(&dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| matches_wildcard(file_pattern, n))
        })
        .collect();
    matches.sort();

    if matches.len() > 1 {
        tracing::debug!(
            "{} logs match {} in {}, using {}",
            matches.len(),
            pattern,
            sensor_dir.display(),
            matches[0].display()
        );
    }
    matches.into_iter().next()
}

/// Logs of one modality for the given sensors, skipping sensors without one.
fn discover_logs(config: &Config, modality: Modality, sensors: &[String]) -> Vec<SensorLog> {
    let pattern = &config.modalities.get(modality).pattern;
    sensors
        .iter()
        .filter_map(|sensor| {
            let log = find_log(&config.input_root.join(sensor), pattern);
            if log.is_none() {
                tracing::debug!("{} has no {} log", sensor, modality);
            }
            log.map(|path| SensorLog {
                sensor: sensor.clone(),
                path,
            })
        })
        .collect()
}

/// Sensor pairs to evaluate for one modality.
fn pairs_for(
    config: &Config,
    modality: Modality,
    logs: &[SensorLog],
) -> Vec<(SensorLog, SensorLog)> {
    if config.pairs.is_empty() {
        let mut pairs = Vec::new();
        for (i, first) in logs.iter().enumerate() {
            for second in &logs[i + 1..] {
                pairs.push((first.clone(), second.clone()));
            }
        }
        return pairs;
    }

    let lookup = |sensor: &str| logs.iter().find(|log| log.sensor == sensor);
    config
        .pairs
        .iter()
        .filter_map(|(a, b)| match (lookup(a.as_str()), lookup(b.as_str())) {
            (Some(first), Some(second)) => Some((first.clone(), second.clone())),
            _ => {
                tracing::warn!("Skipping {} pair {},{}: log missing", modality, a, b);
                None
            }
        })
        .collect()
}

/// Enumerate every task of a run.
pub fn plan(config: &Config) -> Result<Vec<Task>, PlanError> {
    let discovered = discover_sensors(&config.input_root)?;
    if discovered.is_empty() {
        tracing::warn!(
            "No {}* directories in {}",
            SENSOR_PREFIX,
            config.input_root.display()
        );
    }

    for (a, b) in &config.pairs {
        for sensor in [a, b] {
            if !discovered.contains(sensor) {
                return Err(PlanError::UnknownSensor(sensor.clone()));
            }
        }
    }

    let mut tasks = Vec::new();
    for modality in config.enabled_modalities() {
        let settings = config.modalities.get(modality);

        match modality.shape() {
            TaskShape::SetPair => {
                let logs = discover_logs(config, modality, &discovered);
                let pairs = pairs_for(config, modality, &logs);
                for &slot_secs in &settings.slot_sizes {
                    for (first, second) in &pairs {
                        tasks.push(Task {
                            modality,
                            kind: TaskKind::SetPair { slot_secs },
                            first: first.clone(),
                            second: Some(second.clone()),
                        });
                    }
                }
            }
            TaskShape::ScalarPair => {
                let logs = discover_logs(config, modality, &discovered);
                for (first, second) in pairs_for(config, modality, &logs) {
                    tasks.push(Task {
                        modality,
                        kind: TaskKind::ScalarPair,
                        first,
                        second: Some(second),
                    });
                }
            }
            TaskShape::SingleSensor => {
                let sensors: Vec<String> = if config.pairs.is_empty() {
                    discovered.clone()
                } else {
                    discovered
                        .iter()
                        .filter(|s| config.pairs.iter().any(|(a, b)| a == *s || b == *s))
                        .cloned()
                        .collect()
                };
                let logs = discover_logs(config, modality, &sensors);
                for &slot_secs in &settings.slot_sizes {
                    for log in &logs {
                        tasks.push(Task {
                            modality,
                            kind: TaskKind::Fingerprint { slot_secs },
                            first: log.clone(),
                            second: None,
                        });
                    }
                }
            }
        }
    }

    tracing::info!("Planned {} tasks over {} sensors", tasks.len(), discovered.len());
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn config_for(root: &Path) -> Config {
        Config {
            input_root: root.to_path_buf(),
            output_root: root.join("results"),
            ..Config::default()
        }
    }

    #[test]
    fn test_sensor_names() {
        assert_eq!(sensor_name("01"), "Sensor-01");
        assert_eq!(sensor_name(" Sensor-07 "), "Sensor-07");
        assert_eq!(
            parse_pair("01,Sensor-02").unwrap(),
            ("Sensor-01".to_string(), "Sensor-02".to_string())
        );
        assert!(parse_pair("01").is_err());
        assert!(parse_pair("01,").is_err());
    }

    #[test]
    fn test_wildcard() {
        assert!(matches_wildcard("tmpData*", "tmpData"));
        assert!(matches_wildcard("tmpData*", "tmpData.clean"));
        assert!(!matches_wildcard("tmpData*", "humData"));
        assert!(matches_wildcard("wifi.txt.blinded", "wifi.txt.blinded"));
        assert!(!matches_wildcard("a*a", "a"));
    }

    #[test]
    fn test_find_log_picks_first_sorted_match() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sensors/luxData.raw");
        touch(dir.path(), "sensors/luxData.clean");

        let found = find_log(dir.path(), "sensors/luxData*").unwrap();
        assert!(found.ends_with("sensors/luxData.clean"));
        assert!(find_log(dir.path(), "sensors/tmpData*").is_none());
        assert!(find_log(dir.path(), "wifi/wifi.txt.blinded").is_none());
    }

    #[test]
    fn test_plan_all_pairs() {
        let dir = tempfile::tempdir().unwrap();
        for sensor in ["Sensor-01", "Sensor-02", "Sensor-03"] {
            touch(dir.path(), &format!("{sensor}/wifi/wifi.txt.blinded"));
            touch(dir.path(), &format!("{sensor}/sensors/tmpData"));
        }
        touch(dir.path(), "Sensor-01/sensors/luxData");
        touch(dir.path(), "notes/readme.txt");

        let tasks = plan(&config_for(dir.path())).unwrap();

        let wifi: Vec<&Task> = tasks.iter().filter(|t| t.modality == Modality::Wifi).collect();
        // 3 pairs x 2 slot sizes
        assert_eq!(wifi.len(), 6);
        assert_eq!(wifi[0].first.sensor, "Sensor-01");
        assert_eq!(wifi[0].second.as_ref().unwrap().sensor, "Sensor-02");

        assert_eq!(tasks.iter().filter(|t| t.modality == Modality::Temp).count(), 3);
        assert_eq!(tasks.iter().filter(|t| t.modality == Modality::Lux).count(), 6);
        assert_eq!(tasks.iter().filter(|t| t.modality == Modality::Ble).count(), 0);
    }

    #[test]
    fn test_plan_explicit_pairs() {
        let dir = tempfile::tempdir().unwrap();
        for sensor in ["Sensor-01", "Sensor-02", "Sensor-03"] {
            touch(dir.path(), &format!("{sensor}/sensors/humData"));
        }
        let mut config = config_for(dir.path());
        config.modalities.select_csv("hum").unwrap();
        config.pairs = vec![("Sensor-03".into(), "Sensor-01".into())];

        let tasks = plan(&config).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].first.sensor, "Sensor-03");

        config.pairs = vec![("Sensor-01".into(), "Sensor-09".into())];
        assert!(matches!(plan(&config), Err(PlanError::UnknownSensor(s)) if s == "Sensor-09"));
    }

    #[test]
    fn test_task_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let log = |sensor: &str| SensorLog {
            sensor: sensor.to_string(),
            path: PathBuf::from(format!("{sensor}/log")),
        };

        let task = Task {
            modality: Modality::Press,
            kind: TaskKind::ScalarPair,
            first: log("Sensor-01"),
            second: Some(log("Sensor-02")),
        };
        assert_eq!(
            task.output_path(&config),
            config
                .output_root
                .join("Sensor-01/press/temp_hum_press_shrestha/Sensor-02.json")
        );
        assert_eq!(
            task.mirror_path(&config).unwrap(),
            config
                .output_root
                .join("Sensor-02/press/temp_hum_press_shrestha/Sensor-01.json")
        );
        assert!(task.metadata_parameters(&config).contains_key("sync_tolerance_ms"));

        let task = Task {
            modality: Modality::Wifi,
            kind: TaskKind::SetPair { slot_secs: 30 },
            first: log("Sensor-01"),
            second: Some(log("Sensor-02")),
        };
        assert!(task.mirror_path(&config).is_none());
        assert!(task
            .output_path(&config)
            .ends_with("wifi/ble_wifi_truong/chunk_len-30/Sensor-02.json"));
        assert_eq!(task.label(), "wifi Sensor-01/Sensor-02 30s");

        let task = Task {
            modality: Modality::Lux,
            kind: TaskKind::Fingerprint { slot_secs: 5 },
            first: log("Sensor-04"),
            second: None,
        };
        assert!(task.output_path(&config).ends_with(
            "Sensor-04/lux/lux_miettinen/chunk_len-5/delta_abs-10.0/delta_rel-0.1/fp_len-128/\
             result.json"
        ));
    }
}
