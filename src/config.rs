//! Configuration for the colocation feature engine.

use crate::core::features::DEFAULT_RSSI;
use crate::core::lux::FingerprintParams;
use crate::core::sync::DEFAULT_TOLERANCE_MS;
use crate::orchestrator::modality::{Modality, TaskShape};
use crate::reader::parse::ParsePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Slot widths must divide an hour so slots line up across runs.
const SECONDS_PER_HOUR: u64 = 3600;

/// Main configuration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the `Sensor-*` directories
    pub input_root: PathBuf,

    /// Directory receiving the artifacts
    pub output_root: PathBuf,

    /// Worker pool size, 0 for the number of CPUs
    pub workers: usize,

    /// Wall-clock limit per task (seconds), none for unlimited
    #[serde(with = "optional_duration_serde")]
    pub task_timeout: Option<Duration>,

    /// What to do with malformed log lines
    pub parse_policy: ParsePolicy,

    /// Signal strength assumed for beacons one sensor did not see
    pub rssi_default: f64,

    /// Maximum clock difference of paired scalar samples
    pub sync_tolerance_ms: u64,

    /// Explicit sensor pairs; all pairs when empty
    pub pairs: Vec<(String, String)>,

    /// Per-modality settings
    pub modalities: ModalitiesConfig,

    /// Luminosity fingerprint settings
    pub lux: LuxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("."),
            output_root: PathBuf::from("results"),
            workers: 0,
            task_timeout: None,
            parse_policy: ParsePolicy::Skip,
            rssi_default: DEFAULT_RSSI,
            sync_tolerance_ms: DEFAULT_TOLERANCE_MS,
            pairs: Vec::new(),
            modalities: ModalitiesConfig::default(),
            lux: LuxConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("colocation-features")
            .join("config.json")
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Modalities that are switched on, in canonical order.
    pub fn enabled_modalities(&self) -> Vec<Modality> {
        Modality::ALL
            .into_iter()
            .filter(|m| self.modalities.get(*m).enabled)
            .collect()
    }

    /// Check the configuration before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.input_root.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "input root {} is not a directory",
                self.input_root.display()
            )));
        }
        if self.sync_tolerance_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync tolerance must be positive".to_string(),
            ));
        }
        if !self.rssi_default.is_finite() {
            return Err(ConfigError::Invalid(
                "default signal strength must be finite".to_string(),
            ));
        }
        if let Some(timeout) = self.task_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::Invalid(
                    "task timeout must be positive".to_string(),
                ));
            }
        }
        self.lux.validate()?;

        for modality in self.enabled_modalities() {
            let settings = self.modalities.get(modality);
            if settings.pattern.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{modality}: empty log pattern")));
            }
            if settings.pattern.matches('*').count() > 1 {
                return Err(ConfigError::Invalid(format!(
                    "{modality}: pattern may contain at most one '*'"
                )));
            }
            if modality.shape() != TaskShape::ScalarPair && settings.slot_sizes.is_empty() {
                return Err(ConfigError::Invalid(format!("{modality}: no slot sizes")));
            }
            for &slot in &settings.slot_sizes {
                if slot == 0 || SECONDS_PER_HOUR % slot != 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{modality}: slot size {slot}s does not divide an hour"
                    )));
                }
            }
        }

        for (a, b) in &self.pairs {
            if a == b {
                return Err(ConfigError::Invalid(format!("pair {a},{b} names one sensor twice")));
            }
        }

        Ok(())
    }
}

/// Settings of one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityConfig {
    pub enabled: bool,
    /// Log location relative to a `Sensor-*` directory
    pub pattern: String,
    /// Timeslot widths in seconds
    pub slot_sizes: Vec<u64>,
    /// Also write pair artifacts under the second sensor
    pub mirror: bool,
}

impl ModalityConfig {
    pub fn defaults_for(modality: Modality) -> Self {
        Self {
            enabled: true,
            pattern: modality.default_pattern().to_string(),
            slot_sizes: modality.default_slot_sizes(),
            mirror: modality.default_mirror(),
        }
    }
}

/// Settings of all modalities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalitiesConfig {
    pub wifi: ModalityConfig,
    pub ble: ModalityConfig,
    pub temp: ModalityConfig,
    pub hum: ModalityConfig,
    pub press: ModalityConfig,
    pub lux: ModalityConfig,
}

impl Default for ModalitiesConfig {
    fn default() -> Self {
        Self {
            wifi: ModalityConfig::defaults_for(Modality::Wifi),
            ble: ModalityConfig::defaults_for(Modality::Ble),
            temp: ModalityConfig::defaults_for(Modality::Temp),
            hum: ModalityConfig::defaults_for(Modality::Hum),
            press: ModalityConfig::defaults_for(Modality::Press),
            lux: ModalityConfig::defaults_for(Modality::Lux),
        }
    }
}

impl ModalitiesConfig {
    pub fn get(&self, modality: Modality) -> &ModalityConfig {
        match modality {
            Modality::Wifi => &self.wifi,
            Modality::Ble => &self.ble,
            Modality::Temp => &self.temp,
            Modality::Hum => &self.hum,
            Modality::Press => &self.press,
            Modality::Lux => &self.lux,
        }
    }

    pub fn get_mut(&mut self, modality: Modality) -> &mut ModalityConfig {
        match modality {
            Modality::Wifi => &mut self.wifi,
            Modality::Ble => &mut self.ble,
            Modality::Temp => &mut self.temp,
            Modality::Hum => &mut self.hum,
            Modality::Press => &mut self.press,
            Modality::Lux => &mut self.lux,
        }
    }

    /// Enable exactly the modalities named in a comma-separated string
    /// (`all` enables every one).
    pub fn select_csv(&mut self, s: &str) -> Result<(), ConfigError> {
        let names: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let all = names.iter().any(|n| n == "all");

        let mut selected = Vec::new();
        for name in names.iter().filter(|n| !n.is_empty() && *n != "all") {
            let modality: Modality = name.parse().map_err(ConfigError::Invalid)?;
            selected.push(modality);
        }

        for modality in Modality::ALL {
            self.get_mut(modality).enabled = all || selected.contains(&modality);
        }
        Ok(())
    }

    /// Check if at least one modality is enabled.
    pub fn any_enabled(&self) -> bool {
        Modality::ALL.into_iter().any(|m| self.get(m).enabled)
    }
}

/// Luminosity fingerprint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuxConfig {
    /// Nominal fingerprint length, recorded in the path tag
    pub fp_len: usize,
    pub delta_rel: f64,
    pub delta_abs: f64,
    /// Replace isolated 13.6 readings before fingerprinting
    pub clean_outliers: bool,
}

impl Default for LuxConfig {
    fn default() -> Self {
        let params = FingerprintParams::default();
        Self {
            fp_len: params.fp_len,
            delta_rel: params.delta_rel,
            delta_abs: params.delta_abs,
            clean_outliers: false,
        }
    }
}

impl LuxConfig {
    pub fn params(&self) -> FingerprintParams {
        FingerprintParams {
            delta_rel: self.delta_rel,
            delta_abs: self.delta_abs,
            fp_len: self.fp_len,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("delta_rel", self.delta_rel), ("delta_abs", self.delta_abs)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "lux {name} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for an optional Duration in whole seconds.
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
