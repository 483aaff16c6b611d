//! The sensor modalities the engine knows how to compare.

use crate::core::features::MetricSet;
use crate::reader::types::StreamKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One kind of sensor log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Wifi,
    Ble,
    Temp,
    Hum,
    Press,
    Lux,
}

/// How a modality turns logs into artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskShape {
    /// Two sensors, binned into timeslots, compared per slot
    SetPair,
    /// Two sensors, synchronized sample by sample
    ScalarPair,
    /// One sensor on its own
    SingleSensor,
}

impl Modality {
    pub const ALL: [Modality; 6] = [
        Modality::Wifi,
        Modality::Ble,
        Modality::Temp,
        Modality::Hum,
        Modality::Press,
        Modality::Lux,
    ];

    /// Directory name used in artifact paths.
    pub fn name(&self) -> &'static str {
        match self {
            Modality::Wifi => "wifi",
            Modality::Ble => "ble",
            Modality::Temp => "temp",
            Modality::Hum => "hum",
            Modality::Press => "press",
            Modality::Lux => "lux",
        }
    }

    /// Feature family, recorded as `generator_script` and used as a path segment.
    pub fn family(&self) -> &'static str {
        match self {
            Modality::Wifi | Modality::Ble => "ble_wifi_truong",
            Modality::Temp | Modality::Hum | Modality::Press => "temp_hum_press_shrestha",
            Modality::Lux => "lux_miettinen",
        }
    }

    pub fn stream_kind(&self) -> StreamKind {
        match self {
            Modality::Wifi | Modality::Ble => StreamKind::Set,
            _ => StreamKind::Scalar,
        }
    }

    pub fn shape(&self) -> TaskShape {
        match self {
            Modality::Wifi | Modality::Ble => TaskShape::SetPair,
            Modality::Temp | Modality::Hum | Modality::Press => TaskShape::ScalarPair,
            Modality::Lux => TaskShape::SingleSensor,
        }
    }

    /// Log location relative to a sensor directory. The last component may
    /// contain one `*`.
    pub fn default_pattern(&self) -> &'static str {
        match self {
            Modality::Wifi => "wifi/wifi.txt.blinded",
            Modality::Ble => "ble/ble.txt.blinded",
            Modality::Temp => "sensors/tmpData*",
            Modality::Hum => "sensors/humData*",
            Modality::Press => "sensors/barData*",
            Modality::Lux => "sensors/luxData*",
        }
    }

    /// Timeslot widths evaluated by default (seconds). Empty for
    /// synchronized modalities.
    pub fn default_slot_sizes(&self) -> Vec<u64> {
        match self.shape() {
            TaskShape::SetPair => vec![10, 30],
            TaskShape::ScalarPair => Vec::new(),
            TaskShape::SingleSensor => vec![5, 10, 15, 30, 60, 120],
        }
    }

    /// Whether pair artifacts are also written under the second sensor.
    pub fn default_mirror(&self) -> bool {
        self.shape() == TaskShape::ScalarPair
    }

    pub fn metric_set(&self) -> MetricSet {
        match self {
            Modality::Wifi => MetricSet::Full,
            _ => MetricSet::Basic,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Modality::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown modality '{s}'"))
    }
}
