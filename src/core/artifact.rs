//! Result artifacts and their reproducibility metadata.
//!
//! Every computed feature set is written as one JSON document holding a
//! `metadata` block (input digests, generator revision, parameters, timing)
//! and a `results` map. Artifacts live under a fixed directory grammar that
//! downstream tooling depends on:
//!
//! `<root>/Sensor-<id>/<modality>/<family>/<key-value>/.../Sensor-<other>.json`

use crate::core::features::FeatureDict;
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

/// Format of `created_on`.
pub const CREATED_ON_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of `processing_start` and `processing_end`.
pub const PROCESSING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// File name for artifacts that describe a single sensor.
pub const SINGLE_SENSOR_FILE: &str = "result.json";

/// A parameter value as it appears in metadata and in the directory tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(u64),
    Float(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            // Integral floats keep their decimal point (10.0, not 10)
            ParamValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            ParamValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as u64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

/// Named parameters, kept sorted.
pub type Parameters = BTreeMap<String, ParamValue>;

/// Render parameters as nested `key-value` directory segments, sorted by key.
pub fn parameter_tag(params: &Parameters) -> PathBuf {
    params
        .iter()
        .map(|(key, value)| format!("{key}-{value}"))
        .collect()
}

/// Path of an artifact below the output root.
///
/// `other` names the second sensor of a pair; single-sensor artifacts are
/// written as `result.json`.
pub fn artifact_path(
    output_root: &Path,
    sensor: &str,
    modality: &str,
    family: &str,
    params: &Parameters,
    other: Option<&str>,
) -> PathBuf {
    let file = match other {
        Some(other) => format!("{other}.json"),
        None => SINGLE_SENSOR_FILE.to_string(),
    };
    output_root
        .join(sensor)
        .join(modality)
        .join(family)
        .join(parameter_tag(params))
        .join(file)
}

/// Errors that can occur while persisting an artifact.
#[derive(Debug)]
pub enum ArtifactError {
    Io { path: PathBuf, message: String },
    Serialize(String),
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactError::Io { path, message } => {
                write!(f, "IO error writing {path:?}: {message}")
            }
            ArtifactError::Serialize(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for ArtifactError {}

/// Where the artifact was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub arch: String,
    pub host: String,
    pub name: String,
    pub os: String,
    pub version: String,
}

impl SystemInfo {
    pub fn detect() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            arch: std::env::consts::ARCH.to_string(),
            host,
            name: env!("CARGO_PKG_NAME").to_string(),
            os: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Reproducibility metadata embedded in every artifact.
///
/// Fields are declared in alphabetical order so the serialized object has
/// sorted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub created_on: String,
    pub generator_script: String,
    pub generator_version: String,
    pub parameters: Parameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_end: Option<String>,
    pub processing_start: String,
    pub run_id: Uuid,
    /// Input path to SHA-1 hex digest
    pub source_files: BTreeMap<String, String>,
    pub system: SystemInfo,
}

impl Metadata {
    /// Stamp the end of processing.
    pub fn finish(&mut self) {
        self.processing_end = Some(Local::now().format(PROCESSING_TIME_FORMAT).to_string());
    }
}

/// One entry of an artifact's `results` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEntry {
    /// Metric values for one timeslot
    Features(FeatureDict),
    /// Difference of one synchronized sample pair
    Value(f64),
    /// Per-slot failure, e.g. a scan error in either population
    SlotError { error: String },
    /// Fingerprint bits, or the reason a whole task failed
    Text(String),
}

impl ResultEntry {
    pub fn slot_error(message: impl Into<String>) -> Self {
        ResultEntry::SlotError {
            error: message.into(),
        }
    }
}

/// Key under which a task-level failure is recorded in `results`.
pub const ERROR_KEY: &str = "error";

/// A complete artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPairResult {
    pub metadata: Metadata,
    pub results: BTreeMap<String, ResultEntry>,
}

impl SensorPairResult {
    pub fn new(metadata: Metadata, results: BTreeMap<String, ResultEntry>) -> Self {
        Self { metadata, results }
    }

    /// An artifact recording that the whole task failed.
    pub fn failed(metadata: Metadata, reason: impl Into<String>) -> Self {
        let mut results = BTreeMap::new();
        results.insert(ERROR_KEY.to_string(), ResultEntry::Text(reason.into()));
        Self { metadata, results }
    }

    /// The reason recorded for a task-level failure, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        match self.results.get(ERROR_KEY) {
            Some(ResultEntry::Text(reason)) if self.results.len() == 1 => Some(reason.as_str()),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure_reason().is_some()
    }

    /// Serialize with four-space indentation.
    pub fn to_json(&self) -> Result<String, ArtifactError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .map_err(|e| ArtifactError::Serialize(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| ArtifactError::Serialize(e.to_string()))
    }

    /// Write the artifact, creating parent directories. An existing file is
    /// replaced.
    pub fn write_to(&self, path: &Path) -> Result<(), ArtifactError> {
        let io_error = |e: std::io::Error| ArtifactError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        if path.is_file() {
            tracing::warn!("Output file {} already exists, overwriting", path.display());
        }

        let json = self.to_json()?;
        fs::write(path, json).map_err(io_error)
    }
}

/// Builds [`Metadata`] for the artifacts of one run.
///
/// Revision and system information are detected once; each task then only
/// hashes its own inputs.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    run_id: Uuid,
    generator_version: String,
    system: SystemInfo,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generator_version: generator_version(),
            system: SystemInfo::detect(),
        }
    }

    /// Override the detected generator version.
    pub fn with_generator_version(mut self, version: impl Into<String>) -> Self {
        self.generator_version = version.into();
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn generator_version(&self) -> &str {
        &self.generator_version
    }

    /// Start the metadata of one task: hash its inputs and stamp the start
    /// of processing. Files that cannot be hashed are recorded with the
    /// reason instead of a digest.
    pub fn start(&self, family: &str, files: &[PathBuf], parameters: Parameters) -> Metadata {
        let now = Local::now();
        let source_files = files
            .iter()
            .map(|file| {
                let digest = hash_file(file).unwrap_or_else(|e| {
                    tracing::warn!("Could not hash {}: {}", file.display(), e);
                    format!("unreadable: {e}")
                });
                (file.display().to_string(), digest)
            })
            .collect();

        Metadata {
            created_on: now.format(CREATED_ON_FORMAT).to_string(),
            generator_script: family.to_string(),
            generator_version: self.generator_version.clone(),
            parameters,
            processing_end: None,
            processing_start: now.format(PROCESSING_TIME_FORMAT).to_string(),
            run_id: self.run_id,
            source_files,
            system: self.system.clone(),
        }
    }
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-1 hex digest of a file's content.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// `git+<sha>`, suffixed `~dirty` with uncommitted changes. Falls back to the
/// crate version outside a git checkout.
fn generator_version() -> String {
    let Some(revision) = git_revision() else {
        return format!("cargo+{}", env!("CARGO_PKG_VERSION"));
    };

    let clean = Command::new("git")
        .args(["diff-index", "--quiet", "HEAD"])
        .status()
        .map(|s| s.success())
        .unwrap_or(true);

    if clean {
        format!("git+{revision}")
    } else {
        tracing::warn!("Reproducibility limited: uncommitted changes");
        format!("git+{revision}~dirty")
    }
}

fn git_revision() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let revision = String::from_utf8(output.stdout).ok()?;
    let revision = revision.trim();
    (!revision.is_empty()).then(|| revision.to_string())
}
