//! Core computations of the feature engine.
//!
//! This module contains:
//! - Timeslot binning of measurement streams
//! - Synchronization of independently clocked scalar streams
//! - Distance metrics between populations
//! - Luminosity fingerprints
//! - Result artifacts and their metadata

pub mod artifact;
pub mod features;
pub mod lux;
pub mod sync;
pub mod windowing;

// Re-export commonly used types
pub use artifact::{
    artifact_path, parameter_tag, ArtifactError, Metadata, MetadataBuilder, ParamValue,
    Parameters, ResultEntry, SensorPairResult,
};
pub use features::{compute_slot_features, Distance, FeatureDict, MetricSet, DEFAULT_RSSI};
pub use lux::{fingerprint, Fingerprint, FingerprintParams};
pub use sync::{SyncError, SyncedPair, Synchronizer, DEFAULT_TOLERANCE_MS};
pub use windowing::{slot_label, TimeslotBinner, TimeslotMap};
