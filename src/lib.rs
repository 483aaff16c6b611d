//! Colocation Features - pairwise feature extraction from distributed sensor logs.
//!
//! This library turns raw logs captured by many independently clocked
//! sensors (WiFi and BLE beacon scans, luminosity, temperature, humidity,
//! barometric pressure) into per-pair similarity features, the input for
//! classifiers deciding whether two devices share a location.
//!
//! # Guarantees
//!
//! - **Scan failures are explicit**: hardware failure records become marker
//!   measurements, so "no beacons seen" and "no scan" stay distinguishable
//! - **No implicit gaps**: binned streams contain every slot between the
//!   first and the last observation
//! - **Bounded synchronization**: aligning two streams takes at most
//!   `len(a) + len(b)` steps
//! - **Failure isolation**: every planned pair ends with an artifact, even
//!   when its computation fails
//! - **Reproducibility**: every artifact records input digests, revision and
//!   parameters
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Colocation Features                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌─────────────┐        │
//! │  │   Reader    │──▶│ Binner/Sync  │──▶│  Metrics    │        │
//! │  │ (raw logs)  │   │ (slots/pairs)│   │ (distances) │        │
//! │  └─────────────┘   └──────────────┘   └─────────────┘        │
//! │         ▲                                    │               │
//! │         │                                    ▼               │
//! │  ┌─────────────┐                     ┌─────────────┐         │
//! │  │ Worker pool │────────────────────▶│  Artifact   │         │
//! │  │ (per pair)  │                     │ + metadata  │         │
//! │  └─────────────┘                     └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use colocation_features::{config::Config, orchestrator};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(Config::load()?);
//! let tasks = orchestrator::plan(&config)?;
//! let report = orchestrator::WorkerPool::new(config).run(tasks).await;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod orchestrator;
pub mod reader;
pub mod report;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, LuxConfig, ModalitiesConfig, ModalityConfig};
pub use core::{
    Distance, FeatureDict, MetadataBuilder, ResultEntry, SensorPairResult, SyncError,
    Synchronizer, TimeslotBinner,
};
pub use orchestrator::{Modality, PlanError, Task, WorkerPool};
pub use reader::{LogReader, Measurement, ParsePolicy, Reading, StreamKind};
pub use report::{BatchReport, RunStats, TaskOutcome};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
