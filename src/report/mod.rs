//! Reporting on batch runs.
//!
//! Tracks what every task produced so a run can tell whether each planned
//! pair ended up with an artifact.

pub mod stats;

// Re-export commonly used types
pub use stats::{BatchReport, RunStats, SharedRunStats, TaskFailure, TaskOutcome};
