//! Pairwise orchestration of a batch run.
//!
//! This module contains:
//! - The modality table (log location, feature family, slot sizes)
//! - Discovery of sensor logs and planning of tasks
//! - The computation behind one task
//! - The bounded worker pool

pub mod compute;
pub mod modality;
pub mod plan;
pub mod pool;

// Re-export commonly used types
pub use modality::{Modality, TaskShape};
pub use plan::{parse_pair, plan, PlanError, SensorLog, Task, TaskKind};
pub use pool::WorkerPool;
