//! Alignment of two independently clocked scalar streams.
//!
//! Both inputs are time ordered and sampled at roughly the same native rate.
//! The synchronizer walks them with two forward-only cursors, pairing samples
//! whose timestamps are within the tolerance and dropping the earlier sample
//! whenever they are not. Each step advances at least one cursor, so a run
//! takes at most `len(first) + len(second)` steps.

use crate::reader::types::Measurement;
use chrono::{Duration, NaiveDateTime};

/// Default maximum clock difference between two paired samples.
pub const DEFAULT_TOLERANCE_MS: u64 = 200;

/// Errors that can occur during synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// One stream ran out before any pair within tolerance was found
    SyncImpossible,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::SyncImpossible => write!(f, "No sync possible"),
        }
    }
}

impl std::error::Error for SyncError {}

/// Two index-aligned sample sequences.
#[derive(Debug, Clone)]
pub struct SyncedPair {
    pub first: Vec<Measurement>,
    pub second: Vec<Measurement>,
    /// Samples dropped while establishing or re-establishing sync
    pub skipped_samples: usize,
    /// Number of times the streams drifted out of tolerance after the
    /// initial alignment
    pub desync_episodes: usize,
    /// Loop iterations taken, bounded by the combined input length
    pub steps: usize,
}

impl SyncedPair {
    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }
}

/// Pairs samples of two scalar streams.
#[derive(Debug, Clone, Copy)]
pub struct Synchronizer {
    tolerance: Duration,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE_MS)
    }
}

impl Synchronizer {
    pub fn new(tolerance_ms: u64) -> Self {
        Self {
            tolerance: Duration::milliseconds(tolerance_ms as i64),
        }
    }

    /// Whether two timestamps are close enough to be paired.
    pub fn within_tolerance(&self, a: NaiveDateTime, b: NaiveDateTime) -> bool {
        let diff = a - b;
        diff < self.tolerance && -diff < self.tolerance
    }

    /// Align `first` and `second`, returning equal-length sequences.
    ///
    /// Fails with [`SyncError::SyncImpossible`] if either stream is exhausted
    /// before a single pair within tolerance is found. Losing sync later on is
    /// not an error: the earlier sample is dropped until the streams line up
    /// again, with one log line when sync is lost and one when it returns.
    pub fn sync(
        &self,
        first: &[Measurement],
        second: &[Measurement],
    ) -> Result<SyncedPair, SyncError> {
        let mut i = 0;
        let mut j = 0;
        let mut steps = 0;

        // Initial alignment: drop from whichever stream is behind.
        loop {
            let (Some(a), Some(b)) = (first.get(i), second.get(j)) else {
                return Err(SyncError::SyncImpossible);
            };
            if self.within_tolerance(a.timestamp, b.timestamp) {
                break;
            }
            if a.timestamp < b.timestamp {
                i += 1;
            } else {
                j += 1;
            }
            steps += 1;
        }

        let mut skipped_samples = i + j;
        let mut desync_episodes = 0;
        let mut desynced = false;
        let mut out_first = Vec::with_capacity(first.len().min(second.len()));
        let mut out_second = Vec::with_capacity(first.len().min(second.len()));

        while i < first.len() && j < second.len() {
            steps += 1;
            let (a, b) = (&first[i], &second[j]);

            if self.within_tolerance(a.timestamp, b.timestamp) {
                if desynced {
                    tracing::info!("Sync reestablished: {} {}", a.timestamp, b.timestamp);
                    desynced = false;
                }
                out_first.push(a.clone());
                out_second.push(b.clone());
                i += 1;
                j += 1;
            } else {
                if !desynced {
                    tracing::info!("Sync deteriorated: {} {}", a.timestamp, b.timestamp);
                    desynced = true;
                    desync_episodes += 1;
                }
                if a.timestamp < b.timestamp {
                    i += 1;
                } else {
                    j += 1;
                }
                skipped_samples += 1;
            }
        }

        tracing::debug!(
            "Synchronized {} sample pairs, skipped {} samples",
            out_first.len(),
            skipped_samples
        );

        Ok(SyncedPair {
            first: out_first,
            second: out_second,
            skipped_samples,
            desync_episodes,
            steps,
        })
    }
}
