//! Error types.
//!
//! The scheduler core has very few fallible surfaces: an empty queue is an
//! `Option::None`, never an error, and queue-protocol contract breaches
//! abort via assertions because no caller can meaningfully recover from
//! them. What remains is configuration validation and worker lookup.

use core::fmt;

/// A configuration value the scheduler cannot run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `workers` was zero; a context needs at least one worker.
    ZeroWorkers,
    /// `global_batch_limit` was zero; refills could never make progress.
    ZeroGlobalBatchLimit,
    /// `steal_retries` was zero; an idle worker could never steal.
    ZeroStealRetries,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroWorkers => write!(f, "worker count must be at least 1"),
            Self::ZeroGlobalBatchLimit => {
                write!(f, "global batch limit must be at least 1")
            }
            Self::ZeroStealRetries => write!(f, "steal retries must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Misuse of an execution context's scheduler-facing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// A worker index outside the context's range.
    WorkerIndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of workers the context holds.
        workers: usize,
    },
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerIndexOutOfRange { index, workers } => {
                write!(f, "worker index {index} out of range (context has {workers})")
            }
        }
    }
}

impl std::error::Error for SchedError {}
