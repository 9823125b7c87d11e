//! Execution-context configuration.

use crate::error::ConfigError;
use std::num::NonZeroUsize;

/// Tunables for an execution context.
///
/// The local-queue capacity is a compile-time parameter of
/// [`ExecutionContext`](crate::scheduler::ExecutionContext) and is therefore
/// not part of the runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedConfig {
    /// Number of workers (one local queue each).
    pub workers: usize,
    /// Upper bound on fibers moved per global-queue refill.
    pub global_batch_limit: usize,
    /// Rounds of the peer sweep before a steal attempt gives up.
    pub steal_retries: u32,
}

impl SchedConfig {
    /// Checks the configuration for values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.global_batch_limit == 0 {
            return Err(ConfigError::ZeroGlobalBatchLimit);
        }
        if self.steal_retries == 0 {
            return Err(ConfigError::ZeroStealRetries);
        }
        Ok(())
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            global_batch_limit: 32,
            steal_retries: 4,
        }
    }
}
