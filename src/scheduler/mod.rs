//! Work-stealing scheduler core.
//!
//! One [`ExecutionContext`] groups a set of workers around a shared
//! [`GlobalQueue`]. Each worker owns a bounded lock-free [`LocalQueue`];
//! peers reach into it only through [`Stealer`] handles. Batches move
//! between queues as intrusive [`FiberChain`]s.

pub mod chain;
pub mod global_queue;
pub mod run_queue;
pub mod worker;

pub use chain::FiberChain;
pub use global_queue::GlobalQueue;
pub use run_queue::{LocalQueue, Stealer};
pub use worker::{Worker, WorkerId};

use crate::config::SchedConfig;
use crate::error::{ConfigError, SchedError};
use crate::fiber::FiberHandle;
use std::sync::Arc;
use tracing::debug;

/// Default ring capacity for contexts that do not pick their own.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A set of workers sharing one global overflow queue.
///
/// The context wires the queues together; driving the workers (threads,
/// parking, fiber resumption) belongs to the embedding runtime, which calls
/// [`ExecutionContext::take_workers`] and moves each worker onto its thread.
#[derive(Debug)]
pub struct ExecutionContext<const N: usize = DEFAULT_QUEUE_CAPACITY> {
    global: Arc<GlobalQueue>,
    // Workers are moved out when the runtime starts its threads.
    workers: Vec<Worker<N>>,
}

impl<const N: usize> ExecutionContext<N> {
    /// Builds a context with `config.workers` wired workers.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] the configuration fails on.
    pub fn new(config: SchedConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let global = Arc::new(GlobalQueue::new());
        let locals: Vec<LocalQueue<N>> = (0..config.workers)
            .map(|_| LocalQueue::new(Arc::clone(&global)))
            .collect();
        let stealers: Vec<Stealer<N>> = locals.iter().map(LocalQueue::stealer).collect();

        let workers = locals
            .into_iter()
            .enumerate()
            .map(|(id, local)| {
                let peers: Vec<Stealer<N>> = stealers
                    .iter()
                    .enumerate()
                    .filter(|(peer_id, _)| *peer_id != id)
                    .map(|(_, stealer)| stealer.clone())
                    .collect();
                Worker::new(
                    id,
                    local,
                    Arc::clone(&global),
                    peers,
                    config.workers,
                    config.steal_retries,
                    config.global_batch_limit,
                )
            })
            .collect();

        debug!(workers = config.workers, capacity = N, "execution context ready");
        Ok(Self { global, workers })
    }

    /// Injects a fiber from outside any worker thread.
    ///
    /// Goes straight to the global queue; a worker picks it up on its next
    /// refill or periodic poll.
    pub fn spawn(&self, fiber: FiberHandle) {
        debug!(fiber = %fiber.id(), "fiber injected into global queue");
        self.global.push_fiber(fiber);
    }

    /// The shared overflow queue.
    #[must_use]
    pub fn global(&self) -> &Arc<GlobalQueue> {
        &self.global
    }

    /// Number of workers still held by the context.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Mutable access to one worker, for single-threaded embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::WorkerIndexOutOfRange`] for an invalid index.
    pub fn worker_mut(&mut self, index: usize) -> Result<&mut Worker<N>, SchedError> {
        let workers = self.workers.len();
        self.workers
            .get_mut(index)
            .ok_or(SchedError::WorkerIndexOutOfRange { index, workers })
    }

    /// Moves the workers out so the runtime can distribute them to threads.
    ///
    /// Subsequent calls return an empty vector.
    pub fn take_workers(&mut self) -> Vec<Worker<N>> {
        std::mem::take(&mut self.workers)
    }
}

#[cfg(all(test, not(filament_loom)))]
mod tests {
    use super::*;

    #[test]
    fn context_rejects_invalid_config() {
        let config = SchedConfig {
            workers: 0,
            ..SchedConfig::default()
        };
        assert!(matches!(
            ExecutionContext::<8>::new(config),
            Err(ConfigError::ZeroWorkers)
        ));
    }

    #[test]
    fn workers_are_wired_against_all_peers() {
        let mut cx = ExecutionContext::<8>::new(SchedConfig {
            workers: 4,
            ..SchedConfig::default()
        })
        .expect("valid config");
        assert_eq!(cx.worker_count(), 4);

        let workers = cx.take_workers();
        assert_eq!(workers.len(), 4);
        assert!(cx.take_workers().is_empty());
    }

    #[test]
    fn worker_mut_bounds_check() {
        let mut cx = ExecutionContext::<8>::new(SchedConfig {
            workers: 1,
            ..SchedConfig::default()
        })
        .expect("valid config");
        assert!(cx.worker_mut(0).is_ok());
        assert!(matches!(
            cx.worker_mut(3),
            Err(SchedError::WorkerIndexOutOfRange { index: 3, workers: 1 })
        ));
    }

    #[test]
    fn spawn_lands_in_global_queue() {
        let cx = ExecutionContext::<8>::new(SchedConfig {
            workers: 1,
            ..SchedConfig::default()
        })
        .expect("valid config");
        cx.spawn(FiberHandle::new());
        assert_eq!(cx.global().len(), 1);
    }
}
