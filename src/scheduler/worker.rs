//! Per-worker scheduling façade.
//!
//! A `Worker` owns one local runnable queue and knows how to find the next
//! fiber to run: local ring first, then a batch refill from the global
//! queue, then a randomized sweep over its peers' queues. Thread management
//! and the actual resume of a fiber belong to the embedding runtime; the
//! worker only decides *which* fiber runs next.

use crate::fiber::FiberHandle;
use crate::scheduler::global_queue::GlobalQueue;
use crate::scheduler::run_queue::{LocalQueue, Stealer};
use crate::util::DetRng;
use std::sync::Arc;
use tracing::trace;

/// Every this many dispatches the global queue is polled before the local
/// ring, so globally injected fibers cannot starve behind a busy worker.
const GLOBAL_POLL_INTERVAL: u32 = 61;

/// Identifier of a worker within its execution context.
pub type WorkerId = usize;

/// A single worker's view of the scheduler.
pub struct Worker<const N: usize> {
    id: WorkerId,
    local: LocalQueue<N>,
    global: Arc<GlobalQueue>,
    /// Stealers for every peer queue, excluding this worker's own.
    peers: Vec<Stealer<N>>,
    /// Total worker count in the context, for the refill fairness divisor.
    workers: usize,
    rng: DetRng,
    steal_retries: u32,
    global_batch_limit: usize,
    tick: u32,
}

impl<const N: usize> Worker<N> {
    pub(crate) fn new(
        id: WorkerId,
        local: LocalQueue<N>,
        global: Arc<GlobalQueue>,
        peers: Vec<Stealer<N>>,
        workers: usize,
        steal_retries: u32,
        global_batch_limit: usize,
    ) -> Self {
        Self {
            id,
            local,
            global,
            peers,
            workers,
            rng: DetRng::new(id as u64 + 1),
            steal_retries,
            global_batch_limit,
            tick: 0,
        }
    }

    /// This worker's id within its context.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The worker's local queue.
    #[must_use]
    pub fn local(&self) -> &LocalQueue<N> {
        &self.local
    }

    /// Makes `fiber` runnable on this worker.
    ///
    /// Goes to the local ring; when the ring is full, half of it plus the
    /// fiber overflow to the global queue.
    pub fn enqueue(&self, fiber: FiberHandle) {
        self.local.push(fiber);
    }

    /// Picks the next fiber to run, or `None` when the whole context is out
    /// of visible work.
    ///
    /// Search order: periodic global poll (fairness), local ring, global
    /// refill, then stealing from peers.
    #[must_use]
    pub fn next(&mut self) -> Option<FiberHandle> {
        self.tick = self.tick.wrapping_add(1);
        if self.tick % GLOBAL_POLL_INTERVAL == 0 {
            if let Some(fiber) = self.refill_from_global() {
                return Some(fiber);
            }
        }

        if let Some(fiber) = self.local.pop() {
            return Some(fiber);
        }
        if let Some(fiber) = self.refill_from_global() {
            return Some(fiber);
        }
        self.steal()
    }

    /// Pulls a fair share of the global queue into the local ring and
    /// returns the first fiber of the batch.
    fn refill_from_global(&mut self) -> Option<FiberHandle> {
        if self.global.is_empty() {
            return None;
        }
        let fair_share = self.global.len() / self.workers + 1;
        let max = fair_share.min(self.global_batch_limit);
        self.global.pop_batch(&self.local, max)
    }

    /// Sweeps the peer queues in randomized order, a bounded number of
    /// rounds, then falls back to one last global poll.
    fn steal(&mut self) -> Option<FiberHandle> {
        if self.peers.is_empty() {
            return None;
        }
        for _ in 0..self.steal_retries {
            let start = self.rng.next_usize(self.peers.len());
            for offset in 0..self.peers.len() {
                let victim = &self.peers[(start + offset) % self.peers.len()];
                if victim.is_empty() {
                    continue;
                }
                if let Some(fiber) = self.local.steal_from(victim) {
                    trace!(worker = self.id, fiber = %fiber.id(), "stole runnable fiber");
                    return Some(fiber);
                }
            }
        }
        // A victim may have spilled to the global queue while we swept.
        self.refill_from_global()
    }
}

impl<const N: usize> core::fmt::Debug for Worker<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("local_len", &self.local.len())
            .finish()
    }
}

#[cfg(all(test, not(filament_loom)))]
mod tests {
    use super::*;
    use crate::config::SchedConfig;
    use crate::scheduler::ExecutionContext;

    fn context(workers: usize) -> ExecutionContext<8> {
        ExecutionContext::new(SchedConfig {
            workers,
            ..SchedConfig::default()
        })
        .expect("valid config")
    }

    #[test]
    fn enqueue_then_next_round_trips_locally() {
        let mut cx = context(1);
        let mut workers = cx.take_workers();
        let worker = &mut workers[0];

        let fiber = FiberHandle::named("solo");
        let id = fiber.id();
        worker.enqueue(fiber);
        assert_eq!(worker.next().map(|f| f.id()), Some(id));
        assert!(worker.next().is_none());
    }

    #[test]
    fn next_drains_global_queue_when_local_is_empty() {
        let mut cx = context(2);
        let injected: Vec<_> = (0..6).map(|_| FiberHandle::new()).collect();
        let expected: Vec<_> = injected.iter().map(|f| f.id()).collect();
        for fiber in injected {
            cx.spawn(fiber);
        }

        let mut workers = cx.take_workers();
        let worker = &mut workers[0];
        let mut drained = Vec::new();
        while let Some(fiber) = worker.next() {
            drained.push(fiber.id());
        }
        assert_eq!(drained, expected);
    }

    #[test]
    fn next_steals_from_a_loaded_peer() {
        let mut cx = context(2);
        let mut workers = cx.take_workers();
        let (left, right) = workers.split_at_mut(1);
        let busy = &mut left[0];
        let idle = &mut right[0];

        for _ in 0..8 {
            busy.enqueue(FiberHandle::new());
        }

        let stolen = idle.next().expect("idle worker should steal");
        drop(stolen);
        // Half of the victim's eight fibers moved over; one was returned.
        assert_eq!(idle.local().len(), 3);
        assert_eq!(busy.local().len(), 4);
    }

    #[test]
    fn periodic_global_poll_prevents_starvation() {
        let mut cx = context(1);
        let starved = FiberHandle::named("starved");
        let starved_id = starved.id();
        cx.spawn(starved);

        let mut workers = cx.take_workers();
        let worker = &mut workers[0];

        // A worker that always has local work still picks up the global
        // fiber within one poll interval.
        let mut seen_starved = false;
        for _ in 0..(GLOBAL_POLL_INTERVAL * 2) {
            worker.enqueue(FiberHandle::new());
            let fiber = worker.next().expect("local work available");
            if fiber.id() == starved_id {
                seen_starved = true;
                break;
            }
        }
        assert!(seen_starved, "global fiber starved behind local pushes");
    }
}
