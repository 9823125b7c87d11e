//! Shared overflow queue.
//!
//! An unbounded, mutex-protected FIFO of fibers shared by every worker in an
//! execution context. Local queues spill half-ring batches here when they
//! fill, outside threads inject fibers here, and workers pull refill batches
//! from here when their ring drains. Storage is the fibers' own `schedlink`
//! field, so enqueueing a prepared chain is a pointer splice under the lock.

use crate::fiber::{Fiber, FiberHandle};
use crate::scheduler::chain::FiberChain;
use crate::scheduler::run_queue::LocalQueue;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use tracing::trace;

struct Inner {
    head: Option<NonNull<Fiber>>,
    tail: Option<NonNull<Fiber>>,
    len: usize,
}

// Fibers on the list are exclusively owned by the queue; the mutex serialises
// all link traversal.
unsafe impl Send for Inner {}

impl Inner {
    /// Splices a whole chain onto the back.
    fn splice_back(&mut self, chain: FiberChain) {
        let Some((first, last, len)) = chain.into_raw_parts() else {
            return;
        };
        match self.tail {
            Some(tail) => unsafe { Fiber::set_schedlink(tail, Some(first)) },
            None => self.head = Some(first),
        }
        self.tail = Some(last);
        self.len += len;
    }

    /// Detaches up to `take` fibers from the front as a chain.
    fn detach_front(&mut self, take: usize) -> FiberChain {
        if take == 0 || self.len == 0 {
            return FiberChain::new();
        }
        let take = take.min(self.len);
        let first = self.head.expect("non-empty queue without a head");
        let mut last = first;
        for _ in 1..take {
            last = unsafe { Fiber::schedlink(last) }.expect("queue shorter than its length");
        }
        self.head = unsafe { Fiber::schedlink(last) };
        if self.head.is_none() {
            self.tail = None;
        }
        unsafe { Fiber::set_schedlink(last, None) };
        self.len -= take;
        unsafe { FiberChain::from_linked(first, last, take) }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let mut current = self.head.take();
        while let Some(fiber) = current {
            current = unsafe { Fiber::schedlink(fiber) };
            drop(unsafe { FiberHandle::from_raw(fiber) });
        }
    }
}

/// The execution context's shared overflow FIFO.
pub struct GlobalQueue {
    inner: Mutex<Inner>,
    /// Advisory length mirror so emptiness probes skip the lock.
    len: AtomicUsize,
}

impl GlobalQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                head: None,
                tail: None,
                len: 0,
            }),
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueues every fiber of `chain` at the back, in chain order.
    ///
    /// Blocks on the internal lock; never fails.
    pub fn push(&self, chain: FiberChain) {
        if chain.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.splice_back(chain);
        self.len.store(inner.len, Ordering::Relaxed);
    }

    /// Enqueues a single fiber at the back.
    pub fn push_fiber(&self, fiber: FiberHandle) {
        let mut chain = FiberChain::new();
        chain.push_back(fiber);
        self.push(chain);
    }

    /// Dequeues the frontmost fiber.
    #[must_use]
    pub fn pop(&self) -> Option<FiberHandle> {
        let mut inner = self.inner.lock();
        let mut chain = inner.detach_front(1);
        self.len.store(inner.len, Ordering::Relaxed);
        drop(inner);
        chain.pop_front()
    }

    /// Moves up to `max` fibers into `dest`'s ring and returns the first.
    ///
    /// The transfer is capped at half of `dest`'s capacity so a refill never
    /// monopolises the ring. The lock is released before the local bulk push
    /// so the two queues are never locked together.
    #[must_use]
    pub fn pop_batch<const N: usize>(
        &self,
        dest: &LocalQueue<N>,
        max: usize,
    ) -> Option<FiberHandle> {
        if max == 0 {
            return None;
        }
        let mut batch = {
            let mut inner = self.inner.lock();
            if inner.len == 0 {
                return None;
            }
            let take = max.min(N / 2).max(1);
            let batch = inner.detach_front(take);
            self.len.store(inner.len, Ordering::Relaxed);
            batch
        };

        let first = batch.pop_front();
        if !batch.is_empty() {
            trace!(count = batch.len(), "refilled local queue from global queue");
            dest.push_chain(batch);
        }
        first
    }

    /// Advisory number of queued fibers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Advisory emptiness check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GlobalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GlobalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalQueue").field("len", &self.len()).finish()
    }
}

#[cfg(all(test, not(filament_loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids(chain: &mut FiberChain) -> Vec<u64> {
        std::iter::from_fn(|| chain.pop_front().map(|f| f.id().as_u64())).collect()
    }

    #[test]
    fn push_pop_is_fifo() {
        let queue = GlobalQueue::new();
        let fibers: Vec<_> = (0..4).map(|_| FiberHandle::new()).collect();
        let expected: Vec<_> = fibers.iter().map(|f| f.id()).collect();
        queue.push(fibers.into_iter().collect());

        assert_eq!(queue.len(), 4);
        for id in expected {
            assert_eq!(queue.pop().map(|f| f.id()), Some(id));
        }
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn chains_are_spliced_in_arrival_order() {
        let queue = GlobalQueue::new();
        let mut expected = Vec::new();
        for _ in 0..3 {
            let chain: FiberChain = (0..2).map(|_| FiberHandle::new()).collect();
            let mut probe = FiberChain::new();
            let mut chain = chain;
            while let Some(f) = chain.pop_front() {
                expected.push(f.id().as_u64());
                probe.push_back(f);
            }
            queue.push(probe);
        }

        let mut all = queue.inner.lock().detach_front(6);
        assert_eq!(ids(&mut all), expected);
    }

    #[test]
    fn pop_batch_moves_capped_batch_locally() {
        let queue = Arc::new(GlobalQueue::new());
        let local = LocalQueue::<8>::new(Arc::clone(&queue));
        let fibers: Vec<_> = (0..10).map(|_| FiberHandle::new()).collect();
        let expected: Vec<_> = fibers.iter().map(|f| f.id()).collect();
        queue.push(fibers.into_iter().collect());

        let first = queue.pop_batch(&local, usize::MAX);
        // Capped at half the ring: one returned, three parked locally.
        assert_eq!(first.map(|f| f.id()), Some(expected[0]));
        assert_eq!(local.len(), 3);
        assert_eq!(queue.len(), 6);
        for id in &expected[1..4] {
            assert_eq!(local.pop().map(|f| f.id()), Some(*id));
        }
    }

    #[test]
    fn pop_batch_from_empty_is_absent() {
        let queue = Arc::new(GlobalQueue::new());
        let local = LocalQueue::<8>::new(Arc::clone(&queue));
        assert!(queue.pop_batch(&local, 4).is_none());
        assert!(queue.pop_batch(&local, 0).is_none());
        assert_eq!(local.len(), 0);
    }

    #[test]
    fn drop_releases_queued_fibers() {
        let queue = GlobalQueue::new();
        queue.push((0..16).map(|_| FiberHandle::new()).collect());
        drop(queue);
    }
}
