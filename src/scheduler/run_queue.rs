//! Bounded lock-free runnable queue, one per worker.
//!
//! The queue is a fixed-capacity ring of fiber pointers indexed by two
//! monotonic 32-bit counters. `head` is the next slot to dequeue and is
//! contested: the owner advances it in [`LocalQueue::pop`] and peers advance
//! it when they grab a batch, both by CAS. `tail` is the next free slot and
//! is written only by the owner. All arithmetic is wrapping; `tail - head`
//! is the live count and never exceeds the capacity.
//!
//! Ordering discipline:
//!
//! * loads of `head`/`tail` that must observe slot writes are `Acquire`;
//! * the `tail` store that publishes a slot is `Release`;
//! * the CAS claiming slots from `head` is `AcqRel` on success, `Acquire`
//!   on failure;
//! * counter loads the calling thread itself last wrote are `Relaxed`.
//!
//! Slots are relaxed atomics rather than plain cells because a grab copies
//! its batch *before* the claiming CAS and discards the copy when the CAS
//! fails; in that window the owner may wrap around and overwrite the slots
//! being read. The claim protocol makes the stale copy harmless, the slot
//! atomicity makes the overlap well-defined.
//!
//! When a push finds the ring full, the owner migrates the oldest half of
//! the ring plus the new fiber to the shared overflow queue as one chain,
//! so the global lock is paid once per half-capacity of churn.

use crate::fiber::{Fiber, FiberHandle};
use crate::loom_exports::debug_or_loom_assert;
use crate::loom_exports::sync::atomic::{AtomicPtr, AtomicU32};
use crate::scheduler::chain::FiberChain;
use crate::scheduler::global_queue::GlobalQueue;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use crossbeam_utils::CachePadded;
use smallvec::SmallVec;
use std::cell::Cell;
use std::sync::Arc;
use tracing::trace;

struct Queue<const N: usize> {
    /// Next slot to dequeue. Contested by the owner and by grabbing peers.
    head: CachePadded<AtomicU32>,
    /// Next free slot. Written only by the owner.
    tail: CachePadded<AtomicU32>,
    /// Ring storage. Slots outside `[head, tail)` are stale and never read.
    buffer: Box<[AtomicPtr<Fiber>]>,
    /// Overflow target when the ring is full.
    global: Arc<GlobalQueue>,
}

impl<const N: usize> Queue<N> {
    /// With 32-bit wrapping counters, `position & (N - 1)` is only continuous
    /// across the 2³² wrap when the capacity divides 2³².
    const CAPACITY_OK: () = assert!(
        N.is_power_of_two() && N >= 2 && N <= 1 << 31,
        "queue capacity must be a power of two in [2, 2^31]",
    );

    fn new(global: Arc<GlobalQueue>) -> Self {
        let () = Self::CAPACITY_OK;
        let buffer = (0..N)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: CachePadded::new(AtomicU32::new(0)),
            tail: CachePadded::new(AtomicU32::new(0)),
            buffer,
            global,
        }
    }

    #[inline]
    fn slot(&self, position: u32) -> &AtomicPtr<Fiber> {
        &self.buffer[position as usize & (N - 1)]
    }

    /// Reads the fiber pointer at `position` without claiming it.
    ///
    /// The value is only meaningful if a subsequent CAS on `head` certifies
    /// that `position` was still unconsumed.
    #[inline]
    fn read_at(&self, position: u32) -> *mut Fiber {
        self.slot(position).load(Relaxed)
    }

    /// Writes the fiber pointer for `position`. Owner side only; the slot is
    /// published by the following `Release` store of `tail`.
    #[inline]
    fn write_at(&self, position: u32, fiber: *mut Fiber) {
        self.slot(position).store(fiber, Relaxed);
    }

    /// Claims up to half of this queue's fibers for `dst`, copying them into
    /// `dst`'s ring starting at `dst_tail`. Returns the number copied.
    ///
    /// Callable from any thread. `dst` must be owned by the calling thread
    /// and the destination slots must be free.
    fn grab(&self, dst: &Queue<N>, dst_tail: u32) -> u32 {
        loop {
            let head = self.head.load(Acquire);
            let tail = self.tail.load(Acquire);
            let n = tail.wrapping_sub(head) / 2;
            if n == 0 {
                return 0;
            }
            // `head` and `tail` are independent words, so a concurrent owner
            // advance between the two loads can produce a phantom count.
            // Only a retry re-establishes a consistent pair.
            if n > (N as u32) / 2 {
                core::hint::spin_loop();
                continue;
            }

            for i in 0..n {
                let fiber = self.read_at(head.wrapping_add(i));
                dst.write_at(dst_tail.wrapping_add(i), fiber);
            }

            // The claim certifies every copied slot; on failure the copies
            // are stale pointers and are simply discarded.
            if self
                .head
                .compare_exchange(head, head.wrapping_add(n), AcqRel, Acquire)
                .is_ok()
            {
                return n;
            }
            core::hint::spin_loop();
        }
    }

    fn len(&self) -> usize {
        let head = self.head.load(Relaxed);
        let tail = self.tail.load(Relaxed);
        tail.wrapping_sub(head) as usize
    }
}

impl<const N: usize> Drop for Queue<N> {
    fn drop(&mut self) {
        let head = self.head.load(Relaxed);
        let tail = self.tail.load(Relaxed);
        for offset in 0..tail.wrapping_sub(head) {
            let fiber = self.read_at(head.wrapping_add(offset));
            debug_assert!(!fiber.is_null());
            // Access is exclusive in drop; remaining slots hold live fibers.
            drop(unsafe { FiberHandle::from_raw(NonNull::new_unchecked(fiber)) });
        }
    }
}

/// Owner handle for a worker's runnable queue.
///
/// Exactly one `LocalQueue` exists per ring and it stays on the worker
/// thread that owns it: push, bulk push, pop, and stealing *into* the ring
/// are owner-side operations. Peers interact with the ring only through a
/// [`Stealer`].
pub struct LocalQueue<const N: usize> {
    queue: Arc<Queue<N>>,
    /// Owner-side operations are single-threaded; keep the handle `Send`
    /// but not `Sync` so two threads cannot race the tail side.
    _not_sync: PhantomData<Cell<()>>,
}

impl<const N: usize> LocalQueue<N> {
    /// Creates an empty queue that spills to `global` when full.
    #[must_use]
    pub fn new(global: Arc<GlobalQueue>) -> Self {
        Self {
            queue: Arc::new(Queue::new(global)),
            _not_sync: PhantomData,
        }
    }

    /// Creates a peer handle for stealing from this queue.
    #[must_use]
    pub fn stealer(&self) -> Stealer<N> {
        Stealer {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Compile-time capacity of the ring.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Advisory number of queued fibers. Racy: a concurrent grab may change
    /// the answer before the caller can act on it.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Advisory emptiness check; same caveat as [`LocalQueue::len`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues one fiber.
    ///
    /// The fiber always ends up queued: in the ring on the fast path, or in
    /// the global queue together with the oldest half of the ring when the
    /// ring is full. Never blocks on ring contention; the overflow path may
    /// block briefly on the global queue's lock.
    pub fn push(&self, fiber: FiberHandle) {
        let mut fiber = fiber;
        loop {
            let head = self.queue.head.load(Acquire);
            let tail = self.queue.tail.load(Acquire);

            if tail.wrapping_sub(head) < N as u32 {
                self.queue.write_at(tail, fiber.into_raw().as_ptr());
                // Publishes the slot write to any peer that acquires `tail`.
                self.queue.tail.store(tail.wrapping_add(1), Release);
                return;
            }

            match self.push_overflow(fiber, head, tail) {
                Ok(()) => return,
                // A grab beat the overflow claim; the freed capacity makes
                // the next fast-path attempt succeed.
                Err(returned) => fiber = returned,
            }
        }
    }

    /// Migrates the oldest half of the ring plus `fiber` to the global queue
    /// as one chain.
    fn push_overflow(&self, fiber: FiberHandle, head: u32, tail: u32) -> Result<(), FiberHandle> {
        let n = tail.wrapping_sub(head) / 2;
        assert!(
            n == (N as u32) / 2,
            "overflow batch from a queue that is not full",
        );

        // Copy the batch before claiming it; a failed claim only costs the
        // copies, which are raw pointers.
        let mut batch: SmallVec<[NonNull<Fiber>; 32]> = SmallVec::with_capacity(n as usize + 1);
        for i in 0..n {
            let ptr = self.queue.read_at(head.wrapping_add(i));
            debug_or_loom_assert!(!ptr.is_null());
            // Slots inside `[head, tail)` always hold live fibers.
            batch.push(unsafe { NonNull::new_unchecked(ptr) });
        }

        if self
            .queue
            .head
            .compare_exchange(head, head.wrapping_add(n), AcqRel, Acquire)
            .is_err()
        {
            return Err(fiber);
        }

        batch.push(fiber.into_raw());
        for pair in batch.windows(2) {
            unsafe { Fiber::set_schedlink(pair[0], Some(pair[1])) };
        }
        unsafe { Fiber::set_schedlink(batch[n as usize], None) };

        trace!(count = batch.len(), "local queue full, spilling to global queue");
        // The claim above transferred ownership of the first `n` fibers and
        // `into_raw` surrendered the new one.
        let chain = unsafe { FiberChain::from_linked(batch[0], batch[n as usize], batch.len()) };
        self.queue.global.push(chain);
        Ok(())
    }

    /// Transfers fibers from `chain` into the ring, preserving chain order,
    /// and forwards whatever does not fit to the global queue.
    ///
    /// The local fibers are published before the global lock is taken, so a
    /// stealer can start claiming them while the remainder is in flight.
    pub fn push_chain(&self, mut chain: FiberChain) {
        let mut tail = self.queue.tail.load(Acquire);
        // Owner-private view: a stale head only underestimates free space.
        let head = self.queue.head.load(Relaxed);

        while tail.wrapping_sub(head) < N as u32 {
            let Some(fiber) = chain.pop_front() else { break };
            self.queue.write_at(tail, fiber.into_raw().as_ptr());
            tail = tail.wrapping_add(1);
        }
        self.queue.tail.store(tail, Release);

        if !chain.is_empty() {
            trace!(count = chain.len(), "bulk push remainder to global queue");
            self.queue.global.push(chain);
        }
    }

    /// Dequeues the oldest fiber, racing grabbing peers for it.
    #[must_use]
    pub fn pop(&self) -> Option<FiberHandle> {
        let mut head = self.queue.head.load(Acquire);
        loop {
            // The owner wrote `tail` last; no synchronisation needed.
            let tail = self.queue.tail.load(Relaxed);
            if tail == head {
                return None;
            }

            let fiber = self.queue.read_at(head);
            match self
                .queue
                .head
                .compare_exchange(head, head.wrapping_add(1), AcqRel, Acquire)
            {
                Ok(_) => {
                    debug_or_loom_assert!(!fiber.is_null());
                    // The successful claim certifies the slot read.
                    return Some(unsafe { FiberHandle::from_raw(NonNull::new_unchecked(fiber)) });
                }
                Err(actual) => head = actual,
            }
        }
    }

    /// Steals up to half of `src`'s fibers into this (empty) queue and
    /// returns one of them to run immediately.
    ///
    /// Returns `None` when nothing could be stolen. When exactly one fiber
    /// was grabbed it is returned without publishing a new tail, so the ring
    /// stays empty for outside observers.
    ///
    /// # Panics
    ///
    /// Panics if `src` is this queue's own stealer, or if the queue was not
    /// empty (both caller contract breaches).
    #[must_use]
    pub fn steal_from(&self, src: &Stealer<N>) -> Option<FiberHandle> {
        assert!(
            !Arc::ptr_eq(&self.queue, &src.queue),
            "queue cannot steal from itself",
        );

        let tail = self.queue.tail.load(Acquire);
        let n = src.queue.grab(&self.queue, tail);
        if n == 0 {
            return None;
        }

        // The most recent fiber of the batch is handed to the caller.
        let n = n - 1;
        let fiber = self.queue.read_at(tail.wrapping_add(n));
        debug_or_loom_assert!(!fiber.is_null());
        // Slots written by `grab` above; claimed for this queue.
        let fiber = unsafe { FiberHandle::from_raw(NonNull::new_unchecked(fiber)) };
        if n == 0 {
            return Some(fiber);
        }

        let head = self.queue.head.load(Acquire);
        assert!(
            tail.wrapping_sub(head) + n < N as u32,
            "stole a batch into a non-empty queue",
        );
        trace!(count = n + 1, "stole fibers from peer queue");
        self.queue.tail.store(tail.wrapping_add(n), Release);
        Some(fiber)
    }
}

impl<const N: usize> core::fmt::Debug for LocalQueue<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalQueue")
            .field("capacity", &N)
            .field("len", &self.len())
            .finish()
    }
}

/// Peer handle for stealing fibers out of a [`LocalQueue`].
///
/// Cloneable and shareable; any number of peers may grab from the same
/// queue concurrently.
pub struct Stealer<const N: usize> {
    queue: Arc<Queue<N>>,
}

impl<const N: usize> Stealer<N> {
    /// Compile-time capacity of the underlying ring.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Advisory number of queued fibers; racy by nature.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Advisory emptiness check used to skip hopeless victims.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if this stealer targets `queue`'s ring.
    #[must_use]
    pub fn targets(&self, queue: &LocalQueue<N>) -> bool {
        Arc::ptr_eq(&self.queue, &queue.queue)
    }
}

impl<const N: usize> Clone for Stealer<N> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<const N: usize> core::fmt::Debug for Stealer<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stealer")
            .field("capacity", &N)
            .field("len", &self.len())
            .finish()
    }
}
