//! Fiber identity and the owning handle stored in scheduler queues.
//!
//! A fiber's stack, saved context, and resume machinery live outside this
//! crate; what the queues move around is a [`FiberHandle`], an owning token
//! for one heap-allocated fiber record. Exactly one handle exists for a live
//! fiber that is not currently inside a queue, so a fiber can never be
//! scheduled twice: pushing transfers the token into the queue, popping
//! re-materialises it.

use core::fmt;
use core::ptr::NonNull;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide fiber id allocator.
static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        Self(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber-{}", self.0)
    }
}

/// Heap record for one fiber.
///
/// `schedlink` is the intrusive successor pointer used to thread fibers into
/// chains and the global queue without allocating list nodes. It is only
/// valid while the fiber is on a chain, and it is only ever written by the
/// single thread that currently owns the fiber (the chain constructor, or
/// the holder of the global-queue lock), which is what makes the
/// `UnsafeCell` access sound.
pub(crate) struct Fiber {
    id: FiberId,
    name: Option<&'static str>,
    schedlink: UnsafeCell<Option<NonNull<Fiber>>>,
}

impl Fiber {
    /// Reads the successor link.
    ///
    /// # Safety
    ///
    /// `this` must point to a live fiber, and the caller must own the fiber
    /// (hold its handle, its chain, or the global-queue lock).
    pub(crate) unsafe fn schedlink(this: NonNull<Fiber>) -> Option<NonNull<Fiber>> {
        *this.as_ref().schedlink.get()
    }

    /// Writes the successor link.
    ///
    /// # Safety
    ///
    /// Same ownership requirement as [`Fiber::schedlink`].
    pub(crate) unsafe fn set_schedlink(this: NonNull<Fiber>, next: Option<NonNull<Fiber>>) {
        *this.as_ref().schedlink.get() = next;
    }
}

/// Owning token for one runnable fiber.
///
/// Handles move through the scheduler: into a local queue on `push`, out on
/// `pop` or a steal, through the global queue on overflow. Dropping a handle
/// releases the fiber record.
pub struct FiberHandle {
    ptr: NonNull<Fiber>,
}

// The handle is an owning pointer to a record whose interior mutability
// (`schedlink`) is only touched by the owning thread.
unsafe impl Send for FiberHandle {}

impl FiberHandle {
    /// Allocates a new anonymous fiber.
    #[must_use]
    pub fn new() -> Self {
        Self::with_name(None)
    }

    /// Allocates a new fiber with a diagnostic name.
    #[must_use]
    pub fn named(name: &'static str) -> Self {
        Self::with_name(Some(name))
    }

    fn with_name(name: Option<&'static str>) -> Self {
        let fiber = Box::new(Fiber {
            id: FiberId::next(),
            name,
            schedlink: UnsafeCell::new(None),
        });
        Self {
            // Box::into_raw never returns null.
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(fiber)) },
        }
    }

    /// Returns the fiber's unique id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        unsafe { self.ptr.as_ref().id }
    }

    /// Returns the fiber's diagnostic name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        unsafe { self.ptr.as_ref().name }
    }

    /// Surrenders ownership, returning the raw record pointer.
    pub(crate) fn into_raw(self) -> NonNull<Fiber> {
        let ptr = self.ptr;
        core::mem::forget(self);
        ptr
    }

    /// Re-materialises a handle from a raw record pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must originate from [`FiberHandle::into_raw`] and ownership
    /// must not be claimed by any other handle or queue.
    pub(crate) unsafe fn from_raw(ptr: NonNull<Fiber>) -> Self {
        Self { ptr }
    }
}

impl Default for FiberHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FiberHandle {
    fn drop(&mut self) {
        // Ownership is exclusive, so reclaiming the box is sound.
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
    }
}

impl PartialEq for FiberHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for FiberHandle {}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = FiberHandle::new();
        let b = FiberHandle::new();
        assert_ne!(a.id(), b.id());
        assert!(b.id().as_u64() > a.id().as_u64());
    }

    #[test]
    fn named_fiber_reports_name() {
        let f = FiberHandle::named("acceptor");
        assert_eq!(f.name(), Some("acceptor"));
        assert_eq!(FiberHandle::new().name(), None);
    }

    #[test]
    fn raw_round_trip_preserves_identity() {
        let f = FiberHandle::named("loop");
        let id = f.id();
        let raw = f.into_raw();
        let f = unsafe { FiberHandle::from_raw(raw) };
        assert_eq!(f.id(), id);
        assert_eq!(f.name(), Some("loop"));
    }

    #[test]
    fn display_format() {
        let f = FiberHandle::new();
        assert_eq!(format!("{}", f.id()), format!("fiber-{}", f.id().as_u64()));
    }
}
