//! # Filament: work-stealing runnable-queue core for an M:N fiber scheduler
//!
//! Each worker thread owns a bounded, lock-free runnable queue
//! ([`LocalQueue`]); an [`ExecutionContext`] groups workers around one
//! mutex-protected overflow queue ([`GlobalQueue`]). When a local queue
//! fills, half of it spills to the global queue as one intrusive chain;
//! when it drains, the worker refills from the global queue or steals half
//! of a peer's queue. Context switching, stacks, timers, and I/O readiness
//! belong to the embedding runtime; this crate only decides which fiber
//! runs next.
//!
//! ## Example
//!
//! ```
//! use filament::{ExecutionContext, FiberHandle, SchedConfig};
//!
//! let mut cx = ExecutionContext::<256>::new(SchedConfig {
//!     workers: 2,
//!     ..SchedConfig::default()
//! })
//! .unwrap();
//!
//! // Inject work from outside the workers.
//! cx.spawn(FiberHandle::named("hello"));
//!
//! // A worker picks it up through its normal search order.
//! let mut workers = cx.take_workers();
//! let fiber = workers[0].next().unwrap();
//! assert_eq!(fiber.name(), Some("hello"));
//! ```

#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub mod config;
pub mod error;
pub mod fiber;
mod loom_exports;
pub mod scheduler;
pub mod util;

pub use config::SchedConfig;
pub use error::{ConfigError, SchedError};
pub use fiber::{FiberHandle, FiberId};
pub use scheduler::{
    ExecutionContext, FiberChain, GlobalQueue, LocalQueue, Stealer, Worker, WorkerId,
};
