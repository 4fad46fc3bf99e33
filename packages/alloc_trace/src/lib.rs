#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Attribute memory allocations to the trace that is active on the allocating thread.
//!
//! A trace is a unit of work - a closure, a spawned thread or a future - that owns an
//! allocation accumulator. While the trace is running, every allocation event reported on the
//! same thread is added to that accumulator, without the trace context having to be passed
//! through every call in between.
//!
//! The core functionality includes:
//! - [`trace()`] - Runs a closure inside a new trace on the current thread.
//! - [`go_trace()`] - Spawns a thread that runs a closure inside a new trace of its own.
//! - [`track_alloc()`] - Reports one allocation event to the current trace, if any.
//! - [`TraceContext`] - The trace itself, carrying an optional [`Tracker`] accumulator.
//! - [`Allocator`] - A global allocator wrapper that reports every allocation to
//!   [`track_alloc()`].
//!
//! # Simple usage
//!
//! ```
//! use alloc_trace::{Allocator, ContextOpt, TraceContext, trace};
//!
//! #[global_allocator]
//! static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
//!
//! let background = TraceContext::background();
//!
//! let totals = trace(
//!     &background,
//!     |ctx| {
//!         let data = vec![0_u8; 1024];
//!         std::hint::black_box(&data);
//!
//!         ctx.totals().expect("context has its own accumulator")
//!     },
//!     [ContextOpt::name("vec_of_1024")],
//! );
//!
//! assert_eq!(totals.bytes(), 1024);
//! assert_eq!(totals.objects(), 1);
//! ```
//!
//! # Threads and tasks
//!
//! The current trace is stored per thread. A thread spawned via [`go_trace()`] starts with no
//! trace of its own and immediately opens a new one, built from the base context passed to
//! [`go_trace()`]. Use [`ContextOpt::inherit_tracker()`] to have spawned work add to the same
//! accumulator as the parent.
//!
//! Futures may move between threads and share a thread with other futures, so a future is
//! traced by wrapping it via [`TraceContext::traced()`], which opens the trace for the duration
//! of each poll.
//!
//! # Untracked events
//!
//! Allocation events reported while no trace is active (or while the active trace has no
//! accumulator) are not attributed to any trace. They are counted process-wide and can be
//! inspected via [`untracked()`].
//!
//! # Miri compatibility
//!
//! Miri replaces the global allocator with its own logic, so [`Allocator`] has no effect under
//! Miri. Explicit [`track_alloc()`] calls work as usual.

mod allocator;
mod context;
mod error;
mod hook;
mod options;
mod scope;
mod trace;
mod traced;
mod tracker;
mod wait_group;

pub use allocator::*;
pub use context::*;
pub use error::*;
pub use hook::*;
pub use options::*;
pub use scope::*;
pub use trace::*;
pub use traced::*;
pub use tracker::*;
pub use wait_group::*;
