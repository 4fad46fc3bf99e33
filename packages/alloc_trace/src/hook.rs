//! The allocation hook that attributes events to the current trace.

use std::cell::Cell;
use std::sync::atomic::{self, AtomicI64};

use crate::AllocTotals;
use crate::scope::with_current;

// Events that could not be attributed to any trace, summed over the whole process.
static UNTRACKED_BYTES: AtomicI64 = AtomicI64::new(0);
static UNTRACKED_OBJECTS: AtomicI64 = AtomicI64::new(0);
static UNTRACKED_EVENTS: AtomicI64 = AtomicI64::new(0);

thread_local! {
    // Reentrancy guard; when true we are inside a tracker called from the hook and must not
    // record the allocations the tracker itself makes, or we would recurse forever.
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Reports one allocation event to the trace that is active on the calling thread.
///
/// Positive deltas describe an allocation, negative deltas a deallocation. The event is added
/// to the tracker of the innermost active trace context with an event count of one.
///
/// If no trace is active, or the active context has no tracker, the event is counted as
/// [untracked][untracked] and otherwise dropped. This function never fails and never blocks,
/// beyond whatever the tracker itself does.
///
/// When [`Allocator`][crate::Allocator] is installed as the global allocator, it calls this for
/// every allocation. Instrumented code can also call it directly to report allocations that
/// the global allocator does not see.
///
/// # Examples
///
/// ```
/// use alloc_trace::{TraceContext, trace, track_alloc};
///
/// let totals = trace(
///     &TraceContext::background(),
///     |ctx| {
///         track_alloc(100, 1);
///         ctx.totals().unwrap()
///     },
///     [],
/// );
///
/// assert_eq!(totals.bytes(), 100);
/// assert_eq!(totals.events(), 1);
///
/// // Outside any trace, this is a silent no-op.
/// track_alloc(50, 1);
/// ```
#[inline]
pub fn track_alloc(bytes: i64, objects: i64) {
    // During thread teardown the guard may already be gone. We still must not recurse, so
    // such events go straight to the untracked counters.
    let Ok(reentered) = IN_HOOK.try_with(|guard| guard.replace(true)) else {
        record_untracked(bytes, objects);
        return;
    };

    if reentered {
        // Made by a tracker while it was recording; not attributed to anything on purpose.
        return;
    }

    let _guard = HookGuard;

    with_current(|current| match current.and_then(|ctx| ctx.tracker()) {
        Some(tracker) => tracker.add(bytes, objects, 1),
        None => record_untracked(bytes, objects),
    });
}

/// Clears the reentrancy flag, also when a tracker panics.
struct HookGuard;

impl Drop for HookGuard {
    fn drop(&mut self) {
        _ = IN_HOOK.try_with(|guard| guard.set(false));
    }
}

/// Returns the totals of all allocation events that were not attributed to any trace.
///
/// These are events reported while no trace was active on the reporting thread or while the
/// active trace context had no tracker. The totals are process-wide and cumulative.
///
/// # Examples
///
/// ```
/// use alloc_trace::{track_alloc, untracked};
///
/// let before = untracked();
/// track_alloc(50, 1);
/// let after = untracked();
///
/// // Other threads may report untracked events concurrently, so this is a lower bound.
/// assert!(after.events() - before.events() >= 1);
/// ```
#[must_use]
pub fn untracked() -> AllocTotals {
    AllocTotals::new(
        UNTRACKED_BYTES.load(atomic::Ordering::Relaxed),
        UNTRACKED_OBJECTS.load(atomic::Ordering::Relaxed),
        UNTRACKED_EVENTS.load(atomic::Ordering::Relaxed),
    )
}

#[inline]
pub(crate) fn record_untracked(bytes: i64, objects: i64) {
    UNTRACKED_BYTES.fetch_add(bytes, atomic::Ordering::Relaxed);
    UNTRACKED_OBJECTS.fetch_add(objects, atomic::Ordering::Relaxed);
    UNTRACKED_EVENTS.fetch_add(1, atomic::Ordering::Relaxed);
}
