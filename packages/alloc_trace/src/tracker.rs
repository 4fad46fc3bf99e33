//! Allocation accumulators.

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{self, AtomicI64};

/// An accumulator of allocation events.
///
/// A [`TraceContext`][crate::TraceContext] may carry a tracker. Allocation events reported while
/// the context is active are forwarded to [`Tracker::add()`].
///
/// Implementations are called from inside the global allocator when [`Allocator`][crate::Allocator]
/// is installed, so they should avoid allocating. If they do allocate, the nested events are
/// skipped instead of being reported recursively.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI64, Ordering};
///
/// use alloc_trace::{AllocTotals, ContextOpt, TraceContext, Tracker, trace, track_alloc};
///
/// /// Only counts events, ignoring sizes.
/// #[derive(Debug, Default)]
/// struct EventCounter(AtomicI64);
///
/// impl Tracker for EventCounter {
///     fn add(&self, _bytes: i64, _objects: i64, events: i64) {
///         self.0.fetch_add(events, Ordering::Relaxed);
///     }
///
///     fn totals(&self) -> AllocTotals {
///         AllocTotals::new(0, 0, self.0.load(Ordering::Relaxed))
///     }
/// }
///
/// let counter = Arc::new(EventCounter::default());
///
/// trace(
///     &TraceContext::background(),
///     |_ctx| track_alloc(64, 1),
///     [ContextOpt::tracker(Arc::clone(&counter))],
/// );
///
/// assert_eq!(counter.totals().events(), 1);
/// ```
pub trait Tracker: Send + Sync + fmt::Debug {
    /// Records a change in allocated bytes and objects, made up of `events` allocation events.
    ///
    /// Deltas are negative for deallocations.
    fn add(&self, bytes: i64, objects: i64, events: i64);

    /// Returns the sum of everything recorded so far.
    fn totals(&self) -> AllocTotals;
}

/// A snapshot of the allocation activity recorded by a [`Tracker`].
///
/// Byte and object counts are net values: allocations add to them, deallocations subtract.
/// The event count is the number of allocation and deallocation events, regardless of sign.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct AllocTotals {
    bytes: i64,
    objects: i64,
    events: i64,
}

impl AllocTotals {
    /// Totals with nothing recorded.
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// Creates a snapshot from raw values.
    #[must_use]
    #[inline]
    pub const fn new(bytes: i64, objects: i64, events: i64) -> Self {
        Self {
            bytes,
            objects,
            events,
        }
    }

    /// Net number of bytes allocated.
    #[must_use]
    #[inline]
    pub const fn bytes(&self) -> i64 {
        self.bytes
    }

    /// Net number of objects allocated.
    #[must_use]
    #[inline]
    pub const fn objects(&self) -> i64 {
        self.objects
    }

    /// Number of allocation events recorded.
    #[must_use]
    #[inline]
    pub const fn events(&self) -> i64 {
        self.events
    }

    /// Whether no events have been recorded.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.events == 0
    }
}

// Never going to overflow i64 in practice, so wrapping arithmetic matches what the counters do.
impl Add for AllocTotals {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            bytes: self.bytes.wrapping_add(rhs.bytes),
            objects: self.objects.wrapping_add(rhs.objects),
            events: self.events.wrapping_add(rhs.events),
        }
    }
}

impl Sub for AllocTotals {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            bytes: self.bytes.wrapping_sub(rhs.bytes),
            objects: self.objects.wrapping_sub(rhs.objects),
            events: self.events.wrapping_sub(rhs.events),
        }
    }
}

impl fmt::Display for AllocTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in {} objects ({} events)",
            self.bytes, self.objects, self.events
        )
    }
}

/// The default [`Tracker`], a set of lock-free counters.
///
/// Every [`TraceContext`][crate::TraceContext] that is not configured otherwise gets its own
/// instance of this type.
///
/// # Examples
///
/// ```
/// use alloc_trace::{AllocCounters, Tracker};
///
/// let counters = AllocCounters::new();
/// counters.add(100, 1, 1);
/// counters.add(-40, -1, 1);
///
/// let totals = counters.totals();
/// assert_eq!(totals.bytes(), 60);
/// assert_eq!(totals.objects(), 0);
/// assert_eq!(totals.events(), 2);
/// ```
#[derive(Debug, Default)]
pub struct AllocCounters {
    bytes: AtomicI64,
    objects: AtomicI64,
    events: AtomicI64,
}

impl AllocCounters {
    /// Creates a set of counters with nothing recorded.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            bytes: AtomicI64::new(0),
            objects: AtomicI64::new(0),
            events: AtomicI64::new(0),
        }
    }

    /// Clears the counters, returning what they held.
    ///
    /// Events recorded concurrently with the reset land either in the returned totals or in the
    /// fresh counters, never in both.
    pub fn reset(&self) -> AllocTotals {
        AllocTotals {
            bytes: self.bytes.swap(0, atomic::Ordering::Relaxed),
            objects: self.objects.swap(0, atomic::Ordering::Relaxed),
            events: self.events.swap(0, atomic::Ordering::Relaxed),
        }
    }
}

impl Tracker for AllocCounters {
    #[inline]
    fn add(&self, bytes: i64, objects: i64, events: i64) {
        // Relaxed is sufficient: we only need atomicity, not ordering w.r.t. other memory ops.
        self.bytes.fetch_add(bytes, atomic::Ordering::Relaxed);
        self.objects.fetch_add(objects, atomic::Ordering::Relaxed);
        self.events.fetch_add(events, atomic::Ordering::Relaxed);
    }

    #[inline]
    fn totals(&self) -> AllocTotals {
        AllocTotals {
            bytes: self.bytes.load(atomic::Ordering::Relaxed),
            objects: self.objects.load(atomic::Ordering::Relaxed),
            events: self.events.load(atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    static_assertions::assert_impl_all!(AllocCounters: Send, Sync);
    static_assertions::assert_impl_all!(AllocTotals: Send, Sync, Copy);
    static_assertions::assert_obj_safe!(Tracker);

    #[test]
    fn new_counters_are_empty() {
        let counters = AllocCounters::new();

        assert_eq!(counters.totals(), AllocTotals::ZERO);
        assert!(counters.totals().is_empty());
    }

    #[test]
    fn add_accumulates_signed_deltas() {
        let counters = AllocCounters::new();

        counters.add(100, 1, 1);
        counters.add(250, 2, 1);
        counters.add(-100, -1, 1);

        assert_eq!(counters.totals(), AllocTotals::new(250, 2, 3));
    }

    #[test]
    fn reset_returns_previous_totals() {
        let counters = AllocCounters::new();
        counters.add(10, 1, 1);

        let cleared = counters.reset();

        assert_eq!(cleared, AllocTotals::new(10, 1, 1));
        assert_eq!(counters.totals(), AllocTotals::ZERO);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        const THREADS: usize = 4;
        const EVENTS_PER_THREAD: i64 = 1000;

        let counters = Arc::new(AllocCounters::new());

        let handles = (0..THREADS)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..EVENTS_PER_THREAD {
                        counters.add(8, 1, 1);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let expected_events = EVENTS_PER_THREAD * THREADS as i64;
        assert_eq!(
            counters.totals(),
            AllocTotals::new(expected_events * 8, expected_events, expected_events)
        );
    }

    #[test]
    fn totals_arithmetic() {
        let a = AllocTotals::new(100, 2, 3);
        let b = AllocTotals::new(40, 1, 1);

        assert_eq!(a + b, AllocTotals::new(140, 3, 4));
        assert_eq!(a - b, AllocTotals::new(60, 1, 2));
    }

    #[test]
    fn totals_display() {
        let totals = AllocTotals::new(100, 2, 3);

        assert_eq!(totals.to_string(), "100 bytes in 2 objects (3 events)");
    }
}
