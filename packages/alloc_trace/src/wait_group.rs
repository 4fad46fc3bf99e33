//! Completion counter for spawned traces.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicUsize};
use std::time::{Duration, Instant};

use rsevents::{Awaitable, AutoResetEvent, EventState};

/// Counts outstanding units of work and lets a thread wait until all of them are done.
///
/// Pass a wait group to [`go_trace()`][crate::go_trace] to be able to wait for the spawned
/// traces to complete. Each spawned trace counts as one unit of work from the moment
/// [`go_trace()`][crate::go_trace] is called until the spawned thread finishes, whether it
/// finishes normally or by panicking.
///
/// The type is a cheap handle - clones refer to the same counter.
///
/// # Examples
///
/// ```
/// use alloc_trace::{TraceContext, WaitGroup, go_trace};
///
/// let background = TraceContext::background();
/// let wait_group = WaitGroup::new();
///
/// for _ in 0..4 {
///     go_trace(&background, Some(&wait_group), |_ctx| {}, []);
/// }
///
/// wait_group.wait();
/// assert_eq!(wait_group.outstanding(), 0);
/// ```
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

struct WaitGroupInner {
    outstanding: AtomicUsize,

    // Set every time the counter reaches zero. Each waiter that wakes up and sees no
    // outstanding work sets it again, passing the wakeup on to the next waiter. A waiter that
    // instead sees new work (or a leftover signal from an earlier zero) goes back to waiting.
    completed: AutoResetEvent,
}

impl WaitGroup {
    /// Creates a wait group with no outstanding work.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WaitGroupInner {
                outstanding: AtomicUsize::new(0),
                completed: AutoResetEvent::new(EventState::Unset),
            }),
        }
    }

    /// Registers `count` more units of outstanding work.
    ///
    /// # Panics
    ///
    /// Panics if the counter overflows. The counter is left unchanged in that case.
    pub fn add(&self, count: usize) {
        self.inner
            .outstanding
            .fetch_update(
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
                |current| current.checked_add(count),
            )
            .expect("wait group counter overflowed");
    }

    /// Marks one unit of outstanding work as done.
    ///
    /// # Panics
    ///
    /// Panics if there is no outstanding work.
    #[cfg_attr(test, mutants::skip)] // Waiters never wake up if tampered, causing test timeouts.
    pub fn done(&self) {
        let previous = self
            .inner
            .outstanding
            .fetch_update(
                atomic::Ordering::AcqRel,
                atomic::Ordering::Acquire,
                |current| current.checked_sub(1),
            )
            .expect("wait group marked done more times than work was added");

        if previous == 1 {
            self.inner.completed.set();
        }
    }

    /// Number of units of work that are not yet done.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(atomic::Ordering::Acquire)
    }

    /// Blocks the calling thread until there is no outstanding work.
    ///
    /// Returns immediately if there is no outstanding work.
    pub fn wait(&self) {
        while self.outstanding() != 0 {
            self.inner.completed.wait();
        }

        self.wake_next_waiter();
    }

    /// Blocks the calling thread until there is no outstanding work or the timeout elapses.
    ///
    /// Returns `true` if all work was done, `false` if the timeout elapsed first.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);

        while self.outstanding() != 0 {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                // Too far in the future to represent, so effectively forever.
                None => Duration::MAX,
            };

            if remaining.is_zero() || !self.inner.completed.wait_for(remaining) {
                // Work may have been completed right as the time ran out.
                if self.outstanding() != 0 {
                    return false;
                }
            }
        }

        self.wake_next_waiter();
        true
    }

    // Whoever consumed the signal for the latest zero hands it on to any other waiter.
    fn wake_next_waiter(&self) {
        self.inner.completed.set();
    }

    /// Returns a guard that marks one unit of work as done when dropped.
    ///
    /// The unit of work must already have been registered via [`add()`][Self::add].
    pub(crate) fn done_on_drop(&self) -> DoneGuard {
        DoneGuard {
            wait_group: self.clone(),
        }
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitGroup {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGroup")
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

/// Marks one unit of work in a [`WaitGroup`] as done when dropped, including during unwinding.
#[derive(Debug)]
pub(crate) struct DoneGuard {
    wait_group: WaitGroup,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.wait_group.done();
    }
}
