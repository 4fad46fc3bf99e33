//! Tracing of futures, which may move between threads between polls.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::{ContextOpt, TraceContext};

/// A future that runs inside a trace.
///
/// Every time the future is polled, its trace context is made the current context of the
/// polling thread for the duration of the poll. Allocation events reported by the inner future
/// are therefore attributed to the trace no matter which thread polls it, while other futures
/// sharing the same threads are not affected.
///
/// Created via [`TraceContext::traced()`] or [`trace_future()`].
///
/// # Examples
///
/// ```
/// use alloc_trace::{TraceContext, track_alloc};
/// # use futures::executor::block_on;
///
/// let ctx = TraceContext::new(&TraceContext::background(), []);
///
/// let traced = ctx.clone().traced(async {
///     track_alloc(64, 1);
///     "done"
/// });
///
/// assert_eq!(block_on(traced), "done");
/// assert_eq!(ctx.totals().unwrap().bytes(), 64);
/// ```
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Traced<F> {
    inner: F,
    context: TraceContext,
}

impl<F> Traced<F> {
    /// The trace context the future runs in.
    #[must_use]
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Returns the inner future, removing it from the trace.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F> Future for Traced<F>
where
    F: Future,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: We never move `inner` out of a pinned `Traced` and `Traced` has no `Drop` or
        // `Unpin` impl of its own that could do so, so projecting the pin to it is sound.
        let this = unsafe { self.get_unchecked_mut() };

        let _scope = this.context.enter();

        // SAFETY: See above - `inner` is structurally pinned.
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        inner.poll(cx)
    }
}

impl TraceContext {
    /// Wraps a future so that it runs inside this trace context whenever it is polled.
    pub fn traced<F>(self, future: F) -> Traced<F>
    where
        F: Future,
    {
        Traced {
            inner: future,
            context: self,
        }
    }
}

/// Wraps a future so that it runs inside a new trace.
///
/// The new [`TraceContext`] is created from `base` and `opts` as in [`trace()`][crate::trace],
/// but it only becomes current while the returned future is being polled.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use alloc_trace::{AllocCounters, ContextOpt, TraceContext, Tracker, trace_future, track_alloc};
/// # use futures::executor::block_on;
///
/// let counters = Arc::new(AllocCounters::new());
///
/// let future = trace_future(
///     &TraceContext::background(),
///     async { track_alloc(10, 1) },
///     [ContextOpt::tracker(Arc::clone(&counters))],
/// );
///
/// block_on(future);
/// assert_eq!(counters.totals().bytes(), 10);
/// ```
pub fn trace_future<F>(
    base: &TraceContext,
    future: F,
    opts: impl IntoIterator<Item = ContextOpt>,
) -> Traced<F>
where
    F: Future,
{
    TraceContext::new(base, opts).traced(future)
}
