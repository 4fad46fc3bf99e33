//! Entry points that run code inside a trace.

use std::thread;

use tracing::{debug, error};

use crate::{ContextOpt, SpawnError, TraceContext, WaitGroup};

/// Runs `tracer` inside a new trace on the calling thread.
///
/// A new [`TraceContext`] is created from `base` and `opts` (see [`TraceContext::new()`]) and
/// made the current context of the calling thread for exactly as long as `tracer` runs. Every
/// allocation event reported on this thread in the meantime is attributed to the new context,
/// except for events inside nested traces, which go to the nested trace instead.
///
/// When `tracer` returns or panics, the context that was current before the call becomes
/// current again. The result of `tracer` is returned to the caller and a panic is propagated
/// unchanged.
///
/// # Examples
///
/// ```
/// use alloc_trace::{ContextOpt, TraceContext, trace, track_alloc};
///
/// let background = TraceContext::background();
///
/// let (outer, inner) = trace(
///     &background,
///     |outer| {
///         track_alloc(10, 1);
///
///         let inner = trace(
///             outer,
///             |inner| {
///                 track_alloc(20, 1);
///                 inner.clone()
///             },
///             [ContextOpt::name("inner")],
///         );
///
///         track_alloc(5, 1);
///         (outer.clone(), inner)
///     },
///     [ContextOpt::name("outer")],
/// );
///
/// assert_eq!(outer.totals().unwrap().bytes(), 15);
/// assert_eq!(inner.totals().unwrap().bytes(), 20);
/// ```
pub fn trace<F, R>(base: &TraceContext, tracer: F, opts: impl IntoIterator<Item = ContextOpt>) -> R
where
    F: FnOnce(&TraceContext) -> R,
{
    let context = TraceContext::new(base, opts);
    let context_id = context.id();

    tracing::trace!(
        context_id,
        parent_id = base.id(),
        name = context.name(),
        "entering trace"
    );

    let result = {
        let _scope = context.enter();
        tracer(&context)
    };

    tracing::trace!(context_id, "exited trace");

    result
}

/// Spawns a thread that runs `tracer` inside a new trace of its own.
///
/// The spawned thread starts without any current trace context - nothing is inherited from the
/// calling thread's current trace. It immediately calls [`trace()`] with `base` and `opts`, so
/// `tracer` sees a fresh context derived from `base`. Use [`ContextOpt::inherit_tracker()`] to
/// have the spawned work recorded into the same accumulator as `base`.
///
/// If a wait group is given, it is incremented before the thread is spawned and decremented
/// exactly once when the spawned work ends, also if `tracer` panics.
///
/// This function never blocks and never fails. If the thread cannot be spawned, the failure is
/// logged, `tracer` is never called and the wait group is released again. Use
/// [`try_go_trace()`] to handle spawn failures yourself.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use alloc_trace::{AllocCounters, ContextOpt, TraceContext, Tracker, WaitGroup, go_trace, track_alloc};
///
/// let counters = Arc::new(AllocCounters::new());
/// let wait_group = WaitGroup::new();
///
/// go_trace(
///     &TraceContext::background(),
///     Some(&wait_group),
///     |_ctx| {
///         for _ in 0..10 {
///             track_alloc(10, 1);
///         }
///     },
///     [ContextOpt::tracker(Arc::clone(&counters))],
/// );
///
/// wait_group.wait();
///
/// let totals = counters.totals();
/// assert_eq!(totals.bytes(), 100);
/// assert_eq!(totals.objects(), 10);
/// assert_eq!(totals.events(), 10);
/// ```
pub fn go_trace<F>(
    base: &TraceContext,
    wait_group: Option<&WaitGroup>,
    tracer: F,
    opts: impl IntoIterator<Item = ContextOpt>,
) where
    F: FnOnce(&TraceContext) + Send + 'static,
{
    if let Err(error) = try_go_trace(base, wait_group, tracer, opts) {
        error!(
            ?error,
            base_id = base.id(),
            "traced thread could not be spawned; the tracer will not run"
        );
    }
}

/// Spawns a thread that runs `tracer` inside a new trace of its own, reporting spawn failures.
///
/// Behaves like [`go_trace()`] except that a failure to spawn the thread is returned to the
/// caller instead of being logged. The wait group (if any) is already released when the error
/// is returned.
///
/// # Errors
///
/// Returns [`SpawnError::Thread`] if the operating system refuses to create the thread.
pub fn try_go_trace<F>(
    base: &TraceContext,
    wait_group: Option<&WaitGroup>,
    tracer: F,
    opts: impl IntoIterator<Item = ContextOpt>,
) -> Result<(), SpawnError>
where
    F: FnOnce(&TraceContext) + Send + 'static,
{
    let base = base.clone();
    let base_id = base.id();
    let opts = opts.into_iter().collect::<Vec<_>>();

    // Registered before spawning so a waiter can never observe the work as done before it ran.
    let done_guard = wait_group.map(|wait_group| {
        wait_group.add(1);
        wait_group.done_on_drop()
    });

    debug!(base_id, "spawning traced thread");

    // If spawning fails, the closure is dropped without running, taking the guard with it.
    thread::Builder::new()
        .spawn(move || {
            // Dropped last, whether we return or unwind. Captures are only dropped after the
            // locals, so `base` is moved into a local to be released before the guard.
            let _done_guard = done_guard;
            let base = base;

            trace(&base, tracer, opts);
        })
        .map(drop)
        .map_err(SpawnError::Thread)
}
