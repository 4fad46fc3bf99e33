//! The trace context and its construction from a base context plus options.

use std::borrow::Cow;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64};

use crate::options::{AccumulatorChoice, OptKind};
use crate::{AllocCounters, AllocLimits, AllocTotals, ContextOpt, Scope, Tracker, record_untracked};

// Zero is never handed out, leaving it free to mean "no context" in log output.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The context of one trace.
///
/// A trace context carries an optional [`Tracker`] that accumulates the allocation events
/// attributed to the trace, plus a name and soft limits used by the traced code itself.
///
/// Contexts form a tree: each one is created from a base context (ultimately from
/// [`TraceContext::background()`]) and remembers it as its parent. The tree is informational
/// only - allocation events are only ever recorded into the tracker of the context that is
/// active when they happen, never into the trackers of its ancestors.
///
/// The type is a cheap handle - clones refer to the same context.
///
/// # Examples
///
/// ```
/// use alloc_trace::{ContextOpt, TraceContext};
///
/// let background = TraceContext::background();
/// let ctx = TraceContext::new(&background, [ContextOpt::name("parse")]);
///
/// ctx.track_alloc(100, 1);
///
/// let totals = ctx.totals().unwrap();
/// assert_eq!(totals.bytes(), 100);
/// assert_eq!(totals.objects(), 1);
/// assert_eq!(totals.events(), 1);
/// ```
#[derive(Clone)]
pub struct TraceContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    name: Option<Cow<'static, str>>,
    parent: Option<TraceContext>,
    tracker: Option<Arc<dyn Tracker>>,
    limits: AllocLimits,
}

impl TraceContext {
    /// Returns a root context with no name, no tracker and no limits.
    ///
    /// This is the base context to use when there is no enclosing trace to derive from.
    #[must_use]
    pub fn background() -> Self {
        Self::from_inner(ContextInner {
            id: next_context_id(),
            name: None,
            parent: None,
            tracker: None,
            limits: AllocLimits::NONE,
        })
    }

    /// Creates a new context by applying options over a base context.
    ///
    /// The new context inherits the name and limits of the base context unless the options
    /// override them. Unless the options say otherwise, the new context gets a fresh
    /// [`AllocCounters`] accumulator of its own.
    #[must_use]
    pub fn new(base: &Self, opts: impl IntoIterator<Item = ContextOpt>) -> Self {
        let mut name = base.inner.name.clone();
        let mut limits = base.inner.limits;
        let mut accumulator = AccumulatorChoice::Fresh;

        for opt in opts {
            match opt.into_kind() {
                OptKind::Name(value) => name = Some(value),
                OptKind::Accumulator(choice) => accumulator = choice,
                OptKind::MaxBytes(limit) => limits.set_bytes(limit),
                OptKind::MaxObjects(limit) => limits.set_objects(limit),
                OptKind::MaxEvents(limit) => limits.set_events(limit),
            }
        }

        let tracker: Option<Arc<dyn Tracker>> = match accumulator {
            AccumulatorChoice::Fresh => Some(Arc::new(AllocCounters::new())),
            AccumulatorChoice::Custom(tracker) => Some(tracker),
            AccumulatorChoice::InheritFromBase => base.inner.tracker.clone(),
            AccumulatorChoice::Disabled => None,
        };

        Self::from_inner(ContextInner {
            id: next_context_id(),
            name,
            parent: Some(base.clone()),
            tracker,
            limits,
        })
    }

    fn from_inner(inner: ContextInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Process-unique identifier of the context.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Name of the context, if it or any of its ancestors was given one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// The base context this context was created from.
    ///
    /// Returns `None` for a background context.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Number of ancestors of this context. A background context has depth zero.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth: usize = 0;
        let mut current = self;

        while let Some(parent) = current.parent() {
            depth = depth.wrapping_add(1);
            current = parent;
        }

        depth
    }

    /// The accumulator of the context, if it has one.
    #[must_use]
    pub fn tracker(&self) -> Option<&dyn Tracker> {
        self.inner.tracker.as_deref()
    }

    /// Whether two handles refer to contexts sharing the same accumulator.
    #[must_use]
    pub fn shares_tracker_with(&self, other: &Self) -> bool {
        match (&self.inner.tracker, &other.inner.tracker) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Totals recorded by the accumulator of the context, if it has one.
    #[must_use]
    pub fn totals(&self) -> Option<AllocTotals> {
        self.tracker().map(Tracker::totals)
    }

    /// The soft allocation limits of the context.
    #[must_use]
    pub fn limits(&self) -> AllocLimits {
        self.inner.limits
    }

    /// Whether more bytes are allocated in the context than its limit allows.
    ///
    /// Always `false` if the context has no byte limit or no accumulator.
    #[must_use]
    pub fn beyond_alloc_bytes_limit(&self) -> bool {
        is_beyond(self.inner.limits.bytes(), self.totals().map(|t| t.bytes()))
    }

    /// Whether more objects are allocated in the context than its limit allows.
    ///
    /// Always `false` if the context has no object limit or no accumulator.
    #[must_use]
    pub fn beyond_alloc_objects_limit(&self) -> bool {
        is_beyond(
            self.inner.limits.objects(),
            self.totals().map(|t| t.objects()),
        )
    }

    /// Whether more allocation events happened in the context than its limit allows.
    ///
    /// Always `false` if the context has no event limit or no accumulator.
    #[must_use]
    pub fn beyond_alloc_events_limit(&self) -> bool {
        is_beyond(self.inner.limits.events(), self.totals().map(|t| t.events()))
    }

    /// Whether any of the limits of the context is exceeded.
    #[must_use]
    pub fn beyond_any_limit(&self) -> bool {
        self.beyond_alloc_bytes_limit()
            || self.beyond_alloc_objects_limit()
            || self.beyond_alloc_events_limit()
    }

    /// Records one allocation event directly into this context.
    ///
    /// This is the explicit counterpart of [`track_alloc()`][crate::track_alloc], for code that
    /// has the context at hand and does not need to look up the current one. If the context
    /// has no accumulator, the event is counted as [untracked][crate::untracked].
    #[inline]
    pub fn track_alloc(&self, bytes: i64, objects: i64) {
        match self.tracker() {
            Some(tracker) => tracker.add(bytes, objects, 1),
            None => record_untracked(bytes, objects),
        }
    }

    /// Makes this the current context of the calling thread until the returned scope is
    /// dropped.
    ///
    /// Scopes nest: while the returned scope is alive it shadows whatever context was current
    /// before, and dropping it restores that context.
    ///
    /// # Examples
    ///
    /// ```
    /// use alloc_trace::{ContextOpt, TraceContext, current, track_alloc};
    ///
    /// let ctx = TraceContext::new(&TraceContext::background(), [ContextOpt::name("manual")]);
    ///
    /// {
    ///     let _scope = ctx.enter();
    ///     assert_eq!(current().unwrap().id(), ctx.id());
    ///
    ///     track_alloc(32, 1);
    /// }
    ///
    /// assert!(current().is_none());
    /// assert_eq!(ctx.totals().unwrap().bytes(), 32);
    /// ```
    pub fn enter(&self) -> Scope {
        Scope::enter(self.clone())
    }

    /// Whether two handles refer to the same context.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Identity of the context as an untyped pointer, valid for as long as any handle is alive.
    pub(crate) fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.inner).cast()
    }

    /// Calls `f` with a handle reconstructed from [`as_ptr()`][Self::as_ptr], without changing
    /// the reference count.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `as_ptr()` of a context that stays alive until this
    /// call returns.
    pub(crate) unsafe fn with_borrowed_ptr<R>(ptr: *const (), f: impl FnOnce(&Self) -> R) -> R {
        // SAFETY: Forwarding the caller's guarantee that `ptr` came from `Arc::as_ptr()` of a
        // live context. The handle is never dropped, so the reference count is left untouched.
        let inner = unsafe { Arc::from_raw(ptr.cast::<ContextInner>()) };
        let borrowed = ManuallyDrop::new(Self { inner });

        f(&borrowed)
    }
}

impl fmt::Debug for TraceContext {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the parent ID - printing the whole ancestry gets unreadable fast.
        f.debug_struct("TraceContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("parent_id", &self.parent().map(Self::id))
            .field("tracker", &self.inner.tracker)
            .field("limits", &self.inner.limits)
            .finish()
    }
}

fn next_context_id() -> u64 {
    NEXT_CONTEXT_ID.fetch_add(1, atomic::Ordering::Relaxed)
}

fn is_beyond(limit: Option<i64>, actual: Option<i64>) -> bool {
    match (limit, actual) {
        (Some(limit), Some(actual)) => actual > limit,
        _ => false,
    }
}
