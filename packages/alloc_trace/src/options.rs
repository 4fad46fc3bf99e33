//! Configuration options applied when creating a trace context.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::Tracker;

/// One configuration option for a new [`TraceContext`][crate::TraceContext].
///
/// Options are applied in order over the base context, so a later option overrides an earlier
/// one that configures the same thing. Anything not configured is inherited from the base
/// context, except for the accumulator: unless told otherwise, each new context gets its own
/// fresh [`AllocCounters`][crate::AllocCounters].
///
/// # Examples
///
/// ```
/// use alloc_trace::{ContextOpt, TraceContext};
///
/// let background = TraceContext::background();
/// let ctx = TraceContext::new(
///     &background,
///     [
///         ContextOpt::name("request_handler"),
///         ContextOpt::max_alloc_bytes(64 * 1024),
///     ],
/// );
///
/// assert_eq!(ctx.name(), Some("request_handler"));
/// assert_eq!(ctx.limits().bytes(), Some(64 * 1024));
/// ```
#[derive(Clone)]
pub struct ContextOpt {
    kind: OptKind,
}

#[derive(Clone)]
pub(crate) enum OptKind {
    Name(Cow<'static, str>),
    Accumulator(AccumulatorChoice),
    MaxBytes(i64),
    MaxObjects(i64),
    MaxEvents(i64),
}

/// Where a new context gets its accumulator from.
#[derive(Clone)]
pub(crate) enum AccumulatorChoice {
    Fresh,
    Custom(Arc<dyn Tracker>),
    InheritFromBase,
    Disabled,
}

impl ContextOpt {
    /// Sets a human-readable name for the context.
    ///
    /// Contexts without a name of their own report the name of their base context.
    #[must_use]
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind: OptKind::Name(name.into()),
        }
    }

    /// Uses the given tracker as the accumulator of the context.
    ///
    /// The caller keeps its own reference to read the totals from.
    #[must_use]
    pub fn tracker<T>(tracker: Arc<T>) -> Self
    where
        T: Tracker + 'static,
    {
        Self {
            kind: OptKind::Accumulator(AccumulatorChoice::Custom(tracker)),
        }
    }

    /// Shares the accumulator of the base context.
    ///
    /// Use this to attribute work done on other threads to the same logical trace. If the base
    /// context has no accumulator, neither does the new context.
    #[must_use]
    pub fn inherit_tracker() -> Self {
        Self {
            kind: OptKind::Accumulator(AccumulatorChoice::InheritFromBase),
        }
    }

    /// Gives the context a fresh accumulator of its own.
    ///
    /// This is the default and only has an effect when overriding an earlier option.
    #[must_use]
    pub fn fresh_tracker() -> Self {
        Self {
            kind: OptKind::Accumulator(AccumulatorChoice::Fresh),
        }
    }

    /// Creates the context without an accumulator.
    ///
    /// Allocation events that happen while such a context is active are not attributed to any
    /// trace and are counted as [untracked][crate::untracked].
    #[must_use]
    pub fn untracked() -> Self {
        Self {
            kind: OptKind::Accumulator(AccumulatorChoice::Disabled),
        }
    }

    /// Sets a soft limit on the net number of bytes allocated in the context.
    ///
    /// Limits are never enforced by this package. The traced code can check them via
    /// [`TraceContext::beyond_alloc_bytes_limit()`][crate::TraceContext::beyond_alloc_bytes_limit].
    #[must_use]
    pub fn max_alloc_bytes(limit: i64) -> Self {
        Self {
            kind: OptKind::MaxBytes(limit),
        }
    }

    /// Sets a soft limit on the net number of objects allocated in the context.
    #[must_use]
    pub fn max_alloc_objects(limit: i64) -> Self {
        Self {
            kind: OptKind::MaxObjects(limit),
        }
    }

    /// Sets a soft limit on the number of allocation events in the context.
    #[must_use]
    pub fn max_alloc_events(limit: i64) -> Self {
        Self {
            kind: OptKind::MaxEvents(limit),
        }
    }

    pub(crate) fn into_kind(self) -> OptKind {
        self.kind
    }
}

impl fmt::Debug for ContextOpt {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OptKind::Name(name) => f.debug_tuple("Name").field(name).finish(),
            OptKind::Accumulator(AccumulatorChoice::Fresh) => f.write_str("FreshTracker"),
            OptKind::Accumulator(AccumulatorChoice::Custom(tracker)) => {
                f.debug_tuple("Tracker").field(tracker).finish()
            }
            OptKind::Accumulator(AccumulatorChoice::InheritFromBase) => {
                f.write_str("InheritTracker")
            }
            OptKind::Accumulator(AccumulatorChoice::Disabled) => f.write_str("Untracked"),
            OptKind::MaxBytes(limit) => f.debug_tuple("MaxAllocBytes").field(limit).finish(),
            OptKind::MaxObjects(limit) => f.debug_tuple("MaxAllocObjects").field(limit).finish(),
            OptKind::MaxEvents(limit) => f.debug_tuple("MaxAllocEvents").field(limit).finish(),
        }
    }
}

/// Soft allocation limits of a [`TraceContext`][crate::TraceContext].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AllocLimits {
    bytes: Option<i64>,
    objects: Option<i64>,
    events: Option<i64>,
}

impl AllocLimits {
    /// No limits at all.
    pub const NONE: Self = Self {
        bytes: None,
        objects: None,
        events: None,
    };

    /// Limit on the net number of bytes, if any.
    #[must_use]
    pub const fn bytes(&self) -> Option<i64> {
        self.bytes
    }

    /// Limit on the net number of objects, if any.
    #[must_use]
    pub const fn objects(&self) -> Option<i64> {
        self.objects
    }

    /// Limit on the number of allocation events, if any.
    #[must_use]
    pub const fn events(&self) -> Option<i64> {
        self.events
    }

    pub(crate) fn set_bytes(&mut self, limit: i64) {
        self.bytes = Some(limit);
    }

    pub(crate) fn set_objects(&mut self, limit: i64) {
        self.objects = Some(limit);
    }

    pub(crate) fn set_events(&mut self, limit: i64) {
        self.events = Some(limit);
    }
}
