//! Thread-local storage of the current trace context.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{self, AtomicU64};

use crate::TraceContext;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // We store a raw pointer to the current context rather than a `TraceContext` directly
    // because this slot is read from inside the global allocator. A thread-local with drop glue
    // registers a TLS destructor on first use, which may itself allocate and re-enter the
    // allocator at a point where the slot is not yet usable. A plain `Cell` of a pointer has no
    // drop glue and no lazy initialization, so it is always safe to touch.
    //
    // Lifetime safety: the slot is either null or points to the context of the last entry in
    // `STACK` on this thread, which holds a strong reference to it. Entries are only removed on
    // this thread, and the slot is moved to the new last entry before the removed one is
    // released.
    static CURRENT: Cell<*const ()> = const { Cell::new(ptr::null()) };

    // Every scope that is active on this thread, innermost last. Never touched by the
    // allocation hook, only when entering and exiting scopes.
    static STACK: ScopeStack = const {
        ScopeStack {
            entries: RefCell::new(Vec::new()),
        }
    };
}

struct ScopeStack {
    entries: RefCell<Vec<(u64, TraceContext)>>,
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        // The entries are released after this returns, when nothing points at them anymore.
        CURRENT.set(ptr::null());
    }
}

/// Keeps a [`TraceContext`] installed as the current context of this thread.
///
/// Created by [`TraceContext::enter()`]. While any scopes are alive on a thread, the context of
/// the most recently entered one is current. Dropping a scope removes its context, also when
/// the thread unwinds due to a panic, so a panicking traced function never leaves its context
/// behind.
///
/// Scopes held in local variables are dropped in reverse order of creation. They may also be
/// dropped in any other order, for example when two futures on the same thread each hold one
/// across an `.await`. Dropping a scope that is not the innermost one removes its context
/// without affecting the scopes entered after it.
#[derive(Debug)]
#[must_use = "the context is only current until the scope is dropped"]
pub struct Scope {
    context: TraceContext,

    // `None` if the thread was being torn down when the scope was entered, so it never got
    // installed.
    id: Option<u64>,

    // The scope refers to the stack of the thread it was created on.
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    pub(crate) fn enter(context: TraceContext) -> Self {
        let id = NEXT_SCOPE_ID.fetch_add(1, atomic::Ordering::Relaxed);

        let installed = STACK
            .try_with(|stack| {
                // Only fails if a tracker enters a scope from inside the hook while another
                // scope is being pushed or removed. Such a scope stays uninstalled.
                let Ok(mut entries) = stack.entries.try_borrow_mut() else {
                    return false;
                };

                entries.push((id, context.clone()));
                CURRENT.set(context.as_ptr());
                true
            })
            .unwrap_or(false);

        Self {
            context,
            id: installed.then_some(id),
            _not_send: PhantomData,
        }
    }

    /// The context this scope installed.
    #[must_use]
    pub fn context(&self) -> &TraceContext {
        &self.context
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let Some(id) = self.id else {
            return;
        };

        // During thread teardown the stack may already be gone, having released every entry.
        let removed = STACK.try_with(|stack| {
            let mut entries = stack.entries.try_borrow_mut().ok()?;

            // Almost always the last entry, unless scopes are dropped out of order.
            let index = entries.iter().rposition(|(entry_id, _)| *entry_id == id)?;
            let (_, context) = entries.remove(index);

            CURRENT.set(
                entries
                    .last()
                    .map_or(ptr::null(), |(_, innermost)| innermost.as_ptr()),
            );

            Some(context)
        });

        // Only released now that the slot no longer points at it.
        drop(removed);
    }
}

/// Returns the innermost trace context that is active on the calling thread.
///
/// Returns `None` if the calling thread is not inside any trace.
///
/// # Examples
///
/// ```
/// use alloc_trace::{TraceContext, current, trace};
///
/// assert!(current().is_none());
///
/// trace(
///     &TraceContext::background(),
///     |ctx| {
///         assert!(current().unwrap().ptr_eq(ctx));
///     },
///     [],
/// );
///
/// assert!(current().is_none());
/// ```
#[must_use]
pub fn current() -> Option<TraceContext> {
    with_current(|current| current.cloned())
}

/// Whether the calling thread is inside any trace.
#[must_use]
pub fn is_active() -> bool {
    !CURRENT.get().is_null()
}

/// Calls `f` with the current context of this thread, without touching its reference count.
///
/// Outside any trace and during thread teardown, `f` sees `None`.
#[inline]
pub(crate) fn with_current<R>(f: impl FnOnce(Option<&TraceContext>) -> R) -> R {
    let raw = CURRENT.get();

    if raw.is_null() {
        return f(None);
    }

    // SAFETY: A non-null slot always points to the context of the last entry in this thread's
    // scope stack (see `CURRENT`). Entries are only removed by dropping a scope on this thread,
    // which cannot happen from inside `f` for the scope that owns this entry, and the slot is
    // moved off an entry before the entry is released.
    unsafe { TraceContext::with_borrowed_ptr(raw, |context| f(Some(context))) }
}
