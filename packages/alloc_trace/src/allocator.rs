//! Global allocator wrapper that reports allocations to the current trace.

use std::alloc::{GlobalAlloc, Layout};
use std::fmt;

use crate::track_alloc;

/// A memory allocator that reports every allocation and deallocation to [`track_alloc()`].
///
/// This allocator wraps any [`GlobalAlloc`] implementation, delegating the actual work to it.
/// Install it as the global allocator to have all heap activity of traced code attributed to
/// the trace that is active on the allocating thread.
///
/// Reported deltas:
///
/// * allocation of `n` bytes: `n` bytes, one object;
/// * deallocation of `n` bytes: `-n` bytes, minus one object;
/// * reallocation from `n` to `m` bytes: `m - n` bytes, no change in objects.
///
/// Failed allocations are not reported.
///
/// # Examples
///
/// ```rust
/// use alloc_trace::Allocator;
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
/// ```
pub struct Allocator<A: GlobalAlloc> {
    inner: A,
}

impl<A: GlobalAlloc> fmt::Debug for Allocator<A> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("inner", &"<allocator>")
            .finish()
    }
}

impl Allocator<std::alloc::System> {
    /// Creates a new tracking allocator using the system's default allocator.
    #[must_use]
    #[inline]
    pub const fn system() -> Self {
        Self {
            inner: std::alloc::System,
        }
    }
}

impl<A: GlobalAlloc> Allocator<A> {
    /// Creates a new tracking allocator that delegates to the provided allocator.
    #[must_use]
    #[inline]
    pub const fn new(allocator: A) -> Self {
        Self { inner: allocator }
    }
}

#[inline]
fn size_to_delta(size: usize) -> i64 {
    // Layout guarantees sizes never exceed isize::MAX.
    i64::try_from(size).expect("allocation size always fits into i64")
}

#[inline]
fn report_allocated(ptr: *mut u8, size: usize) {
    if !ptr.is_null() {
        track_alloc(size_to_delta(size), 1);
    }
}

// SAFETY: We delegate all allocation operations to the underlying allocator,
// which already implements GlobalAlloc safely, while adding tracking functionality.
unsafe impl<A: GlobalAlloc> GlobalAlloc for Allocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let ptr = unsafe { self.inner.alloc(layout) };
        report_allocated(ptr, layout.size());
        ptr
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        unsafe { self.inner.dealloc(ptr, layout) };
        track_alloc(size_to_delta(layout.size()).wrapping_neg(), -1);
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        report_allocated(ptr, layout.size());
        ptr
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: We forward the call to the underlying allocator which implements GlobalAlloc.
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };

        if !new_ptr.is_null() {
            let delta = size_to_delta(new_size).wrapping_sub(size_to_delta(layout.size()));
            track_alloc(delta, 0);
        }

        new_ptr
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{AllocTotals, TraceContext};

    // Static assertions for thread safety
    static_assertions::assert_impl_all!(Allocator<std::alloc::System>: Send, Sync);

    // Not installed as the global allocator; driven directly.
    static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

    #[test]
    fn direct_calls_are_reported_to_current_trace() {
        let ctx = TraceContext::new(&TraceContext::background(), []);
        let layout = Layout::from_size_align(64, 8).unwrap();

        {
            let _scope = ctx.enter();

            // SAFETY: Layout has non-zero size and the pointers are only used with the layouts
            // they were allocated with.
            unsafe {
                let ptr = ALLOCATOR.alloc(layout);
                assert!(!ptr.is_null());

                let ptr = ALLOCATOR.realloc(ptr, layout, 128);
                assert!(!ptr.is_null());

                let grown = Layout::from_size_align(128, 8).unwrap();
                ALLOCATOR.dealloc(ptr, grown);
            }
        }

        // 64 allocated, grown by 64, 128 freed; one object created and destroyed.
        assert_eq!(ctx.totals(), Some(AllocTotals::new(0, 0, 3)));
    }

    #[test]
    fn zeroed_allocation_is_reported() {
        let ctx = TraceContext::new(&TraceContext::background(), []);
        let layout = Layout::from_size_align(32, 8).unwrap();

        let ptr = {
            let _scope = ctx.enter();

            // SAFETY: Layout has non-zero size.
            unsafe { ALLOCATOR.alloc_zeroed(layout) }
        };

        assert!(!ptr.is_null());
        assert_eq!(ctx.totals(), Some(AllocTotals::new(32, 1, 1)));

        // SAFETY: Allocated above with the same layout.
        unsafe { ALLOCATOR.dealloc(ptr, layout) };
    }
}
