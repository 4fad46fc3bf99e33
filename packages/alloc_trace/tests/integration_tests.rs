//! Integration tests for `alloc_trace` using explicitly reported allocation events.
//!
//! These tests do not install the tracking allocator, so the only events the traces see are
//! the ones the tests report via `track_alloc()`. That makes exact totals predictable even
//! when many threads are involved.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

use alloc_trace::{
    AllocCounters, AllocTotals, ContextOpt, TraceContext, Tracker, WaitGroup, current, go_trace,
    trace, track_alloc,
};

fn counters() -> (Arc<AllocCounters>, ContextOpt) {
    let counters = Arc::new(AllocCounters::new());
    let opt = ContextOpt::tracker(Arc::clone(&counters));
    (counters, opt)
}

#[test]
fn single_event_in_trace() {
    let (counters, opt) = counters();

    trace(&TraceContext::background(), |_| track_alloc(100, 1), [opt]);

    assert_eq!(counters.totals(), AllocTotals::new(100, 1, 1));
}

#[test]
fn event_without_trace_affects_nothing() {
    let (counters, opt) = counters();
    trace(&TraceContext::background(), |_| {}, [opt]);

    track_alloc(50, 1);

    assert_eq!(counters.totals(), AllocTotals::ZERO);
    assert!(current().is_none());
}

#[test]
fn spawned_trace_with_wait_group() {
    let (counters, opt) = counters();
    let wait_group = WaitGroup::new();

    go_trace(
        &TraceContext::background(),
        Some(&wait_group),
        |_| {
            for _ in 0..10 {
                track_alloc(10, 1);
            }
        },
        [opt],
    );

    wait_group.wait();

    assert_eq!(counters.totals(), AllocTotals::new(100, 10, 10));
}

#[test]
fn nested_traces_on_one_thread() {
    let (outer_counters, outer_opt) = counters();
    let (inner_counters, inner_opt) = counters();

    trace(
        &TraceContext::background(),
        |outer| {
            track_alloc(10, 1);
            trace(outer, |_| track_alloc(20, 1), [inner_opt]);
            track_alloc(5, 1);
        },
        [outer_opt],
    );

    assert_eq!(outer_counters.totals().bytes(), 15);
    assert_eq!(outer_counters.totals().events(), 2);
    assert_eq!(inner_counters.totals().bytes(), 20);
    assert_eq!(inner_counters.totals().events(), 1);
}

#[test]
fn concurrent_traces_are_isolated() {
    const THREADS: usize = 8;
    const EVENTS_PER_THREAD: usize = 500;

    // All threads trace at the same time to maximize interleaving.
    let barrier = Arc::new(Barrier::new(THREADS));
    let background = TraceContext::background();

    let handles = (0..THREADS)
        .map(|thread_index| {
            let barrier = Arc::clone(&barrier);
            let background = background.clone();

            thread::spawn(move || {
                let size = i64::try_from(thread_index).unwrap() + 1;
                let (outer_counters, outer_opt) = counters();
                let (inner_counters, inner_opt) = counters();

                trace(
                    &background,
                    |outer| {
                        barrier.wait();

                        for i in 0..EVENTS_PER_THREAD {
                            track_alloc(size, 1);

                            if i % 100 == 0 {
                                trace(outer, |_| track_alloc(size * 1000, 1), [inner_opt.clone()]);
                            }
                        }
                    },
                    [outer_opt],
                );

                (size, outer_counters.totals(), inner_counters.totals())
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let (size, outer, inner) = handle.join().unwrap();
        let events = i64::try_from(EVENTS_PER_THREAD).unwrap();
        let nested = events / 100;

        assert_eq!(outer, AllocTotals::new(size * events, events, events));
        assert_eq!(inner, AllocTotals::new(size * 1000 * nested, nested, nested));
    }
}

#[test]
fn teardown_after_panicking_tracer() {
    let (counters, opt) = counters();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        trace(
            &TraceContext::background(),
            |_| {
                track_alloc(1, 1);
                panic!("intentional panic inside tracer");
            },
            [opt],
        );
    }));

    assert!(result.is_err());

    track_alloc(1000, 1);

    assert!(current().is_none());
    assert_eq!(counters.totals(), AllocTotals::new(1, 1, 1));
}

#[test]
fn teardown_restores_outer_trace() {
    let (outer_counters, outer_opt) = counters();

    trace(
        &TraceContext::background(),
        |outer| {
            trace(outer, |_| {}, []);
            track_alloc(7, 1);

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                trace(outer, |_| panic!("intentional panic inside nested tracer"), []);
            }));
            assert!(result.is_err());
            track_alloc(7, 1);
        },
        [outer_opt],
    );

    assert_eq!(outer_counters.totals(), AllocTotals::new(14, 2, 2));
}

#[test]
fn spawned_trace_starts_with_own_scope() {
    let (parent_counters, parent_opt) = counters();
    let (child_counters, child_opt) = counters();
    let wait_group = WaitGroup::new();
    let (sender, receiver) = mpsc::channel();

    trace(
        &TraceContext::background(),
        |parent| {
            go_trace(
                parent,
                Some(&wait_group),
                move |child| {
                    // Before anything else, the current context is the one go_trace installed.
                    let seen = current().unwrap();
                    sender.send(seen.ptr_eq(child)).unwrap();

                    track_alloc(30, 1);
                },
                [child_opt],
            );

            wait_group.wait();
        },
        [parent_opt],
    );

    assert!(receiver.recv().unwrap());
    assert_eq!(child_counters.totals(), AllocTotals::new(30, 1, 1));
    assert_eq!(parent_counters.totals(), AllocTotals::ZERO);
}

#[test]
fn wait_group_balances_with_panicking_tracers() {
    const SPAWNS: usize = 16;

    let wait_group = WaitGroup::new();
    let before = wait_group.outstanding();

    for i in 0..SPAWNS {
        go_trace(
            &TraceContext::background(),
            Some(&wait_group),
            move |_| {
                track_alloc(1, 1);
                assert!(i % 3 != 0, "intentional panic in every third tracer");
            },
            [],
        );
    }

    wait_group.wait();

    assert_eq!(wait_group.outstanding(), before);
}

#[test]
fn spawned_work_shares_logical_trace() {
    const WORKERS: i64 = 6;

    let wait_group = WaitGroup::new();

    let request = trace(
        &TraceContext::background(),
        |request| {
            track_alloc(100, 1);

            for _ in 0..WORKERS {
                go_trace(
                    request,
                    Some(&wait_group),
                    |_| track_alloc(10, 1),
                    [ContextOpt::inherit_tracker()],
                );
            }

            request.clone()
        },
        [ContextOpt::name("request")],
    );

    wait_group.wait();

    assert_eq!(
        request.totals(),
        Some(AllocTotals::new(100 + 10 * WORKERS, 1 + WORKERS, 1 + WORKERS))
    );
}

#[test]
fn limits_can_be_checked_by_tracer() {
    let exceeded_at = trace(
        &TraceContext::background(),
        |ctx| {
            let mut allocations = 0;

            while !ctx.beyond_alloc_bytes_limit() {
                track_alloc(64, 1);
                allocations += 1;
            }

            allocations
        },
        [ContextOpt::max_alloc_bytes(1000)],
    );

    // 15 * 64 = 960 is within the limit, 16 * 64 = 1024 is beyond it.
    assert_eq!(exceeded_at, 16);
}
