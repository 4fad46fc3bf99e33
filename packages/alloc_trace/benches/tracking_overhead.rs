//! Benchmarks to measure the compute overhead of `alloc_trace` logic itself.
//!
//! These benchmarks measure the cost of reporting an event with and without an active trace,
//! the cost of entering and leaving a trace, and the cost the tracking allocator adds to a
//! small allocation.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;

use alloc_trace::{Allocator, TraceContext, trace, track_alloc};
use criterion::{Criterion, criterion_group, criterion_main};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

criterion_group!(benches, entrypoint);
criterion_main!(benches);

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_trace_overhead");

    // Baseline measurement - no tracking at all
    group.bench_function("baseline_empty", |b| {
        b.iter(|| {
            black_box(());
        });
    });

    group.bench_function("track_alloc_untraced", |b| {
        b.iter(|| {
            track_alloc(black_box(64), black_box(1));
        });
    });

    let background = TraceContext::background();

    group.bench_function("track_alloc_traced", |b| {
        trace(
            &background,
            |_| {
                b.iter(|| {
                    track_alloc(black_box(64), black_box(1));
                });
            },
            [],
        );
    });

    let ctx = TraceContext::new(&background, []);
    group.bench_function("enter_scope_empty", |b| {
        b.iter(|| {
            let _scope = ctx.enter();
            black_box(());
        });
    });

    group.bench_function("trace_empty", |b| {
        b.iter(|| {
            trace(&background, |_| black_box(()), []);
        });
    });

    group.bench_function("box_allocation_traced", |b| {
        trace(
            &background,
            |_| {
                b.iter(|| {
                    black_box(Box::new(black_box(42_u64)));
                });
            },
            [],
        );
    });

    group.finish();
}
