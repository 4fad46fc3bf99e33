//! Attributes the allocations of a few units of work, some of them on spawned threads, to
//! separate traces and prints what each one allocated.

use std::hint::black_box;
use std::sync::Arc;

use alloc_trace::{
    AllocCounters, Allocator, ContextOpt, TraceContext, Tracker, WaitGroup, go_trace, trace,
    untracked,
};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

fn main() {
    let background = TraceContext::background();

    // A unit of work on the current thread. The returned context holds the totals.
    let strings = trace(
        &background,
        |ctx| {
            let words = (0..100).map(|i| format!("word number {i}")).collect::<Vec<_>>();
            black_box(&words);

            ctx.clone()
        },
        [ContextOpt::name("format_strings")],
    );

    // Work fanned out to threads, all recorded into one shared accumulator.
    let fan_out = Arc::new(AllocCounters::new());
    let wait_group = WaitGroup::new();

    trace(
        &background,
        |request| {
            for worker in 0..4_usize {
                go_trace(
                    request,
                    Some(&wait_group),
                    move |_| {
                        let buffer = vec![0_u8; 1024 * (worker + 1)];
                        black_box(&buffer);
                    },
                    [ContextOpt::inherit_tracker()],
                );
            }
        },
        [
            ContextOpt::name("fan_out"),
            ContextOpt::tracker(Arc::clone(&fan_out)),
        ],
    );

    wait_group.wait();

    if let Some(totals) = strings.totals() {
        println!("{}: {totals}", strings.name().unwrap_or("<unnamed>"));
    }

    println!("fan_out: {}", fan_out.totals());
    println!("untracked: {}", untracked());
}
