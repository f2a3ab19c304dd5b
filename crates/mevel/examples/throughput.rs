//! Throughput load test: pushes a large number of tiny continuations
//! through the scheduler and reports items per second for each path.
//!
//! Run with: `cargo run --release -p mevel --example throughput -- 4`

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures::executor::block_on;
use mevel::MevelEvent;

const ITEMS: usize = 1_000_000;
const TASKS: usize = 1_000;
const YIELDS_PER_TASK: usize = 100;

// ── Reporting ───────────────────────────────────────────────────────

fn report(label: &str, items: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let millis = secs * 1000.0;
    let rate = items as f64 / secs;
    println!("{label:<28} {items:>9} items  {millis:>10.2} ms  {rate:>14.0} items/s");
}

fn wait_for(counter: &AtomicUsize, target: usize) {
    while counter.load(Ordering::Acquire) < target {
        thread::sleep(Duration::from_micros(200));
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

/// One seed item fans out into `ITEMS` local pushes on its own loop.
fn local_burst(handle: &mevel::Handle) {
    let done = Arc::new(AtomicUsize::new(0));
    let d = done.clone();
    let start = Instant::now();
    handle
        .submit(MevelEvent::from_fn(move || {
            for _ in 0..ITEMS {
                let d = d.clone();
                let _ = mevel::enqueue_local(MevelEvent::from_fn(move || {
                    d.fetch_add(1, Ordering::Release);
                }));
            }
        }))
        .expect("scheduler is running");
    wait_for(&done, ITEMS);
    report("local burst", ITEMS, start.elapsed());
}

/// `ITEMS` submissions from this thread, spread round robin.
fn cross_thread(handle: &mevel::Handle) {
    let done = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    for _ in 0..ITEMS {
        let d = done.clone();
        handle
            .submit(MevelEvent::from_fn(move || {
                d.fetch_add(1, Ordering::Release);
            }))
            .expect("scheduler is running");
    }
    wait_for(&done, ITEMS);
    report("cross-thread submit", ITEMS, start.elapsed());
}

/// Many tasks each yielding repeatedly with the given primitive.
fn yielding_tasks(handle: &mevel::Handle, fair: bool) {
    let start = Instant::now();
    let tasks: Vec<_> = (0..TASKS)
        .map(|_| {
            handle
                .spawn(async move {
                    for _ in 0..YIELDS_PER_TASK {
                        if fair {
                            mevel::fairness_yield().await;
                        } else {
                            mevel::fast_yield().await;
                        }
                    }
                })
                .expect("scheduler is running")
        })
        .collect();
    for task in tasks {
        block_on(task);
    }
    let label = if fair { "fairness yield" } else { "fast yield" };
    report(label, TASKS * YIELDS_PER_TASK, start.elapsed());
}

fn main() {
    let loops = env::args().nth(1).and_then(|arg| arg.parse().ok());
    let handle = mevel::initialize(loops).expect("failed to start mevel");
    println!("mevel with {} event loops", handle.event_loops());

    local_burst(&handle);
    cross_thread(&handle);
    yielding_tasks(&handle, false);
    yielding_tasks(&handle, true);

    mevel::shutdown().expect("failed to stop mevel");
}
