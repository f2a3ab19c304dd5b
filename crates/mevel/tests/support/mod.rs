//! Shared helpers for tests that start the process-wide scheduler.

#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use mevel::{Builder, Handle};
use parking_lot::{Mutex, MutexGuard};

/// Serialization guard: only one scheduler can be alive per process, and
/// the test harness runs tests on parallel threads.
static TEST_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// A running scheduler that is shut down when the test ends, pass or fail.
pub struct Running {
    pub handle: Handle,
    _guard: MutexGuard<'static, ()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = mevel::shutdown();
    }
}

/// Takes the test lock without starting anything.
pub fn exclusive() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock();
    // A previous test may have failed between initialize and shutdown.
    let _ = mevel::shutdown();
    guard
}

pub fn start(builder: Builder) -> Running {
    let guard = exclusive();
    let handle = builder.initialize().expect("scheduler should start");
    Running {
        handle,
        _guard: guard,
    }
}

pub fn start_with_loops(loops: usize) -> Running {
    start(Builder::new().event_loops(loops))
}

/// Spins until `done` holds. Safety valve: panics after ten seconds.
pub fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "timed out waiting for {what}"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

/// The loop the current item runs on, as a zero-based index.
pub fn loop_index() -> usize {
    mevel::current_loop().expect("should run on an event loop").get() - 1
}
