mod support;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::executor::block_on;
use mevel::{Builder, LoopId, MevelError, MevelEvent};

use support::{exclusive, start_with_loops, wait_until};

#[test]
fn use_before_initialize_is_rejected() {
    let _guard = exclusive();

    assert!(!mevel::is_running());
    assert!(matches!(mevel::handle(), Err(MevelError::NotRunning)));
    assert!(matches!(mevel::spawn(async {}), Err(MevelError::NotRunning)));
    assert!(matches!(mevel::try_fast_yield(), Err(MevelError::NotRunning)));
    assert!(matches!(mevel::try_fairness_yield(), Err(MevelError::NotRunning)));
    assert!(matches!(mevel::shutdown(), Err(MevelError::NotRunning)));
    assert!(!mevel::is_running());
}

#[test]
#[should_panic(expected = "mevel is not running")]
fn fast_yield_panics_when_not_running() {
    let _guard = exclusive();
    let _ = mevel::fast_yield();
}

#[test]
#[should_panic(expected = "mevel is not running")]
fn fairness_yield_panics_when_not_running() {
    let _guard = exclusive();
    let _ = mevel::fairness_yield();
}

#[test]
fn double_initialize_is_rejected() {
    let running = start_with_loops(2);

    assert!(matches!(
        mevel::initialize(Some(3)),
        Err(MevelError::AlreadyInitialized)
    ));

    // The first instance is untouched.
    assert!(mevel::is_running());
    assert_eq!(mevel::handle().unwrap().event_loops(), 2);
    let task = running.handle.spawn(async { 1 }).unwrap();
    assert_eq!(block_on(task), 1);
}

#[test]
fn invalid_config_leaves_state_uninitialized() {
    let _guard = exclusive();
    assert!(matches!(
        Builder::new().event_loops(0).initialize(),
        Err(MevelError::InvalidConfig(_))
    ));
    assert!(matches!(
        Builder::new().global_poll_interval(3).initialize(),
        Err(MevelError::InvalidConfig(_))
    ));
    assert!(!mevel::is_running());
}

#[test]
fn reinitialize_after_shutdown() {
    let _guard = exclusive();

    for loops in [1, 3] {
        let handle = mevel::initialize(Some(loops)).unwrap();
        assert_eq!(handle.event_loops(), loops);
        let task = handle.spawn(async { mevel::current_loop().is_some() }).unwrap();
        assert!(block_on(task));
        mevel::shutdown().unwrap();
        assert!(!handle.is_running());
    }
}

#[test]
fn default_loop_count_is_cpu_count() {
    let _guard = exclusive();
    let handle = mevel::initialize(None).unwrap();
    assert_eq!(handle.event_loops(), num_cpus::get());
    mevel::shutdown().unwrap();
}

#[test]
fn loop_threads_are_named() {
    let running = support::start(Builder::new().event_loops(2).thread_name("sched"));
    let task = running
        .handle
        .spawn(async { thread::current().name().map(str::to_owned) })
        .unwrap();
    let name = block_on(task).unwrap();
    assert!(name == "sched-1" || name == "sched-2", "unexpected name {name}");
}

#[test]
fn shutdown_stops_queued_work_and_rejects_new_work() {
    let running = start_with_loops(1);
    let handle = running.handle.clone();
    let loop_one = LoopId::new(1).unwrap();

    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(0);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    let ran_after = Arc::new(AtomicUsize::new(0));

    // Occupy the only loop, leaving local work queued behind it.
    let local_ran = ran_after.clone();
    handle
        .submit_to(
            loop_one,
            MevelEvent::from_fn(move || {
                for _ in 0..100 {
                    let local_ran = local_ran.clone();
                    mevel::enqueue_local(MevelEvent::from_fn(move || {
                        local_ran.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
                }
                let _ = started_tx.send(());
                let _ = release_rx.recv();
            }),
        )
        .unwrap();
    started_rx.recv().unwrap();

    for _ in 0..100 {
        let global_ran = ran_after.clone();
        handle
            .submit_to(
                loop_one,
                MevelEvent::from_fn(move || {
                    global_ran.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }

    let stopper = thread::spawn(mevel::shutdown);
    wait_until("shutdown to begin", || !mevel::is_running());
    // The stop flags are set right after the state flips.
    thread::sleep(Duration::from_millis(50));
    release_tx.send(()).unwrap();
    stopper.join().unwrap().unwrap();

    assert_eq!(ran_after.load(Ordering::SeqCst), 0);
    assert!(matches!(
        handle.submit(MevelEvent::Callback(|| {})),
        Err(MevelError::NotRunning)
    ));
    assert!(matches!(handle.spawn(async {}), Err(MevelError::NotRunning)));
    assert!(matches!(handle.fast_yield(), Err(MevelError::NotRunning)));
    assert!(matches!(mevel::spawn(async {}), Err(MevelError::NotRunning)));
    assert_eq!(handle.global_backlog(), 0);
}

#[test]
fn task_woken_after_shutdown_is_cancelled() {
    let running = start_with_loops(1);
    let (tx, rx) = futures::channel::oneshot::channel::<()>();
    let parked = Arc::new(AtomicBool::new(false));
    let p = parked.clone();

    let task = running
        .handle
        .spawn(async move {
            p.store(true, Ordering::SeqCst);
            let _ = rx.await;
            7
        })
        .unwrap()
        .fallible();
    wait_until("task to park", || parked.load(Ordering::SeqCst));

    mevel::shutdown().unwrap();
    // Wakes the task from this thread; the scheduler is gone, so the task
    // is dropped instead of queued.
    let _ = tx.send(());
    assert_eq!(block_on(task), None);
}

#[test]
fn shutdown_from_a_loop_is_rejected() {
    let running = start_with_loops(1);
    let task = running.handle.spawn(async { mevel::shutdown() }).unwrap();
    assert!(matches!(
        block_on(task),
        Err(MevelError::CalledFromEventLoop)
    ));
    assert!(mevel::is_running());
}

#[test]
fn enqueue_local_off_loop_is_rejected() {
    let _running = start_with_loops(1);
    assert!(matches!(
        mevel::enqueue_local(MevelEvent::Callback(|| {})),
        Err(MevelError::NotOnEventLoop)
    ));
}
