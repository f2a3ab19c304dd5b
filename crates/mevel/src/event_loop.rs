//! Event loop threads and the thread-local state they own.
//!
//! Each loop thread installs its [`LocalQueue`] in thread-local storage when
//! it starts. Nothing outside that thread can name the queue, which is what
//! lets pushes and pops skip synchronization entirely.

use std::cell::{Cell, RefCell};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{MevelError, Result};
use crate::event::MevelEvent;
use crate::global::Wakeup;
use crate::ring::LocalQueue;
use crate::runtime::Core;
use crate::LoopId;

struct LoopLocal {
    queue: LocalQueue,
    core: Arc<Core>,
}

thread_local! {
    static CURRENT: Cell<Option<LoopId>> = const { Cell::new(None) };
    static LOCAL: RefCell<Option<LoopLocal>> = const { RefCell::new(None) };
}

/// Returns the id of the event loop running on this thread, if any.
pub fn current_loop() -> Option<LoopId> {
    CURRENT.try_with(Cell::get).ok().flatten()
}

/// Pushes onto this thread's local queue, handing the event back if this
/// thread is not an event loop.
pub(crate) fn try_enqueue_local(event: MevelEvent) -> std::result::Result<(), MevelEvent> {
    let mut event = Some(event);
    let _ = LOCAL.try_with(|cell| {
        if let Ok(mut local) = cell.try_borrow_mut() {
            if let Some(local) = local.as_mut() {
                if let Some(event) = event.take() {
                    local.queue.push(event);
                }
            }
        }
    });
    match event {
        None => Ok(()),
        Some(event) => Err(event),
    }
}

/// Appends `event` to the calling event loop's local queue.
///
/// Only an event loop thread may call this; any other thread gets
/// [`MevelError::NotOnEventLoop`] and the event is dropped.
pub fn enqueue_local(event: MevelEvent) -> Result<()> {
    try_enqueue_local(event).map_err(|_| MevelError::NotOnEventLoop)
}

/// Capacity of the calling event loop's local queue.
pub fn local_queue_capacity() -> Option<usize> {
    LOCAL
        .try_with(|local| {
            local
                .try_borrow()
                .ok()
                .and_then(|local| local.as_ref().map(|local| local.queue.capacity()))
        })
        .ok()
        .flatten()
}

/// The core this thread's event loop belongs to.
pub(crate) fn local_core() -> Option<Arc<Core>> {
    LOCAL
        .try_with(|local| {
            local
                .try_borrow()
                .ok()
                .and_then(|local| local.as_ref().map(|local| local.core.clone()))
        })
        .ok()
        .flatten()
}

fn pop_local() -> Option<(MevelEvent, usize)> {
    LOCAL.with(|local| {
        let mut local = local.borrow_mut();
        let queue = &mut local.as_mut()?.queue;
        let event = queue.pop()?;
        Some((event, queue.read_pointer()))
    })
}

/// Marks this thread as loop `id` for as long as the guard lives.
struct Enter {
    id: LoopId,
}

impl Enter {
    fn new(id: LoopId, core: Arc<Core>, capacity: usize) -> Self {
        CURRENT.with(|current| current.set(Some(id)));
        LOCAL.with(|local| {
            *local.borrow_mut() = Some(LoopLocal {
                queue: LocalQueue::with_capacity(capacity),
                core,
            })
        });
        Enter { id }
    }
}

impl Drop for Enter {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|current| current.set(None));
        let local = LOCAL.try_with(|local| local.borrow_mut().take()).ok().flatten();
        // Abandoned items are dropped out here, where nothing is borrowed,
        // since dropping a task may wake other tasks.
        if let Some(mut local) = local {
            let abandoned = local.queue.take_all();
            if !abandoned.is_empty() {
                tracing::debug!(loop_id = %self.id, abandoned = abandoned.len(), "dropping unexecuted local events");
            }
            drop(abandoned);
        }
    }
}

/// The owning side of one event loop: its id, stop flag and thread.
pub(crate) struct EventLoop {
    id: LoopId,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Per-thread settings copied out of the builder.
pub(crate) struct LoopSettings<'a> {
    pub(crate) initial_capacity: usize,
    pub(crate) thread_name: &'a str,
    pub(crate) stack_size: Option<usize>,
}

impl EventLoop {
    /// Starts the loop's thread.
    pub(crate) fn spawn(id: LoopId, core: Arc<Core>, settings: &LoopSettings<'_>) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let capacity = settings.initial_capacity;

        let mut builder = thread::Builder::new().name(format!("{}-{}", settings.thread_name, id));
        if let Some(stack_size) = settings.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let thread = builder
            .spawn(move || run(id, core, stop, capacity))
            .map_err(|source| MevelError::SpawnThread { id, source })?;

        Ok(EventLoop {
            id,
            shutdown,
            thread: Some(thread),
        })
    }

    pub(crate) fn id(&self) -> LoopId {
        self.id
    }

    /// Asks the loop to stop before its next item.
    pub(crate) fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Waits for the loop's thread to exit.
    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(loop_id = %self.id, "event loop thread panicked");
            }
        }
    }
}

/// Longest idle wait, as a multiple of the steal interval.
const MAX_IDLE_BACKOFF: u32 = 32;

/// The drain routine each loop thread runs until it is told to stop.
fn run(id: LoopId, core: Arc<Core>, shutdown: Arc<AtomicBool>, capacity: usize) {
    let poll_mask = core.poll_mask();
    let steal_interval = core.steal_interval();
    let mut idle_wait = steal_interval;
    let _enter = Enter::new(id, core.clone(), capacity);
    tracing::debug!(loop_id = %id, capacity, "event loop started");

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        if let Some((event, read_pointer)) = pop_local() {
            idle_wait = steal_interval;
            execute(&core, id, event);
            // Bounds how long global work can wait behind a local burst.
            if read_pointer & poll_mask == 0 {
                if let Some(event) = core.global().try_pop(id) {
                    execute(&core, id, event);
                }
            }
            continue;
        }

        if let Some(event) = core.global().try_pop(id) {
            idle_wait = steal_interval;
            execute(&core, id, event);
            continue;
        }

        match core.global().pop_blocking(id, idle_wait) {
            Wakeup::Event(event) => {
                idle_wait = steal_interval;
                execute(&core, id, event);
            }
            // Whatever is still sitting in another loop's hinted lane has an
            // owner that is busy.
            Wakeup::Idle => match core.global().steal(id) {
                Some(event) => {
                    tracing::trace!(loop_id = %id, "stole global event");
                    idle_wait = steal_interval;
                    execute(&core, id, event);
                }
                None => idle_wait = (idle_wait * 2).min(steal_interval * MAX_IDLE_BACKOFF),
            },
            Wakeup::Stop => {}
        }
    }

    tracing::debug!(loop_id = %id, "event loop stopped");
}

/// Runs one event, keeping the loop alive if it panics.
///
/// The fault handler runs under its own `catch_unwind`; a second panic is
/// logged and its payload leaked, since dropping it could panic again.
fn execute(core: &Core, id: LoopId, event: MevelEvent) {
    let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| event.run())) else {
        return;
    };
    let reported = panic::catch_unwind(AssertUnwindSafe(|| {
        core.fault_handling().report(id, payload);
    }));
    if let Err(nested) = reported {
        tracing::error!(loop_id = %id, "fault handling panicked");
        mem::forget(nested);
    }
}
