//! Work items carried by the local and global queues.

use std::any::Any;
use std::fmt;
use std::task::Waker;

use async_task::Runnable;

use crate::adapter::Placement;

/// Opaque state handed to a [`MevelEvent::Stateful`] callback.
pub type EventState = Box<dyn Any + Send>;

/// A task handle as produced by `async-task` for tasks spawned on mevel.
pub type TaskRunnable = Runnable<Placement>;

/// One unit of work.
///
/// Running an event consumes it, so a slot that has been popped from a
/// queue can never be executed twice and holds no references afterwards.
pub enum MevelEvent {
    /// A callback with no state.
    Callback(fn()),
    /// A callback with one opaque state value.
    Stateful {
        callback: fn(EventState),
        state: EventState,
    },
    /// A task to poll until its next suspension point or completion.
    Task(TaskRunnable),
    /// A suspended continuation to resume. Yields queue these; the waker
    /// is stored inline so a yield costs no allocation.
    Wake(Waker),
}

impl MevelEvent {
    /// Wraps a closure as a stateful event.
    ///
    /// The closure itself is the state and the callback is a trampoline
    /// monomorphized for `F`, so zero-sized closures do not allocate.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        MevelEvent::Stateful {
            callback: call_once::<F>,
            state: Box::new(f),
        }
    }

    /// An event that wakes `waker` when it runs.
    pub(crate) fn wake(waker: Waker) -> Self {
        MevelEvent::Wake(waker)
    }

    /// Executes the event.
    ///
    /// Tasks are polled inline on the calling thread; the scheduler only
    /// ever calls this from an event loop's drain routine.
    pub fn run(self) {
        match self {
            MevelEvent::Callback(callback) => callback(),
            MevelEvent::Stateful { callback, state } => callback(state),
            MevelEvent::Task(runnable) => {
                runnable.run();
            }
            MevelEvent::Wake(waker) => waker.wake(),
        }
    }
}

fn call_once<F>(state: EventState)
where
    F: FnOnce() + Send + 'static,
{
    if let Ok(f) = state.downcast::<F>() {
        (*f)()
    }
}

impl fmt::Debug for MevelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MevelEvent::Callback(_) => f.write_str("MevelEvent::Callback"),
            MevelEvent::Stateful { .. } => f.write_str("MevelEvent::Stateful"),
            MevelEvent::Task(runnable) => f
                .debug_tuple("MevelEvent::Task")
                .field(runnable.metadata())
                .finish(),
            MevelEvent::Wake(_) => f.write_str("MevelEvent::Wake"),
        }
    }
}
