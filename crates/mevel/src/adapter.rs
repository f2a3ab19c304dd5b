//! Glue between `async-task` and the event loops.
//!
//! Every task spawned on mevel carries a [`Placement`] as its `async-task`
//! metadata. Its schedule function is [`queue`]: wake-ups that happen on an
//! event loop stay on that loop's local queue, everything else crosses over
//! through the global queue to a round-robin loop.

use std::future::Future;
use std::sync::{Arc, Weak};

use crate::error::{MevelError, Result};
use crate::event::{MevelEvent, TaskRunnable};
use crate::event_loop::{current_loop, try_enqueue_local};
use crate::runtime::Core;

/// Join handle for a task spawned on mevel.
pub type Task<T> = async_task::Task<T, Placement>;

/// Where a task's continuations may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Continuations woken on a loop run on that loop.
    #[default]
    Affine,
    /// Continuations always go through the global queue and are never run
    /// inline, spreading the task across loops.
    Fair,
}

/// Tries the local fast path, handing the runnable back if it doesn't apply.
fn enqueue_affine(runnable: TaskRunnable) -> std::result::Result<(), TaskRunnable> {
    if *runnable.metadata() == Placement::Fair {
        return Err(runnable);
    }
    try_enqueue_local(MevelEvent::Task(runnable)).map_err(|event| match event {
        MevelEvent::Task(runnable) => runnable,
        _ => unreachable!("local queue handed back a different event"),
    })
}

/// Schedules a task's next poll.
pub(crate) fn queue(core: &Core, runnable: TaskRunnable) -> Result<()> {
    core.ensure_running()?;
    match enqueue_affine(runnable) {
        Ok(()) => Ok(()),
        Err(runnable) => core.submit_cross_thread(MevelEvent::Task(runnable)),
    }
}

/// Polls the task right here if this is a loop thread and the task allows
/// it; otherwise queues it cross-thread and reports `false`.
pub(crate) fn try_execute_inline(core: &Core, runnable: TaskRunnable) -> Result<bool> {
    core.ensure_running()?;
    if current_loop().is_some() && *runnable.metadata() == Placement::Affine {
        runnable.run();
        return Ok(true);
    }
    core.submit_cross_thread(MevelEvent::Task(runnable))?;
    Ok(false)
}

pub(crate) fn spawn<F>(core: &Arc<Core>, placement: Placement, future: F) -> Result<Task<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    core.ensure_running()?;
    let (runnable, task) = async_task::Builder::new()
        .metadata(placement)
        .spawn(move |_| future, schedule_fn(Arc::downgrade(core)));
    queue(core, runnable)?;
    Ok(task)
}

/// The schedule function `async-task` calls whenever a task is woken.
///
/// The loop-local path needs no core at all; only cross-thread wake-ups
/// upgrade the weak reference.
fn schedule_fn(core: Weak<Core>) -> impl Fn(TaskRunnable) + Send + Sync + 'static {
    move |runnable| {
        let Err(runnable) = enqueue_affine(runnable) else {
            return;
        };
        let submitted = match core.upgrade() {
            Some(core) if core.is_running() => core.submit_cross_thread(MevelEvent::Task(runnable)),
            _ => {
                drop(runnable);
                Err(MevelError::NotRunning)
            }
        };
        // The refused runnable has already been dropped, cancelling the task.
        if submitted.is_err() {
            tracing::debug!("dropping task woken after shutdown");
        }
    }
}
