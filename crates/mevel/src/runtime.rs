//! Process-wide lifecycle and the shared scheduler core.
//!
//! Only one scheduler may be alive per process. The lifecycle state lives in
//! a static so that misuse (double initialize, use after shutdown) is caught
//! no matter which thread attempts it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::adapter::{self, Placement, Task};
use crate::config::{Builder, FaultHandling};
use crate::error::{MevelError, Result};
use crate::event::{MevelEvent, TaskRunnable};
use crate::event_loop::{self, EventLoop, LoopSettings};
use crate::global::GlobalQueue;
use crate::yield_now::{FairnessYield, FastYield};
use crate::LoopId;

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const RUNNING: u8 = 2;
const SHUTTING_DOWN: u8 = 3;

static STATE: AtomicU8 = AtomicU8::new(UNINITIALIZED);
static INSTANCE: Mutex<Option<Runtime>> = parking_lot::const_mutex(None);

/// State shared by every loop thread and every [`Handle`].
pub(crate) struct Core {
    global: GlobalQueue,
    loops: usize,
    cursor: AtomicUsize,
    running: AtomicBool,
    poll_mask: usize,
    steal_interval: Duration,
    fault_handling: FaultHandling,
}

impl Core {
    fn new(builder: &Builder, loops: usize) -> Self {
        Core {
            global: GlobalQueue::new(loops),
            loops,
            cursor: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            poll_mask: builder.global_poll_interval - 1,
            steal_interval: builder.steal_interval,
            fault_handling: builder.fault_handling.clone(),
        }
    }

    pub(crate) fn global(&self) -> &GlobalQueue {
        &self.global
    }

    pub(crate) fn poll_mask(&self) -> usize {
        self.poll_mask
    }

    pub(crate) fn steal_interval(&self) -> Duration {
        self.steal_interval
    }

    pub(crate) fn fault_handling(&self) -> &FaultHandling {
        &self.fault_handling
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(MevelError::NotRunning)
        }
    }

    /// The next loop in rotation.
    pub(crate) fn choose_loop_round_robin(&self) -> LoopId {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.loops;
        LoopId::from_index(index)
    }

    /// Hands `event` to the round-robin loop through the global queue.
    ///
    /// The chosen loop runs it unless it stays busy long enough for an idle
    /// loop to steal it. Fails once shutdown has closed the queue, even if
    /// `ensure_running` passed a moment earlier.
    pub(crate) fn submit_cross_thread(&self, event: MevelEvent) -> Result<()> {
        let target = self.choose_loop_round_robin();
        self.global
            .push_hinted(target, event)
            .map_err(|_| MevelError::NotRunning)
    }
}

/// A live scheduler: the core plus the threads driving it.
struct Runtime {
    core: Arc<Core>,
    loops: Vec<EventLoop>,
}

impl Runtime {
    /// Stops and joins every loop, then discards whatever is left in the
    /// global queue.
    fn stop(mut self) {
        self.core.running.store(false, Ordering::Release);
        for event_loop in &self.loops {
            event_loop.signal_shutdown();
        }
        self.core.global.stop();
        for event_loop in &mut self.loops {
            event_loop.join();
            tracing::trace!(loop_id = %event_loop.id(), "joined event loop");
        }
        let leftover = self.core.global.drain();
        if !leftover.is_empty() {
            tracing::debug!(discarded = leftover.len(), "discarding global events");
        }
        drop(leftover);
    }
}

pub(crate) fn initialize(builder: Builder) -> Result<Handle> {
    builder.validate()?;
    STATE
        .compare_exchange(UNINITIALIZED, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| MevelError::AlreadyInitialized)?;

    let count = builder.loop_count();
    let core = Arc::new(Core::new(&builder, count));
    let settings = LoopSettings {
        initial_capacity: builder.initial_capacity,
        thread_name: &builder.thread_name,
        stack_size: builder.stack_size,
    };

    let mut loops = Vec::with_capacity(count);
    for index in 0..count {
        match EventLoop::spawn(LoopId::from_index(index), core.clone(), &settings) {
            Ok(event_loop) => loops.push(event_loop),
            Err(error) => {
                tracing::error!(%error, "failed to start mevel");
                Runtime { core, loops }.stop();
                STATE.store(UNINITIALIZED, Ordering::Release);
                return Err(error);
            }
        }
    }

    *INSTANCE.lock() = Some(Runtime {
        core: core.clone(),
        loops,
    });
    STATE.store(RUNNING, Ordering::Release);
    tracing::info!(event_loops = count, "mevel initialized");
    Ok(Handle { core })
}

pub(crate) fn shutdown() -> Result<()> {
    if event_loop::current_loop().is_some() {
        return Err(MevelError::CalledFromEventLoop);
    }
    STATE
        .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| MevelError::NotRunning)?;

    // Take the runtime out first: dropping leftover tasks may call back in.
    let runtime = INSTANCE.lock().take();
    if let Some(runtime) = runtime {
        runtime.stop();
    }

    STATE.store(UNINITIALIZED, Ordering::Release);
    tracing::info!("mevel shut down");
    Ok(())
}

pub(crate) fn is_running() -> bool {
    STATE.load(Ordering::Acquire) == RUNNING
}

/// The running core, preferring the calling loop's own reference.
pub(crate) fn current_core() -> Result<Arc<Core>> {
    let core = match event_loop::local_core() {
        Some(core) => core,
        None => INSTANCE
            .lock()
            .as_ref()
            .map(|runtime| runtime.core.clone())
            .ok_or(MevelError::NotRunning)?,
    };
    core.ensure_running()?;
    Ok(core)
}

pub(crate) fn handle() -> Result<Handle> {
    current_core().map(|core| Handle { core })
}

/// A cheap, cloneable reference to the running scheduler.
///
/// Every operation fails with [`MevelError::NotRunning`] once the scheduler
/// this handle came from has been shut down.
#[derive(Clone)]
pub struct Handle {
    core: Arc<Core>,
}

impl Handle {
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Number of event loops.
    pub fn event_loops(&self) -> usize {
        self.core.loops
    }

    /// Spawns a future whose wake-ups prefer the waking loop's local queue.
    pub fn spawn<F>(&self, future: F) -> Result<Task<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        adapter::spawn(&self.core, Placement::Affine, future)
    }

    /// Spawns a future that always goes through the global queue and is
    /// never run inline.
    pub fn spawn_fair<F>(&self, future: F) -> Result<Task<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        adapter::spawn(&self.core, Placement::Fair, future)
    }

    /// Schedules a task's next poll.
    pub fn queue(&self, runnable: TaskRunnable) -> Result<()> {
        adapter::queue(&self.core, runnable)
    }

    /// Polls the task on the calling loop if allowed.
    ///
    /// Returns `Ok(false)` if the task was refused and queued cross-thread
    /// instead.
    pub fn try_execute_inline(&self, runnable: TaskRunnable) -> Result<bool> {
        adapter::try_execute_inline(&self.core, runnable)
    }

    /// Tasks waiting to run. The scheduler keeps no inspectable backlog, so
    /// this is always empty.
    pub fn scheduled_tasks(&self) -> impl Iterator<Item = &TaskRunnable> + '_ {
        std::iter::empty()
    }

    /// Sends `event` to the next loop in rotation via the global queue.
    ///
    /// If that loop is busy, an idle loop may run the event instead.
    pub fn submit(&self, event: MevelEvent) -> Result<()> {
        self.core.ensure_running()?;
        self.core.submit_cross_thread(event)
    }

    /// Sends `event` to a specific loop via the global queue. No other loop
    /// will run it.
    pub fn submit_to(&self, id: LoopId, event: MevelEvent) -> Result<()> {
        self.core.ensure_running()?;
        if id.index() >= self.core.loops {
            return Err(MevelError::UnknownLoop(id));
        }
        self.core
            .global
            .push_pinned(id, event)
            .map_err(|_| MevelError::NotRunning)
    }

    /// Sends `event` to whichever loop polls the global queue first.
    pub fn submit_any(&self, event: MevelEvent) -> Result<()> {
        self.core.ensure_running()?;
        self.core
            .global
            .push_any(event)
            .map_err(|_| MevelError::NotRunning)
    }

    /// Advances the rotation and returns the loop it landed on.
    pub fn choose_loop_round_robin(&self) -> LoopId {
        self.core.choose_loop_round_robin()
    }

    pub fn fast_yield(&self) -> Result<FastYield> {
        self.core.ensure_running()?;
        Ok(FastYield::new(self.core.clone()))
    }

    pub fn fairness_yield(&self) -> Result<FairnessYield> {
        self.core.ensure_running()?;
        Ok(FairnessYield::new(self.core.clone()))
    }

    /// Events waiting in the global queue, across all lanes.
    pub fn global_backlog(&self) -> usize {
        self.core.global.len()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("event_loops", &self.core.loops)
            .field("running", &self.core.is_running())
            .finish()
    }
}
