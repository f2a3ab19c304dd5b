//! mevel: a multi event loop scheduler for huge numbers of short tasks.
//!
//! The scheduler is a fixed pool of event loop threads. Each loop owns a
//! private ring buffer that only its own thread ever touches, so the common
//! case (a task waking another task on the same loop) costs a slot write and
//! nothing else. Work that crosses threads goes through a single shared
//! Global Events Queue, which is also where idle loops block.
//!
//! The scheduler is a process-wide singleton with an explicit lifecycle:
//!
//! ```ignore
//! let handle = mevel::initialize(Some(4))?;
//!
//! let task = handle.spawn(async {
//!     // Resume on this loop after everything queued behind us.
//!     mevel::fast_yield().await;
//!     // Resume on the next loop in rotation.
//!     mevel::fairness_yield().await;
//!     42
//! })?;
//!
//! assert_eq!(futures::executor::block_on(task), 42);
//! mevel::shutdown()?;
//! ```
//!
//! Tasks are `async-task` tasks carrying a [`Placement`]; the adapter
//! operations on [`Handle`] (`queue`, `try_execute_inline`,
//! `scheduled_tasks`) are what `async-task` needs from a scheduler.

mod adapter;
mod config;
mod error;
mod event;
mod event_loop;
mod global;
mod ring;
mod runtime;
mod yield_now;

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;

pub use adapter::{Placement, Task};
pub use config::{panic_message, Builder, FaultHandler, FaultHandling};
pub use error::{MevelError, Result};
pub use event::{EventState, MevelEvent, TaskRunnable};
pub use event_loop::{current_loop, enqueue_local, local_queue_capacity};
pub use runtime::Handle;
pub use yield_now::{FairnessYield, FastYield};

/// Identifies an event loop. Ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(NonZeroUsize);

impl LoopId {
    /// Returns `None` for zero.
    pub fn new(id: usize) -> Option<Self> {
        NonZeroUsize::new(id).map(LoopId)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }

    pub(crate) fn from_index(index: usize) -> Self {
        LoopId(NonZeroUsize::MIN.saturating_add(index))
    }

    pub(crate) fn index(self) -> usize {
        self.0.get() - 1
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────

/// Starts the scheduler with `event_loops` loops (default: one per logical
/// CPU) and every other setting at its default.
///
/// Fails with [`MevelError::AlreadyInitialized`] if a scheduler is alive.
pub fn initialize(event_loops: Option<usize>) -> Result<Handle> {
    let mut builder = Builder::new();
    if let Some(count) = event_loops {
        builder = builder.event_loops(count);
    }
    builder.initialize()
}

/// Stops every loop, joins their threads and discards queued work.
///
/// Fails with [`MevelError::NotRunning`] if no scheduler is alive, and with
/// [`MevelError::CalledFromEventLoop`] on a loop thread.
pub fn shutdown() -> Result<()> {
    runtime::shutdown()
}

/// A handle to the running scheduler.
pub fn handle() -> Result<Handle> {
    runtime::handle()
}

pub fn is_running() -> bool {
    runtime::is_running()
}

// ── Tasks ───────────────────────────────────────────────────────────

/// Spawns a task on the running scheduler. See [`Handle::spawn`].
pub fn spawn<F>(future: F) -> Result<Task<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle()?.spawn(future)
}

/// Spawns a fair task on the running scheduler. See [`Handle::spawn_fair`].
pub fn spawn_fair<F>(future: F) -> Result<Task<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle()?.spawn_fair(future)
}

// ── Yields ──────────────────────────────────────────────────────────

/// Like [`fast_yield`], but reports misuse instead of panicking.
pub fn try_fast_yield() -> Result<FastYield> {
    handle()?.fast_yield()
}

/// Like [`fairness_yield`], but reports misuse instead of panicking.
pub fn try_fairness_yield() -> Result<FairnessYield> {
    handle()?.fairness_yield()
}

/// Yields, resuming on the current event loop if there is one.
///
/// # Panics
///
/// If the scheduler is not running.
pub fn fast_yield() -> FastYield {
    match try_fast_yield() {
        Ok(fast) => fast,
        Err(error) => panic!("cannot yield: {error}"),
    }
}

/// Yields, resuming on the next loop in rotation.
///
/// # Panics
///
/// If the scheduler is not running.
pub fn fairness_yield() -> FairnessYield {
    match try_fairness_yield() {
        Ok(fair) => fair,
        Err(error) => panic!("cannot yield: {error}"),
    }
}
