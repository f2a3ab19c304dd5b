//! Voluntary suspension points.
//!
//! Both futures return `Pending` exactly once. Instead of waking the task
//! directly, they queue a small event that performs the wake when a loop
//! runs it, which is what decides the loop the continuation resumes on.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::Result;
use crate::event::MevelEvent;
use crate::event_loop::{current_loop, try_enqueue_local};
use crate::runtime::Core;
use crate::LoopId;

fn assert_running(result: Result<()>) {
    if let Err(error) = result {
        panic!("cannot yield: {error}");
    }
}

/// Yields to the scheduler, resuming on the same event loop if there is one.
///
/// If the future was created on an event loop and is polled there, the
/// continuation goes to the back of that loop's local queue. Otherwise it
/// is sent through the global queue.
#[must_use = "futures do nothing unless `.await`ed or polled"]
pub struct FastYield {
    core: Arc<Core>,
    origin: Option<LoopId>,
    yielded: bool,
}

impl FastYield {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            origin: current_loop(),
            yielded: false,
        }
    }

    /// The loop this yield was created on, if any.
    pub fn origin(&self) -> Option<LoopId> {
        self.origin
    }
}

impl Future for FastYield {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        assert_running(self.core.ensure_running());
        self.yielded = true;

        let mut event = MevelEvent::wake(cx.waker().clone());
        if self.origin.is_some() && self.origin == current_loop() {
            match try_enqueue_local(event) {
                Ok(()) => return Poll::Pending,
                Err(returned) => event = returned,
            }
        }
        assert_running(self.core.submit_cross_thread(event));
        Poll::Pending
    }
}

impl fmt::Debug for FastYield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastYield")
            .field("origin", &self.origin)
            .field("yielded", &self.yielded)
            .finish()
    }
}

/// Yields to the scheduler, resuming on whichever loop the round robin
/// picks next.
///
/// Trades the caller's loop affinity for an even spread across loops, so
/// that a long-running task cannot monopolize one loop.
#[must_use = "futures do nothing unless `.await`ed or polled"]
pub struct FairnessYield {
    core: Arc<Core>,
    yielded: bool,
}

impl FairnessYield {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            yielded: false,
        }
    }
}

impl Future for FairnessYield {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        assert_running(self.core.ensure_running());
        self.yielded = true;
        assert_running(
            self.core
                .submit_cross_thread(MevelEvent::wake(cx.waker().clone())),
        );
        Poll::Pending
    }
}

impl fmt::Debug for FairnessYield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairnessYield")
            .field("yielded", &self.yielded)
            .finish()
    }
}
