use std::io;

use thiserror::Error;

use crate::LoopId;

/// Misuse and startup errors reported by the scheduler.
///
/// None of these are recoverable runtime conditions: they mean the caller
/// used the scheduler in the wrong lifecycle state or from the wrong thread.
#[derive(Debug, Error)]
pub enum MevelError {
    /// `initialize` was called while an instance is already alive.
    #[error("mevel is already initialized")]
    AlreadyInitialized,

    /// A scheduling or shutdown call was made while no instance is running.
    #[error("mevel is not running")]
    NotRunning,

    /// A loop-local operation was called from a thread that is not an event loop.
    #[error("the current thread is not a mevel event loop")]
    NotOnEventLoop,

    /// `shutdown` was called from an event loop thread, which would have to
    /// join itself.
    #[error("mevel cannot be shut down from one of its own event loops")]
    CalledFromEventLoop,

    /// A submission named a loop id that does not exist.
    #[error("no event loop with id {0}")]
    UnknownLoop(LoopId),

    /// The builder was given a configuration it cannot run with.
    #[error("invalid mevel configuration: {0}")]
    InvalidConfig(&'static str),

    /// The OS refused to create an event loop thread.
    #[error("failed to spawn event loop thread {id}")]
    SpawnThread {
        id: LoopId,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = MevelError> = std::result::Result<T, E>;
