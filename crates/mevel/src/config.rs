//! Scheduler configuration.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MevelError, Result};
use crate::runtime::{self, Handle};
use crate::LoopId;

/// Callback invoked with the panic payload of a failed work item.
pub type FaultHandler = Arc<dyn Fn(LoopId, Box<dyn Any + Send>) + Send + Sync>;

/// What an event loop does with a work item that panicked.
///
/// The loop itself always survives; this only decides who hears about it.
#[derive(Clone, Default)]
pub enum FaultHandling {
    /// Drop the payload. Only a `trace` event is emitted.
    #[default]
    Discard,
    /// Emit a `tracing::error!` event with the loop id and panic message.
    Log,
    /// Hand the payload to a user callback, on the loop thread.
    Custom(FaultHandler),
}

impl FaultHandling {
    pub(crate) fn report(&self, id: LoopId, payload: Box<dyn Any + Send>) {
        match self {
            FaultHandling::Discard => {
                tracing::trace!(loop_id = %id, "discarding panic from work item");
            }
            FaultHandling::Log => {
                tracing::error!(
                    loop_id = %id,
                    panic = panic_message(payload.as_ref()),
                    "work item panicked"
                );
            }
            FaultHandling::Custom(handler) => handler(id, payload),
        }
    }
}

impl fmt::Debug for FaultHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultHandling::Discard => f.write_str("Discard"),
            FaultHandling::Log => f.write_str("Log"),
            FaultHandling::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Configures and starts the process-wide scheduler.
///
/// ```ignore
/// let handle = mevel::Builder::new()
///     .event_loops(4)
///     .fault_handling(mevel::FaultHandling::Log)
///     .initialize()?;
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    pub(crate) event_loops: Option<usize>,
    pub(crate) initial_capacity: usize,
    pub(crate) global_poll_interval: usize,
    pub(crate) steal_interval: Duration,
    pub(crate) thread_name: String,
    pub(crate) stack_size: Option<usize>,
    pub(crate) fault_handling: FaultHandling,
}

impl Builder {
    /// Slots each local queue starts with.
    pub const DEFAULT_INITIAL_CAPACITY: usize = 65_536;

    /// How many local dequeues happen between peeks at the global queue.
    pub const DEFAULT_GLOBAL_POLL_INTERVAL: usize = 512;

    /// How long a loop waits idle before stealing hinted work from a busy
    /// loop.
    pub const DEFAULT_STEAL_INTERVAL: Duration = Duration::from_millis(1);

    pub const DEFAULT_THREAD_NAME: &'static str = "mevel-loop";

    pub fn new() -> Self {
        Self {
            event_loops: None,
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            global_poll_interval: Self::DEFAULT_GLOBAL_POLL_INTERVAL,
            steal_interval: Self::DEFAULT_STEAL_INTERVAL,
            thread_name: Self::DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
            fault_handling: FaultHandling::default(),
        }
    }

    /// Number of event loops. Defaults to the number of logical CPUs.
    pub fn event_loops(mut self, count: usize) -> Self {
        self.event_loops = Some(count);
        self
    }

    /// Starting capacity of each local queue, rounded up to a power of two.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Local dequeues between non-blocking peeks at the global queue.
    ///
    /// Must be a power of two.
    pub fn global_poll_interval(mut self, interval: usize) -> Self {
        self.global_poll_interval = interval;
        self
    }

    /// Idle time after which a loop takes round-robin work that is still
    /// waiting for a busy loop. Repeated empty waits back off from here.
    pub fn steal_interval(mut self, interval: Duration) -> Self {
        self.steal_interval = interval;
        self
    }

    /// Prefix of the loop thread names; the loop id is appended.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn fault_handling(mut self, handling: FaultHandling) -> Self {
        self.fault_handling = handling;
        self
    }

    /// Shorthand for [`FaultHandling::Custom`].
    pub fn on_fault<F>(self, handler: F) -> Self
    where
        F: Fn(LoopId, Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.fault_handling(FaultHandling::Custom(Arc::new(handler)))
    }

    /// Starts the scheduler with this configuration.
    pub fn initialize(self) -> Result<Handle> {
        runtime::initialize(self)
    }

    pub(crate) fn loop_count(&self) -> usize {
        self.event_loops.unwrap_or_else(num_cpus::get)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.loop_count() == 0 {
            return Err(MevelError::InvalidConfig("at least one event loop is required"));
        }
        if self.initial_capacity == 0 {
            return Err(MevelError::InvalidConfig("initial capacity must be non-zero"));
        }
        if !self.global_poll_interval.is_power_of_two() {
            return Err(MevelError::InvalidConfig(
                "global poll interval must be a power of two",
            ));
        }
        if self.steal_interval.is_zero() {
            return Err(MevelError::InvalidConfig("steal interval must be non-zero"));
        }
        Ok(())
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn defaults_are_valid() {
        let builder = Builder::new();
        assert!(builder.validate().is_ok());
        assert_eq!(builder.loop_count(), num_cpus::get());
        assert_eq!(builder.initial_capacity, 65_536);
        assert_eq!(builder.global_poll_interval, 512);
        assert_eq!(builder.steal_interval, Duration::from_millis(1));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Builder::new().event_loops(0).validate(),
            Err(MevelError::InvalidConfig(_))
        ));
        assert!(matches!(
            Builder::new().initial_capacity(0).validate(),
            Err(MevelError::InvalidConfig(_))
        ));
        assert!(matches!(
            Builder::new().global_poll_interval(500).validate(),
            Err(MevelError::InvalidConfig(_))
        ));
        assert!(matches!(
            Builder::new().steal_interval(Duration::ZERO).validate(),
            Err(MevelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn custom_fault_handler_receives_payload() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let builder = Builder::new().on_fault(move |id, payload| {
            assert_eq!(id.get(), 3);
            assert_eq!(panic_message(payload.as_ref()), "boom");
            s.fetch_add(1, Ordering::SeqCst);
        });
        builder
            .fault_handling
            .report(LoopId::new(3).unwrap(), Box::new("boom"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
