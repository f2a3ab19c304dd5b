//! The Global Events Queue.
//!
//! This is the only structure shared between threads. It is made of one
//! shared lane that any loop may take from and, per loop, a pinned lane
//! (`submit_to`) and a hinted lane (round-robin placement). A hinted event
//! is meant for its loop, but a loop that has sat idle may steal it when
//! the owner is busy. Pinned events only ever run on their loop.
//!
//! Pushes and shutdown share one lock: once `stop` has run no push can
//! succeed, so nothing is left behind after the final drain.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

use crate::event::MevelEvent;
use crate::LoopId;

struct Lane {
    tx: Sender<MevelEvent>,
    rx: Receiver<MevelEvent>,
}

impl Lane {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Lane { tx, rx }
    }

    fn len(&self) -> usize {
        self.rx.len()
    }
}

struct LoopLanes {
    pinned: Lane,
    hinted: Lane,
}

/// What a blocked loop woke up with.
pub(crate) enum Wakeup {
    Event(MevelEvent),
    /// Nothing arrived within the timeout.
    Idle,
    Stop,
}

pub(crate) struct GlobalQueue {
    shared: Lane,
    lanes: Box<[LoopLanes]>,
    /// `None` once stopped. Pushes hold the read side.
    stop_tx: RwLock<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
}

impl GlobalQueue {
    pub(crate) fn new(loops: usize) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);
        GlobalQueue {
            shared: Lane::new(),
            lanes: (0..loops)
                .map(|_| LoopLanes {
                    pinned: Lane::new(),
                    hinted: Lane::new(),
                })
                .collect(),
            stop_tx: RwLock::new(Some(stop_tx)),
            stop_rx,
        }
    }

    /// Sends on `lane` unless the queue has been stopped, in which case the
    /// event is handed back.
    fn push(&self, lane: &Lane, event: MevelEvent) -> Result<(), MevelEvent> {
        let open = self.stop_tx.read();
        if open.is_none() {
            return Err(event);
        }
        // Both ends live in `self`, so the channel cannot be disconnected.
        lane.tx.send(event).map_err(|error| error.into_inner())
    }

    /// Pushes an event that any loop may pick up.
    pub(crate) fn push_any(&self, event: MevelEvent) -> Result<(), MevelEvent> {
        self.push(&self.shared, event)
    }

    /// Pushes an event meant for loop `id`, which other loops may steal once
    /// they have been idle.
    pub(crate) fn push_hinted(&self, id: LoopId, event: MevelEvent) -> Result<(), MevelEvent> {
        self.push(&self.lanes[id.index()].hinted, event)
    }

    /// Pushes an event that only loop `id` will run.
    pub(crate) fn push_pinned(&self, id: LoopId, event: MevelEvent) -> Result<(), MevelEvent> {
        self.push(&self.lanes[id.index()].pinned, event)
    }

    /// Takes one event for loop `id` without blocking: pinned, then hinted,
    /// then shared.
    pub(crate) fn try_pop(&self, id: LoopId) -> Option<MevelEvent> {
        let own = &self.lanes[id.index()];
        own.pinned
            .rx
            .try_recv()
            .or_else(|_| own.hinted.rx.try_recv())
            .or_else(|_| self.shared.rx.try_recv())
            .ok()
    }

    /// Blocks loop `id` until an event arrives for it, `timeout` passes or
    /// the queue is stopped.
    pub(crate) fn pop_blocking(&self, id: LoopId, timeout: Duration) -> Wakeup {
        let own = &self.lanes[id.index()];
        crossbeam_channel::select! {
            recv(own.pinned.rx) -> event => event.map_or(Wakeup::Stop, Wakeup::Event),
            recv(own.hinted.rx) -> event => event.map_or(Wakeup::Stop, Wakeup::Event),
            recv(self.shared.rx) -> event => event.map_or(Wakeup::Stop, Wakeup::Event),
            recv(self.stop_rx) -> _ => Wakeup::Stop,
            default(timeout) => Wakeup::Idle,
        }
    }

    /// Takes one hinted event meant for some other loop, scanning from the
    /// loop after `id`.
    pub(crate) fn steal(&self, id: LoopId) -> Option<MevelEvent> {
        let count = self.lanes.len();
        (1..count)
            .map(|offset| &self.lanes[(id.index() + offset) % count])
            .find_map(|lanes| lanes.hinted.rx.try_recv().ok())
    }

    /// Wakes every blocked loop and refuses further pushes. Idempotent.
    pub(crate) fn stop(&self) {
        self.stop_tx.write().take();
    }

    /// Removes every queued event from every lane.
    pub(crate) fn drain(&self) -> Vec<MevelEvent> {
        let mut drained: Vec<MevelEvent> = self.shared.rx.try_iter().collect();
        for lanes in self.lanes.iter() {
            drained.extend(lanes.pinned.rx.try_iter());
            drained.extend(lanes.hinted.rx.try_iter());
        }
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.len()
            + self
                .lanes
                .iter()
                .map(|lanes| lanes.pinned.len() + lanes.hinted.len())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const FOREVER: Duration = Duration::from_secs(60);

    fn id(n: usize) -> LoopId {
        LoopId::new(n).unwrap()
    }

    fn noop() -> MevelEvent {
        MevelEvent::Callback(|| {})
    }

    #[test]
    fn own_lanes_are_private_to_try_pop() {
        let queue = GlobalQueue::new(2);
        queue.push_pinned(id(2), noop()).unwrap();
        queue.push_hinted(id(2), noop()).unwrap();
        assert!(queue.try_pop(id(1)).is_none());
        assert!(queue.try_pop(id(2)).is_some());
        assert!(queue.try_pop(id(2)).is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn shared_lane_is_taken_by_anyone() {
        let queue = GlobalQueue::new(2);
        queue.push_any(noop()).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.try_pop(id(1)).is_some());
        assert!(queue.try_pop(id(2)).is_none());
    }

    #[test]
    fn pinned_then_hinted_then_shared() {
        let queue = GlobalQueue::new(1);
        queue.push_any(noop()).unwrap();
        queue.push_hinted(id(1), MevelEvent::Task(noop_runnable())).unwrap();
        queue.push_pinned(id(1), MevelEvent::from_fn(|| {})).unwrap();
        assert!(matches!(queue.try_pop(id(1)), Some(MevelEvent::Stateful { .. })));
        assert!(matches!(queue.try_pop(id(1)), Some(MevelEvent::Task(_))));
        assert!(matches!(queue.try_pop(id(1)), Some(MevelEvent::Callback(_))));
    }

    #[test]
    fn steal_takes_hinted_but_never_pinned() {
        let queue = GlobalQueue::new(3);
        queue.push_pinned(id(2), noop()).unwrap();
        assert!(queue.steal(id(1)).is_none());

        queue.push_hinted(id(3), noop()).unwrap();
        assert!(queue.steal(id(3)).is_none());
        assert!(queue.steal(id(1)).is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn idle_timeout() {
        let queue = GlobalQueue::new(1);
        assert!(matches!(
            queue.pop_blocking(id(1), Duration::from_millis(5)),
            Wakeup::Idle
        ));
    }

    #[test]
    fn stop_wakes_blocked_loop() {
        let queue = Arc::new(GlobalQueue::new(1));
        let q = queue.clone();
        let waiter = thread::spawn(move || matches!(q.pop_blocking(id(1), FOREVER), Wakeup::Stop));
        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn blocking_pop_receives_event() {
        let queue = Arc::new(GlobalQueue::new(1));
        let q = queue.clone();
        let waiter =
            thread::spawn(move || matches!(q.pop_blocking(id(1), FOREVER), Wakeup::Event(_)));
        thread::sleep(Duration::from_millis(20));
        queue.push_any(noop()).unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn pushes_after_stop_are_refused() {
        let queue = GlobalQueue::new(2);
        queue.stop();
        assert!(matches!(queue.push_any(noop()), Err(MevelEvent::Callback(_))));
        assert!(queue.push_hinted(id(1), noop()).is_err());
        assert!(queue.push_pinned(id(2), noop()).is_err());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn drain_empties_every_lane() {
        let queue = GlobalQueue::new(3);
        queue.push_any(noop()).unwrap();
        queue.push_pinned(id(1), noop()).unwrap();
        queue.push_hinted(id(3), noop()).unwrap();
        assert_eq!(queue.drain().len(), 3);
        assert_eq!(queue.len(), 0);
    }

    fn noop_runnable() -> crate::event::TaskRunnable {
        let (runnable, task) = async_task::Builder::new()
            .metadata(crate::adapter::Placement::Affine)
            .spawn(|_| async {}, |_runnable: crate::event::TaskRunnable| {});
        task.detach();
        runnable
    }
}
