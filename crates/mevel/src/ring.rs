//! The per-loop ring buffer.
//!
//! A `LocalQueue` is owned by exactly one event loop thread and is never
//! shared, so it carries no synchronization at all. Capacity is always a
//! power of two so that wrapping is a single mask.

use crate::event::MevelEvent;

/// Growable power-of-two circular buffer of work items.
pub(crate) struct LocalQueue {
    slots: Box<[Option<MevelEvent>]>,
    mask: usize,
    /// Next slot to dequeue.
    read_pointer: usize,
    queued_count: usize,
}

impl LocalQueue {
    /// Creates a queue with room for `capacity` items.
    ///
    /// `capacity` is rounded up to the next power of two.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            slots: empty_slots(capacity),
            mask: capacity - 1,
            read_pointer: 0,
            queued_count: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queued_count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queued_count == 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn read_pointer(&self) -> usize {
        self.read_pointer
    }

    /// Appends an item, doubling the buffer if the push filled it.
    pub(crate) fn push(&mut self, event: MevelEvent) {
        let index = (self.read_pointer + self.queued_count) & self.mask;
        debug_assert!(self.slots[index].is_none(), "overwrote a queued event");
        self.slots[index] = Some(event);
        self.queued_count += 1;
        if self.queued_count == self.slots.len() {
            self.grow();
        }
    }

    /// Removes the oldest item, leaving its slot empty.
    pub(crate) fn pop(&mut self) -> Option<MevelEvent> {
        if self.is_empty() {
            return None;
        }
        let event = self.slots[self.read_pointer].take();
        self.read_pointer = (self.read_pointer + 1) & self.mask;
        self.queued_count -= 1;
        event
    }

    /// Doubles the buffer, keeping `read_pointer` where it is.
    ///
    /// Items are moved in logical order so that `(read_pointer + i) & mask`
    /// addresses the same item before and after, with the new mask.
    fn grow(&mut self) {
        let old_capacity = self.slots.len();
        let new_capacity = old_capacity * 2;
        let new_mask = new_capacity - 1;
        let mut slots = empty_slots(new_capacity);

        for offset in 0..self.queued_count {
            let from = (self.read_pointer + offset) & self.mask;
            let to = (self.read_pointer + offset) & new_mask;
            slots[to] = self.slots[from].take();
        }

        self.slots = slots;
        self.mask = new_mask;
        tracing::trace!(
            from = old_capacity,
            to = new_capacity,
            queued = self.queued_count,
            "grew local queue"
        );
    }

    /// Takes every queued item out, oldest first.
    ///
    /// Used when a loop exits so that dropping the items happens outside
    /// of any borrow of the queue.
    pub(crate) fn take_all(&mut self) -> Vec<MevelEvent> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(event) = self.pop() {
            drained.push(event);
        }
        drained
    }
}

fn empty_slots(capacity: usize) -> Box<[Option<MevelEvent>]> {
    std::iter::repeat_with(|| None).take(capacity).collect()
}
