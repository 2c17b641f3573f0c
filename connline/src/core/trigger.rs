//! Deferred, cancelable callback delivery.
//!
//! Backends run inside bus dispatch. Instead of calling into the host from
//! there, they queue a [`Trigger`]; the queue asks the reactor for a later
//! iteration and the engine fires the batch from there.

use std::collections::VecDeque;

use crate::api::models::{ContextId, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TriggerId(u64);

#[derive(Debug)]
pub(crate) struct Trigger {
    pub id: TriggerId,
    pub context: ContextId,
    pub event: Event,
}

/// FIFO of pending triggers.
pub(crate) struct TriggerQueue {
    queue: VecDeque<Trigger>,
    next_id: u64,
    armed: bool,
    arm: Box<dyn Fn()>,
}

impl TriggerQueue {
    /// `arm` must schedule a later call to the engine's drain, and must not
    /// drain synchronously.
    pub(crate) fn new(arm: Box<dyn Fn()>) -> Self {
        Self {
            queue: VecDeque::new(),
            next_id: 0,
            armed: false,
            arm,
        }
    }

    pub(crate) fn schedule(&mut self, context: ContextId, event: Event) -> TriggerId {
        let id = TriggerId(self.next_id);
        self.next_id += 1;
        self.queue.push_back(Trigger { id, context, event });

        if !self.armed {
            self.armed = true;
            (self.arm)();
        }
        id
    }

    /// Drops every unfired trigger of `context`.
    pub(crate) fn cancel_all(&mut self, context: ContextId) {
        self.queue.retain(|t| t.context != context);
    }

    /// Starts a drain. Triggers scheduled from here on belong to the next one.
    pub(crate) fn begin_drain(&mut self) -> TriggerId {
        self.armed = false;
        TriggerId(self.next_id)
    }

    /// Next trigger scheduled before `end`.
    pub(crate) fn pop_before(&mut self, end: TriggerId) -> Option<Trigger> {
        if self.queue.front()?.id < end {
            self.queue.pop_front()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, context: ContextId) -> usize {
        self.queue.iter().filter(|t| t.context == context).count()
    }
}
