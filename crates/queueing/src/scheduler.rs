//! Discrete event scheduler backing the [`Network`](crate::Network) event loop.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use flowline_core::{Scheduler, SimTime, TimerEvent, TimerHandle};
use log::trace;

#[derive(Debug)]
struct ScheduledEvent {
    at: SimTime,
    handle: TimerHandle,
    event: TimerEvent,
}

// earliest first; ties fire in scheduling order
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.handle.cmp(&self.handle))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.handle == other.handle
    }
}

impl Eq for ScheduledEvent {}

/// Timer queue with lazy cancellation.
///
/// Cancelled entries stay in the heap until they reach the top and are
/// skipped; only handles in `active` are ever delivered.
#[derive(Debug, Default)]
pub struct EventQueue {
    now: SimTime,
    next_handle: u64,
    queue: BinaryHeap<ScheduledEvent>,
    active: HashSet<TimerHandle>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending (not cancelled) timers.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn next_event_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.queue.peek().map(|scheduled| scheduled.at)
    }

    /// Pops the next event due at or before `limit` and advances the clock to it.
    pub fn pop_due(&mut self, limit: SimTime) -> Option<TimerEvent> {
        self.discard_cancelled();
        if self.queue.peek()?.at > limit {
            return None;
        }
        let scheduled = self.queue.pop()?;
        self.active.remove(&scheduled.handle);
        self.now = scheduled.at;
        Some(scheduled.event)
    }

    /// Moves the clock forward; never backwards.
    pub fn advance_to(&mut self, time: SimTime) {
        if time > self.now {
            self.now = time;
        }
    }

    fn discard_cancelled(&mut self) {
        while let Some(top) = self.queue.peek() {
            if self.active.contains(&top.handle) {
                break;
            }
            self.queue.pop();
        }
    }
}

impl Scheduler for EventQueue {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let handle = TimerHandle::new(self.next_handle);
        self.next_handle += 1;
        let at = self.now + delay;
        trace!("Scheduling timer {} of element {} at {}", event.kind, event.owner, at);
        self.queue.push(ScheduledEvent { at, handle, event });
        self.active.insert(handle);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.active.remove(&handle)
    }

    fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.active.contains(&handle)
    }
}
