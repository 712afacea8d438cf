//! Timer scheduling abstraction.
//!
//! Elements never own a clock. They ask a [`Scheduler`] to call them back
//! after a delay and may cancel that request; the event loop that actually
//! advances time lives with the runtime.

use std::time::Duration;

use crate::types::{ElementId, SimTime};

/// Element-local discriminator telling an element which of its timers fired.
pub type TimerKind = u32;

/// Handle of one scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(raw: u64) -> Self {
        TimerHandle(raw)
    }
}

/// What to deliver, and to whom, when a timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub owner: ElementId,
    pub kind: TimerKind,
}

pub trait Scheduler {
    fn now(&self) -> SimTime;

    /// Schedule `event` to fire `delay` after the current time.
    fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Cancel a pending timer. Returns `false` if it already fired or was cancelled.
    /// A cancelled timer never fires.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    fn is_scheduled(&self, handle: TimerHandle) -> bool;
}
