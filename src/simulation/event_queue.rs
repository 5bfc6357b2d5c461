//! Discrete-event timeline with cancellable entries.
//!
//! Events are keyed by `(due time, insertion sequence)` so equal-time events
//! fire in the order they were scheduled. Popping an event advances the
//! virtual clock to its due time; the clock never moves backwards.

use embassy_time::{Duration, Instant};
use std::collections::BTreeMap;

use crate::mac::timers::{MacEvent, TimerHandle, Timers};

pub struct EventQueue<E> {
    now: Instant,
    next_seq: u64,
    queue: BTreeMap<TimerHandle, E>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: Instant::from_ticks(0),
            next_seq: 0,
            queue: BTreeMap::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Schedule `event` at absolute time `at`. Past times are clamped to now.
    pub fn schedule_at(&mut self, at: Instant, event: E) -> TimerHandle {
        let at = at.max(self.now);
        let handle = TimerHandle::new(at, self.next_seq);
        self.next_seq += 1;
        self.queue.insert(handle, event);
        handle
    }

    pub fn schedule_in(&mut self, delay: Duration, event: E) -> TimerHandle {
        self.schedule_at(self.now + delay, event)
    }

    pub fn cancel_handle(&mut self, handle: TimerHandle) -> bool {
        self.queue.remove(&handle).is_some()
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.queue.contains_key(&handle)
    }

    pub fn delay_left_of(&self, handle: TimerHandle) -> Option<Duration> {
        if self.is_pending(handle) { Some(handle.at().saturating_duration_since(self.now)) } else { None }
    }

    /// Due time of the earliest pending event.
    pub fn peek_time(&self) -> Option<Instant> {
        self.queue.keys().next().map(|h| h.at())
    }

    /// Remove the earliest event and advance the clock to it.
    pub fn pop(&mut self) -> Option<(Instant, E)> {
        let (handle, event) = self.queue.pop_first()?;
        self.now = handle.at();
        Some((self.now, event))
    }

    /// Pop the earliest event only if it is due no later than `limit`.
    /// When nothing is due the clock advances to `limit`.
    pub fn pop_until(&mut self, limit: Instant) -> Option<(Instant, E)> {
        match self.peek_time() {
            Some(at) if at <= limit => self.pop(),
            _ => {
                self.now = self.now.max(limit);
                None
            }
        }
    }
}

impl Timers for EventQueue<MacEvent> {
    fn now(&self) -> Instant {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: MacEvent) -> TimerHandle {
        self.schedule_in(delay, event)
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.cancel_handle(handle)
    }

    fn delay_left(&self, handle: TimerHandle) -> Option<Duration> {
        self.delay_left_of(handle)
    }
}
