//! Timer contract between the MAC and the simulation timeline.
//!
//! The MAC never blocks: every wait is a future event installed through
//! `Timers::schedule`, identified by a `TimerHandle` that can be cancelled.

use embassy_time::{Duration, Instant};

use super::coordination::SlotEvent;
use crate::common::types::ChannelId;

/// Identifies one scheduled event. Ordered by due time, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerHandle {
    at: Instant,
    seq: u64,
}

impl TimerHandle {
    pub fn new(at: Instant, seq: u64) -> Self {
        Self { at, seq }
    }

    /// Time at which the event fires.
    pub fn at(&self) -> Instant {
        self.at
    }
}

/// Events a station asks the timeline to deliver back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacEvent {
    /// Periodic beacon opportunity.
    BeaconTick,
    /// A beacon opportunity that found the radio busy.
    BeaconRetry,
    /// Channel coordination boundary.
    Slot(SlotEvent),
    /// A deferred channel assignment reached its boundary.
    PendingSwitchDue,
    /// An extended assignment ran out of sync intervals.
    ExtendedAccessExpired(ChannelId),
    /// The next own agreement starts.
    WindowStart,
    /// The radio became idle inside a running window.
    WindowResume,
    /// The running window elapsed.
    WindowEnd,
}

pub trait Timers {
    fn now(&self) -> Instant;

    /// Install `event` to fire after `delay`.
    fn schedule(&mut self, delay: Duration, event: MacEvent) -> TimerHandle;

    /// Returns `false` when the handle already fired or was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Remaining time before the handle fires, if it is still pending.
    fn delay_left(&self, handle: TimerHandle) -> Option<Duration>;
}

/// Cancel whatever `slot` holds and leave it empty.
pub fn cancel_slot(timers: &mut dyn Timers, slot: &mut Option<TimerHandle>) {
    if let Some(handle) = slot.take() {
        timers.cancel(handle);
    }
}

/// Replace the timer held in `slot` with a new one, cancelling the old first.
pub fn rearm_slot(timers: &mut dyn Timers, slot: &mut Option<TimerHandle>, delay: Duration, event: MacEvent) {
    cancel_slot(timers, slot);
    *slot = Some(timers.schedule(delay, event));
}
