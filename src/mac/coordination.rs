//! Channel coordination contract: the CCH/SCH slot timeline as seen by the MAC.

use embassy_time::{Duration, Instant};

/// Boundary notifications emitted by the slot timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    /// A guard interval starts; `entering_control` is true when the interval
    /// it guards is a control interval.
    GuardStart { duration: Duration, entering_control: bool },
    /// The usable part of a control interval starts.
    ControlSlotStart(Duration),
    /// The usable part of a service interval starts.
    ServiceSlotStart(Duration),
}

pub trait ChannelCoordination {
    /// Length of one control + service interval pair.
    fn sync_interval(&self) -> Duration;

    fn is_service_interval(&self, now: Instant) -> bool;

    fn is_control_interval(&self, now: Instant) -> bool {
        !self.is_service_interval(now)
    }

    /// Zero when already inside a service interval.
    fn time_to_service_interval(&self, now: Instant) -> Duration;

    /// Zero when already inside a control interval.
    fn time_to_control_interval(&self, now: Instant) -> Duration;

    /// First boundary at or after `t`.
    fn slot_event_at_or_after(&self, t: Instant) -> (Instant, SlotEvent);
}
