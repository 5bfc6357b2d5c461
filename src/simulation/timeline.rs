//! Alternating CCH/SCH slot timeline anchored at time zero.
//!
//! One sync interval is a control interval followed by a service interval.
//! Each interval opens with a guard interval during which the medium is
//! declared busy while radios retune.

use embassy_time::{Duration, Instant};

use crate::common::config::TimelineConfig;
use crate::mac::coordination::{ChannelCoordination, SlotEvent};

#[derive(Debug, Clone, Copy)]
pub struct SlotTimeline {
    control: Duration,
    service: Duration,
    guard: Duration,
}

impl SlotTimeline {
    pub fn new(config: &TimelineConfig) -> Self {
        Self {
            control: Duration::from_millis(config.control_interval_ms),
            service: Duration::from_millis(config.service_interval_ms),
            guard: Duration::from_millis(config.guard_interval_ms),
        }
    }

    /// Offset of `now` inside its sync interval, in ticks.
    fn offset(&self, now: Instant) -> u64 {
        now.as_ticks() % self.sync_interval().as_ticks()
    }

    fn interval_start(&self, now: Instant) -> Instant {
        Instant::from_ticks(now.as_ticks() - self.offset(now))
    }
}

impl ChannelCoordination for SlotTimeline {
    fn sync_interval(&self) -> Duration {
        self.control + self.service
    }

    fn is_service_interval(&self, now: Instant) -> bool {
        self.offset(now) >= self.control.as_ticks()
    }

    fn time_to_service_interval(&self, now: Instant) -> Duration {
        let offset = self.offset(now);
        let control = self.control.as_ticks();
        if offset >= control { Duration::from_ticks(0) } else { Duration::from_ticks(control - offset) }
    }

    fn time_to_control_interval(&self, now: Instant) -> Duration {
        let offset = self.offset(now);
        if offset < self.control.as_ticks() {
            Duration::from_ticks(0)
        } else {
            Duration::from_ticks(self.sync_interval().as_ticks() - offset)
        }
    }

    fn slot_event_at_or_after(&self, t: Instant) -> (Instant, SlotEvent) {
        let base = self.interval_start(t);
        let boundaries = [
            (
                base,
                SlotEvent::GuardStart {
                    duration: self.guard,
                    entering_control: true,
                },
            ),
            (base + self.guard, SlotEvent::ControlSlotStart(self.control - self.guard)),
            (
                base + self.control,
                SlotEvent::GuardStart {
                    duration: self.guard,
                    entering_control: false,
                },
            ),
            (base + self.control + self.guard, SlotEvent::ServiceSlotStart(self.service - self.guard)),
        ];
        for (at, event) in boundaries {
            if at >= t {
                return (at, event);
            }
        }
        (
            base + self.sync_interval(),
            SlotEvent::GuardStart {
                duration: self.guard,
                entering_control: true,
            },
        )
    }
}
