//! Channel access scheduler for the single radio front-end.
//!
//! Every assignment request goes through one skeleton that enforces
//! first-come-first-served arbitration and idempotence; the behaviour that
//! differs per access type (when switching is allowed, what activation
//! schedules, how renewals are judged) lives in an `AccessStrategy`.
//!
//! State machine:
//!
//! ```text
//! NoAccess --init--> DefaultControlAccess <--release--> {Continuous, Alternating, Extended}
//! ```

use embassy_time::Duration;

use super::MacContext;
use super::timers::{MacEvent, TimerHandle, Timers, cancel_slot};
use crate::common::types::{AccessKind, AccessType, CONTROL_CHANNEL, ChannelId, MacAddress};

/// A deferred assignment waiting for its timeline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSwitch {
    pub channel: ChannelId,
    pub kind: AccessKind,
    pub extends: u32,
    pub immediate: bool,
}

#[derive(Debug, Clone, Copy)]
struct AccessRequest {
    channel: ChannelId,
    kind: AccessKind,
    extends: u32,
    immediate: bool,
}

trait AccessStrategy: Sync {
    fn accepts_channel(&self, channel: ChannelId) -> bool;

    /// Called when the same kind is already active on the requested channel.
    fn renew(&self, _scheduler: &ChannelScheduler, _request: &AccessRequest, _ctx: &MacContext) -> bool {
        true
    }

    /// Whether the timeline allows activation right now.
    fn ready_now(&self, channel: ChannelId, ctx: &MacContext) -> bool;

    /// Delay until `ready_now` becomes true.
    fn wait_time(&self, channel: ChannelId, ctx: &MacContext) -> Duration;

    fn activate(&self, scheduler: &mut ChannelScheduler, request: &AccessRequest, ctx: &mut MacContext);
}

struct ContinuousStrategy;
struct AlternatingStrategy;
struct ExtendedStrategy;

static CONTINUOUS: ContinuousStrategy = ContinuousStrategy;
static ALTERNATING: AlternatingStrategy = AlternatingStrategy;
static EXTENDED: ExtendedStrategy = ExtendedStrategy;

fn strategy_for(kind: AccessKind) -> &'static dyn AccessStrategy {
    match kind {
        AccessKind::Continuous => &CONTINUOUS,
        AccessKind::Alternating => &ALTERNATING,
        AccessKind::Extended => &EXTENDED,
    }
}

impl AccessStrategy for ContinuousStrategy {
    fn accepts_channel(&self, channel: ChannelId) -> bool {
        channel.is_valid()
    }

    fn ready_now(&self, channel: ChannelId, ctx: &MacContext) -> bool {
        if channel.is_control() {
            ctx.coordinator.is_control_interval(ctx.now())
        } else {
            ctx.coordinator.is_service_interval(ctx.now())
        }
    }

    fn wait_time(&self, channel: ChannelId, ctx: &MacContext) -> Duration {
        if channel.is_control() {
            ctx.coordinator.time_to_control_interval(ctx.now())
        } else {
            ctx.coordinator.time_to_service_interval(ctx.now())
        }
    }

    fn activate(&self, scheduler: &mut ChannelScheduler, request: &AccessRequest, ctx: &mut MacContext) {
        scheduler.switch_channel(request.channel, ctx);
        scheduler.access = AccessType::ContinuousAccess(request.channel);
    }
}

impl AccessStrategy for AlternatingStrategy {
    fn accepts_channel(&self, channel: ChannelId) -> bool {
        channel.is_service()
    }

    // The assignment itself never waits; only the physical hop follows the timeline.
    fn ready_now(&self, _channel: ChannelId, _ctx: &MacContext) -> bool {
        true
    }

    fn wait_time(&self, _channel: ChannelId, _ctx: &MacContext) -> Duration {
        Duration::from_ticks(0)
    }

    fn activate(&self, scheduler: &mut ChannelScheduler, request: &AccessRequest, ctx: &mut MacContext) {
        if request.immediate || ctx.coordinator.is_service_interval(ctx.now()) {
            scheduler.switch_channel(request.channel, ctx);
        }
        scheduler.access = AccessType::AlternatingAccess(request.channel);
    }
}

impl AccessStrategy for ExtendedStrategy {
    fn accepts_channel(&self, channel: ChannelId) -> bool {
        channel.is_service()
    }

    fn renew(&self, scheduler: &ChannelScheduler, request: &AccessRequest, ctx: &MacContext) -> bool {
        let remaining = scheduler.remaining_extends(&*ctx.timers, ctx.coordinator.sync_interval());
        remaining > request.extends
    }

    fn ready_now(&self, _channel: ChannelId, ctx: &MacContext) -> bool {
        ctx.coordinator.is_service_interval(ctx.now())
    }

    fn wait_time(&self, _channel: ChannelId, ctx: &MacContext) -> Duration {
        ctx.coordinator.time_to_service_interval(ctx.now())
    }

    fn activate(&self, scheduler: &mut ChannelScheduler, request: &AccessRequest, ctx: &mut MacContext) {
        scheduler.switch_channel(request.channel, ctx);
        scheduler.access = AccessType::ExtendedAccess {
            channel: request.channel,
            extends: request.extends,
        };
        // Time left in the current service interval is not counted as an extend.
        let now = ctx.now();
        let hold = ctx.coordinator.time_to_control_interval(now) + ctx.coordinator.sync_interval() * request.extends;
        cancel_slot(ctx.timers, &mut scheduler.extend_timer);
        scheduler.extend_timer = Some(ctx.timers.schedule(hold, MacEvent::ExtendedAccessExpired(request.channel)));
        log::debug!("[{}] Extended access on {} until {}us", scheduler.address, request.channel, (now + hold).as_micros());
    }
}

pub struct ChannelScheduler {
    address: MacAddress,
    access: AccessType,
    pending: Option<PendingSwitch>,
    pending_timer: Option<TimerHandle>,
    extend_timer: Option<TimerHandle>,
    switch_count: u64,
}

impl ChannelScheduler {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            access: AccessType::NoAccess,
            pending: None,
            pending_timer: None,
            extend_timer: None,
            switch_count: 0,
        }
    }

    /// Tune to the control channel and enter `DefaultControlAccess`.
    pub fn init(&mut self, ctx: &mut MacContext) {
        self.switch_channel(CONTROL_CHANNEL, ctx);
        self.access = AccessType::DefaultControlAccess;
    }

    pub fn access(&self) -> AccessType {
        self.access
    }

    pub fn pending(&self) -> Option<PendingSwitch> {
        self.pending
    }

    /// Only alternating access reacts to guard-slot notifications.
    pub fn is_guard_subscribed(&self) -> bool {
        matches!(self.access, AccessType::AlternatingAccess(_))
    }

    /// Physical channel switches performed so far.
    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    pub fn assign_continuous(&mut self, channel: ChannelId, immediate: bool, ctx: &mut MacContext) -> bool {
        self.request(channel, AccessKind::Continuous, 0, immediate, ctx)
    }

    pub fn assign_alternating(&mut self, channel: ChannelId, immediate: bool, ctx: &mut MacContext) -> bool {
        self.request(channel, AccessKind::Alternating, 0, immediate, ctx)
    }

    pub fn assign_extended(&mut self, channel: ChannelId, extends: u32, immediate: bool, ctx: &mut MacContext) -> bool {
        self.request(channel, AccessKind::Extended, extends, immediate, ctx)
    }

    /// Shared FCFS / idempotence skeleton for every access kind.
    ///
    /// # Panics
    ///
    /// If called before `init`.
    pub fn request(&mut self, channel: ChannelId, kind: AccessKind, extends: u32, immediate: bool, ctx: &mut MacContext) -> bool {
        assert!(self.access != AccessType::NoAccess, "channel access requested before the scheduler was initialized");
        let strategy = strategy_for(kind);
        let request = AccessRequest {
            channel,
            kind,
            extends,
            immediate,
        };

        if !strategy.accepts_channel(channel) {
            log::warn!("[{}] {:?} access cannot be assigned on {}", self.address, kind, channel);
            return false;
        }

        if !self.access.is_idle() {
            if self.access.kind() == Some(kind) && self.access.assigned_channel() == Some(channel) {
                return strategy.renew(self, &request, ctx);
            }
            log::debug!("[{}] Rejecting {:?} on {}: {:?} is active", self.address, kind, channel, self.access);
            return false;
        }

        if let Some(pending) = self.pending.as_mut() {
            if pending.channel != channel {
                log::debug!("[{}] Rejecting {:?} on {}: {:?} is pending", self.address, kind, channel, pending);
                return false;
            }
            if !immediate && pending.kind == kind {
                pending.extends = extends;
                return true;
            }
            // Promoted, or the kind changed: the new kind decides when to switch.
            log::debug!("[{}] Pending {:?} on {} replaced by {:?}", self.address, pending.kind, channel, kind);
            self.pending = None;
            cancel_slot(ctx.timers, &mut self.pending_timer);
        }

        if immediate || strategy.ready_now(channel, ctx) {
            strategy.activate(self, &request, ctx);
            log::debug!("[{}] {:?} access active on {}", self.address, kind, channel);
            return true;
        }

        let wait = strategy.wait_time(channel, ctx);
        self.pending = Some(PendingSwitch {
            channel,
            kind,
            extends,
            immediate,
        });
        cancel_slot(ctx.timers, &mut self.pending_timer);
        self.pending_timer = Some(ctx.timers.schedule(wait, MacEvent::PendingSwitchDue));
        log::debug!("[{}] {:?} access on {} deferred by {}us", self.address, kind, channel, wait.as_micros());
        true
    }

    /// Release whatever is assigned or pending on `channel` and fall back to
    /// the control channel. Returns `false` when `channel` holds nothing.
    ///
    /// # Panics
    ///
    /// If the scheduler was never initialized: there is no active channel to restore from.
    pub fn release_access(&mut self, channel: ChannelId, ctx: &mut MacContext) -> bool {
        assert!(self.access != AccessType::NoAccess, "release with no active channel");

        let pending_here = self.pending.is_some_and(|p| p.channel == channel);
        let assigned_here = self.access.assigned_channel() == Some(channel);
        if !pending_here && !assigned_here {
            return false;
        }

        self.pending = None;
        cancel_slot(ctx.timers, &mut self.pending_timer);
        cancel_slot(ctx.timers, &mut self.extend_timer);
        self.switch_channel(CONTROL_CHANNEL, ctx);
        self.access = AccessType::DefaultControlAccess;
        log::debug!("[{}] Released {}", self.address, channel);
        true
    }

    /// A deferred assignment reached its boundary.
    pub fn on_pending_due(&mut self, ctx: &mut MacContext) {
        self.pending_timer = None;
        let Some(pending) = self.pending.take() else {
            return;
        };
        // The boundary is here, so the re-invocation must not defer again.
        if !self.request(pending.channel, pending.kind, pending.extends, true, ctx) {
            log::warn!("[{}] Deferred {:?} on {} could not be activated", self.address, pending.kind, pending.channel);
        }
    }

    pub fn on_extended_expired(&mut self, channel: ChannelId, ctx: &mut MacContext) {
        self.extend_timer = None;
        if matches!(self.access, AccessType::ExtendedAccess { channel: ch, .. } if ch == channel) {
            self.release_access(channel, ctx);
        }
    }

    /// Hop between control and service channel at guard boundaries while
    /// alternating access is active. The medium stays busy for the guard.
    pub fn on_guard_slot_start(&mut self, duration: Duration, entering_control: bool, ctx: &mut MacContext) {
        let AccessType::AlternatingAccess(service) = self.access else {
            return;
        };
        let now = ctx.now();
        let target = if entering_control { CONTROL_CHANNEL } else { service };
        self.switch_channel(target, ctx);
        ctx.radio.make_virtual_busy(target, now, duration);
    }

    pub fn on_control_slot_start(&mut self, duration: Duration) {
        log::trace!("[{}] Control slot start ({}us)", self.address, duration.as_micros());
    }

    pub fn on_service_slot_start(&mut self, duration: Duration) {
        log::trace!("[{}] Service slot start ({}us)", self.address, duration.as_micros());
    }

    /// Cancel every timer the scheduler owns.
    pub fn shutdown(&mut self, timers: &mut dyn Timers) {
        cancel_slot(timers, &mut self.pending_timer);
        cancel_slot(timers, &mut self.extend_timer);
        self.pending = None;
    }

    /// Whole sync intervals left before the extended assignment releases itself.
    fn remaining_extends(&self, timers: &dyn Timers, sync_interval: Duration) -> u32 {
        let Some(left) = self.extend_timer.and_then(|h| timers.delay_left(h)) else {
            return 0;
        };
        (left.as_ticks() / sync_interval.as_ticks().max(1)) as u32
    }

    /// Retune the front-end: the outgoing user is suspended and detached, the
    /// incoming one attached and held busy for the retuning delay.
    fn switch_channel(&mut self, to: ChannelId, ctx: &mut MacContext) {
        let from = ctx.radio.channel_number();
        if from == to {
            return;
        }
        let now = ctx.now();
        let delay = ctx.radio.channel_switch_delay();
        ctx.radio.suspend_user(from);
        ctx.radio.detach_user(from);
        ctx.radio.set_channel_number(to);
        ctx.radio.attach_user(to);
        ctx.radio.make_virtual_busy(to, now, delay);
        ctx.radio.resume_user(to);
        self.switch_count += 1;
        log::debug!("[{}] Switched {} -> {} at {}us", self.address, from, to, now.as_micros());
    }
}
