//! Per-device MAC: routes timer events and received frames to the agreement
//! book, the beacon negotiator, the channel scheduler and the window loop.

use embassy_time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::MacContext;
use super::agreement_book::AgreementBook;
use super::beacon::{BeaconEffect, BeaconFrame, BeaconNegotiator};
use super::channel_scheduler::ChannelScheduler;
use super::coordination::SlotEvent;
use super::queue::{OutboundQueue, QueuedFrame};
use super::radio::{AirFrame, DataFrame, FramePayload, MAC_OVERHEAD_BYTES, RadioFrontEnd};
use super::timers::{MacEvent, TimerHandle, Timers, cancel_slot, rearm_slot};
use super::window::{WindowLoop, WindowStats};
use crate::common::config::MacConfig;
use crate::common::types::{AccessKind, AccessType, ChannelId, MacAddress};

/// Receives every contention-free data frame addressed to the station.
pub type DeliveryCallback = Box<dyn FnMut(&DataFrame)>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StationStats {
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub beacons_malformed: u64,
    pub requests_expired: u64,
    pub agreements_recorded: u64,
    pub agreements_rejected: u64,
    pub frames_delivered: u64,
}

pub struct Station {
    address: MacAddress,
    config: MacConfig,
    book: AgreementBook,
    queue: OutboundQueue,
    negotiator: BeaconNegotiator,
    scheduler: ChannelScheduler,
    window: WindowLoop,
    rng: StdRng,
    /// Unjittered instant of the current beacon opportunity.
    beacon_grid: Instant,
    beacon_timer: Option<TimerHandle>,
    retry_timer: Option<TimerHandle>,
    slot_timer: Option<TimerHandle>,
    delivery: Option<DeliveryCallback>,
    stats: StationStats,
}

impl Station {
    pub fn new(address: MacAddress, config: &MacConfig, seed: u64) -> Self {
        Self {
            address,
            config: config.clone(),
            book: AgreementBook::new(),
            queue: OutboundQueue::new(config.queue_capacity),
            negotiator: BeaconNegotiator::new(address, config.window_duration(), config.max_request_targets, config.keep_alive_beacons),
            scheduler: ChannelScheduler::new(address),
            window: WindowLoop::new(address, config.sifs(), config.ack_bytes),
            rng: StdRng::seed_from_u64(seed),
            beacon_grid: Instant::from_ticks(0),
            beacon_timer: None,
            retry_timer: None,
            slot_timer: None,
            delivery: None,
            stats: StationStats::default(),
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn book(&self) -> &AgreementBook {
        &self.book
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn access(&self) -> AccessType {
        self.scheduler.access()
    }

    pub fn scheduler(&self) -> &ChannelScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> StationStats {
        self.stats
    }

    pub fn window_stats(&self) -> WindowStats {
        self.window.stats()
    }

    pub fn set_delivery_callback(&mut self, callback: DeliveryCallback) {
        self.delivery = Some(callback);
    }

    /// Tune to the control channel, subscribe to slot boundaries and arm the
    /// first beacon opportunity.
    pub fn start(&mut self, ctx: &mut MacContext) {
        self.scheduler.init(ctx);
        self.arm_slot_event(ctx);
        self.beacon_grid = ctx.now();
        let first = self.beacon_jitter();
        rearm_slot(ctx.timers, &mut self.beacon_timer, first, MacEvent::BeaconTick);
        log::info!("[{}] Station started, first beacon in {}us", self.address, first.as_micros());
    }

    pub fn shutdown(&mut self, timers: &mut dyn Timers) {
        cancel_slot(timers, &mut self.beacon_timer);
        cancel_slot(timers, &mut self.retry_timer);
        cancel_slot(timers, &mut self.slot_timer);
        self.scheduler.shutdown(timers);
        self.window.shutdown(timers);
        log::info!("[{}] Station shut down", self.address);
    }

    pub fn handle_event(&mut self, event: MacEvent, ctx: &mut MacContext) {
        match event {
            MacEvent::BeaconTick => {
                self.beacon_timer = None;
                // Jitter offsets each tick from a fixed grid, so it never accumulates.
                self.beacon_grid = self.beacon_grid + self.config.beacon_interval();
                let next = (self.beacon_grid + self.beacon_jitter()).saturating_duration_since(ctx.now());
                rearm_slot(ctx.timers, &mut self.beacon_timer, next, MacEvent::BeaconTick);
                self.try_send_beacon(ctx);
            }
            MacEvent::BeaconRetry => {
                self.retry_timer = None;
                self.try_send_beacon(ctx);
            }
            MacEvent::Slot(slot) => {
                self.slot_timer = None;
                self.on_slot(slot, ctx);
            }
            MacEvent::PendingSwitchDue => self.scheduler.on_pending_due(ctx),
            MacEvent::ExtendedAccessExpired(channel) => self.scheduler.on_extended_expired(channel, ctx),
            MacEvent::WindowStart => self.window.on_window_start(&mut self.book, &mut self.queue, ctx),
            MacEvent::WindowResume => self.window.on_window_resume(&mut self.queue, ctx),
            MacEvent::WindowEnd => self.window.on_window_end(&mut self.book, &mut self.queue, ctx),
        }
    }

    /// Queue `payload` for `destination`; it is sent in the next window that covers it.
    pub fn enqueue(&mut self, payload: Vec<u8>, destination: MacAddress, ctx: &mut MacContext) {
        self.queue.enqueue(QueuedFrame {
            destination,
            payload,
        });
        self.window.on_enqueued(&mut self.queue, ctx);
    }

    pub fn request_service_channel(&mut self, channel: ChannelId, kind: AccessKind, extends: u32, immediate: bool, ctx: &mut MacContext) -> bool {
        self.scheduler.request(channel, kind, extends, immediate, ctx)
    }

    pub fn release_service_channel(&mut self, channel: ChannelId, ctx: &mut MacContext) -> bool {
        self.scheduler.release_access(channel, ctx)
    }

    /// A frame finished arriving on the tuned channel.
    pub fn on_frame_received(&mut self, frame: &AirFrame, ctx: &mut MacContext) {
        match &frame.payload {
            FramePayload::Beacon(bytes) => {
                let beacon = match BeaconFrame::decode(bytes) {
                    Ok(beacon) => beacon,
                    Err(e) => {
                        self.stats.beacons_malformed += 1;
                        log::warn!("[{}] Dropping malformed beacon: {}", self.address, e);
                        return;
                    }
                };
                self.stats.beacons_received += 1;
                match self.negotiator.on_beacon(ctx.now(), &beacon, &mut self.book) {
                    BeaconEffect::AgreementRecorded(agreement) => {
                        self.stats.agreements_recorded += 1;
                        log::debug!(
                            "[{}] Recorded window {} -> {} at {}us",
                            self.address,
                            agreement.transmitter,
                            agreement.receiver,
                            agreement.start.as_micros()
                        );
                        self.window.arm_next(&mut self.book, &mut self.queue, ctx);
                    }
                    BeaconEffect::AgreementRejected => self.stats.agreements_rejected += 1,
                    BeaconEffect::RequestQueued => log::trace!("[{}] Request from {} queued", self.address, beacon.source),
                    BeaconEffect::Ignored => {}
                }
            }
            FramePayload::Data(data) => {
                if data.source == self.address {
                    return;
                }
                if data.destination != self.address && !data.destination.is_group() {
                    return;
                }
                self.stats.frames_delivered += 1;
                if let Some(callback) = self.delivery.as_mut() {
                    callback(data);
                }
            }
        }
    }

    fn on_slot(&mut self, slot: SlotEvent, ctx: &mut MacContext) {
        match slot {
            SlotEvent::GuardStart { duration, entering_control } => self.scheduler.on_guard_slot_start(duration, entering_control, ctx),
            SlotEvent::ControlSlotStart(duration) => self.scheduler.on_control_slot_start(duration),
            SlotEvent::ServiceSlotStart(duration) => self.scheduler.on_service_slot_start(duration),
        }
        self.arm_slot_event(ctx);
    }

    fn arm_slot_event(&mut self, ctx: &mut MacContext) {
        let now = ctx.now();
        let (at, slot) = ctx.coordinator.slot_event_at_or_after(now + Duration::from_ticks(1));
        rearm_slot(ctx.timers, &mut self.slot_timer, at - now, MacEvent::Slot(slot));
    }

    fn beacon_jitter(&mut self) -> Duration {
        if self.config.beacon_jitter_us == 0 {
            return Duration::from_ticks(0);
        }
        Duration::from_micros(self.rng.gen_range(0..=self.config.beacon_jitter_us))
    }

    fn try_send_beacon(&mut self, ctx: &mut MacContext) {
        let now = ctx.now();
        if let Some(timeout) = self.config.request_timeout() {
            let expired = self.book.expire_requests(now, timeout);
            if expired > 0 {
                self.stats.requests_expired += expired as u64;
                log::debug!("[{}] {} request(s) timed out", self.address, expired);
            }
        }

        if !ctx.radio.channel_number().is_control() {
            log::trace!("[{}] Beacon skipped: tuned to {}", self.address, ctx.radio.channel_number());
            return;
        }
        if !ctx.radio.is_channel_idle(now) {
            let wait = ctx.radio.delay_until_idle(now).max(self.config.sifs());
            rearm_slot(ctx.timers, &mut self.retry_timer, wait, MacEvent::BeaconRetry);
            return;
        }
        cancel_slot(ctx.timers, &mut self.retry_timer);

        let beacon = {
            let radio: &dyn RadioFrontEnd = &*ctx.radio;
            let airtime = |len: usize| radio.frame_airtime(len + MAC_OVERHEAD_BYTES);
            self.negotiator.next_beacon(now, &mut self.book, &self.queue, &airtime)
        };
        let Some(beacon) = beacon else {
            return;
        };

        let frame = AirFrame {
            channel: ctx.radio.channel_number(),
            payload: FramePayload::Beacon(beacon.encode()),
        };
        ctx.radio.transmit(now, frame);
        self.stats.beacons_sent += 1;
        self.window.arm_next(&mut self.book, &mut self.queue, ctx);
    }
}
