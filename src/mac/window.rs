//! Contention-free window execution.
//!
//! A station runs a window only for agreements it transmits on. Inside the
//! window it sends one frame per radio-idle opportunity, never letting a
//! frame exchange cross the window end. Frames that do not fit are returned
//! to the head of the queue for the next window.

use embassy_time::{Duration, Instant};

use super::MacContext;
use super::agreement_book::{Agreement, AgreementBook};
use super::queue::{OutboundQueue, QueuedFrame};
use super::radio::{AirFrame, DataFrame, FramePayload, MAC_OVERHEAD_BYTES};
use super::timers::{MacEvent, TimerHandle, Timers, cancel_slot, rearm_slot};
use crate::common::types::MacAddress;

/// Medium occupation of one frame: `data + SIFS`, plus `ACK + SIFS` when acknowledged.
pub fn exchange_time(data_airtime: Duration, ack_airtime: Duration, sifs: Duration, acknowledged: bool) -> Duration {
    if acknowledged { data_airtime + sifs + ack_airtime + sifs } else { data_airtime + sifs }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub windows: u64,
    pub frames_sent: u64,
    pub frames_deferred: u64,
    pub off_channel_holds: u64,
}

pub struct WindowLoop {
    address: MacAddress,
    sifs: Duration,
    ack_bytes: usize,
    active: Option<Agreement>,
    peer_done: bool,
    group_done: bool,
    start_timer: Option<TimerHandle>,
    resume_timer: Option<TimerHandle>,
    end_timer: Option<TimerHandle>,
    stats: WindowStats,
}

impl WindowLoop {
    pub fn new(address: MacAddress, sifs: Duration, ack_bytes: usize) -> Self {
        Self {
            address,
            sifs,
            ack_bytes,
            active: None,
            peer_done: false,
            group_done: false,
            start_timer: None,
            resume_timer: None,
            end_timer: None,
            stats: WindowStats::default(),
        }
    }

    pub fn active(&self) -> Option<&Agreement> {
        self.active.as_ref()
    }

    pub fn stats(&self) -> WindowStats {
        self.stats
    }

    /// Start of the window the start timer is armed for.
    pub fn armed_start(&self) -> Option<Instant> {
        self.start_timer.map(|h| h.at())
    }

    /// Start or arm the earliest own agreement. Called after every change to the book.
    pub fn arm_next(&mut self, book: &mut AgreementBook, queue: &mut OutboundQueue, ctx: &mut MacContext) {
        if self.active.is_some() {
            return;
        }
        let now = ctx.now();
        book.sweep_expired(now);
        let Some(next) = book.next_agreement_for(self.address).copied() else {
            cancel_slot(ctx.timers, &mut self.start_timer);
            return;
        };
        if next.start <= now {
            cancel_slot(ctx.timers, &mut self.start_timer);
            self.start_window(next, queue, ctx);
            return;
        }
        if self.armed_start() != Some(next.start) {
            rearm_slot(ctx.timers, &mut self.start_timer, next.start - now, MacEvent::WindowStart);
        }
    }

    pub fn on_window_start(&mut self, book: &mut AgreementBook, queue: &mut OutboundQueue, ctx: &mut MacContext) {
        self.start_timer = None;
        self.arm_next(book, queue, ctx);
    }

    pub fn on_window_resume(&mut self, queue: &mut OutboundQueue, ctx: &mut MacContext) {
        self.resume_timer = None;
        self.drain(queue, ctx);
    }

    pub fn on_window_end(&mut self, book: &mut AgreementBook, queue: &mut OutboundQueue, ctx: &mut MacContext) {
        self.end_timer = None;
        cancel_slot(ctx.timers, &mut self.resume_timer);
        if let Some(done) = self.active.take() {
            log::debug!("[{}] Window to {} closed at {}us", self.address, done.receiver, ctx.now().as_micros());
        }
        self.arm_next(book, queue, ctx);
    }

    /// New traffic arrived; use it if a window is open and idle.
    pub fn on_enqueued(&mut self, queue: &mut OutboundQueue, ctx: &mut MacContext) {
        if self.active.is_some() && self.resume_timer.is_none() {
            self.peer_done = false;
            self.group_done = false;
            self.drain(queue, ctx);
        }
    }

    pub fn shutdown(&mut self, timers: &mut dyn Timers) {
        cancel_slot(timers, &mut self.start_timer);
        cancel_slot(timers, &mut self.resume_timer);
        cancel_slot(timers, &mut self.end_timer);
        self.active = None;
    }

    fn start_window(&mut self, agreement: Agreement, queue: &mut OutboundQueue, ctx: &mut MacContext) {
        let now = ctx.now();
        log::debug!(
            "[{}] Window to {} open {}us..{}us",
            self.address,
            agreement.receiver,
            now.as_micros(),
            agreement.end().as_micros()
        );
        self.active = Some(agreement);
        self.peer_done = false;
        self.group_done = false;
        self.stats.windows += 1;
        rearm_slot(ctx.timers, &mut self.end_timer, agreement.end() - now, MacEvent::WindowEnd);
        self.drain(queue, ctx);
    }

    /// Send at most one frame, then wait for the exchange to finish.
    fn drain(&mut self, queue: &mut OutboundQueue, ctx: &mut MacContext) {
        let Some(agreement) = self.active else {
            return;
        };
        let now = ctx.now();
        if now >= agreement.end() {
            return;
        }
        if !ctx.radio.channel_number().is_control() {
            // Peers listen on the control channel. Keep the frames and look
            // again just after the radio hops back at the next sync interval.
            let coordinator = ctx.coordinator;
            let to_service = coordinator.time_to_service_interval(now);
            let wait = to_service + coordinator.time_to_control_interval(now + to_service) + self.sifs;
            log::debug!(
                "[{}] Window to {} held: tuned to {}, retry in {}us",
                self.address,
                agreement.receiver,
                ctx.radio.channel_number(),
                wait.as_micros()
            );
            self.stats.off_channel_holds += 1;
            rearm_slot(ctx.timers, &mut self.resume_timer, wait, MacEvent::WindowResume);
            return;
        }
        if !ctx.radio.is_channel_idle(now) {
            // A detached or suspended user reports zero delay; poll at SIFS granularity then.
            let wait = ctx.radio.delay_until_idle(now).max(self.sifs);
            rearm_slot(ctx.timers, &mut self.resume_timer, wait, MacEvent::WindowResume);
            return;
        }

        if !self.peer_done && !agreement.receiver.is_group() {
            if let Some(frame) = queue.dequeue_for(agreement.receiver) {
                if self.send_if_fits(frame, agreement.end(), queue, ctx) {
                    return;
                }
                self.peer_done = true;
            } else {
                self.peer_done = true;
            }
        }

        if !self.group_done {
            if let Some(frame) = queue.dequeue_group() {
                if self.send_if_fits(frame, agreement.end(), queue, ctx) {
                    return;
                }
            }
            self.group_done = true;
        }
        log::trace!("[{}] Nothing more fits before {}us", self.address, agreement.end().as_micros());
    }

    fn send_if_fits(&mut self, frame: QueuedFrame, end: Instant, queue: &mut OutboundQueue, ctx: &mut MacContext) -> bool {
        let now = ctx.now();
        let acknowledged = !frame.destination.is_group();
        let data = ctx.radio.frame_airtime(frame.payload.len() + MAC_OVERHEAD_BYTES);
        let ack = ctx.radio.frame_airtime(self.ack_bytes);
        let exchange = exchange_time(data, ack, self.sifs, acknowledged);
        if now + exchange > end {
            log::debug!(
                "[{}] Frame to {} needs {}us, {}us left; deferring",
                self.address,
                frame.destination,
                exchange.as_micros(),
                end.saturating_duration_since(now).as_micros()
            );
            queue.push_front(frame);
            self.stats.frames_deferred += 1;
            return false;
        }

        let air = AirFrame {
            channel: ctx.radio.channel_number(),
            payload: FramePayload::Data(DataFrame {
                source: self.address,
                destination: frame.destination,
                payload: frame.payload,
                contention_free: true,
            }),
        };
        ctx.radio.transmit(now, air);
        self.stats.frames_sent += 1;
        rearm_slot(ctx.timers, &mut self.resume_timer, exchange, MacEvent::WindowResume);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::{RadioConfig, TimelineConfig};
    use crate::common::types::ChannelId;
    use crate::mac::radio::RadioFrontEnd;
    use crate::simulation::event_queue::EventQueue;
    use crate::simulation::sim_radio::SimRadio;
    use crate::simulation::timeline::SlotTimeline;

    const SELF_ID: u32 = 1;
    const PEER_ID: u32 = 2;

    struct Harness {
        queue: EventQueue<MacEvent>,
        radio: SimRadio,
        timeline: SlotTimeline,
        book: AgreementBook,
        outbound: OutboundQueue,
        window: WindowLoop,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                queue: EventQueue::new(),
                radio: SimRadio::new(RadioConfig::default()),
                timeline: SlotTimeline::new(&TimelineConfig::default()),
                book: AgreementBook::new(),
                outbound: OutboundQueue::new(64),
                window: WindowLoop::new(MacAddress::from_station_id(SELF_ID), Duration::from_micros(32), 14),
            }
        }

        fn enqueue(&mut self, dest: MacAddress, count: usize, bytes: usize) {
            for i in 0..count {
                self.outbound.enqueue(QueuedFrame {
                    destination: dest,
                    payload: vec![i as u8; bytes],
                });
            }
        }

        fn add(&mut self, tx: u32, rx: MacAddress, start_ms: u64) {
            assert!(self.book.add_agreement(Agreement {
                transmitter: MacAddress::from_station_id(tx),
                receiver: rx,
                start: Instant::from_millis(start_ms),
                duration: Duration::from_millis(5),
            }));
        }

        fn arm(&mut self) {
            let mut ctx = MacContext {
                radio: &mut self.radio,
                coordinator: &self.timeline,
                timers: &mut self.queue,
            };
            self.window.arm_next(&mut self.book, &mut self.outbound, &mut ctx);
        }

        fn run_until(&mut self, limit: Instant) {
            while let Some((_, event)) = self.queue.pop_until(limit) {
                let mut ctx = MacContext {
                    radio: &mut self.radio,
                    coordinator: &self.timeline,
                    timers: &mut self.queue,
                };
                match event {
                    MacEvent::WindowStart => self.window.on_window_start(&mut self.book, &mut self.outbound, &mut ctx),
                    MacEvent::WindowResume => self.window.on_window_resume(&mut self.outbound, &mut ctx),
                    MacEvent::WindowEnd => self.window.on_window_end(&mut self.book, &mut self.outbound, &mut ctx),
                    _ => {}
                }
            }
        }
    }

    fn peer() -> MacAddress {
        MacAddress::from_station_id(PEER_ID)
    }

    #[test]
    fn exchange_time_adds_ack_only_for_unicast() {
        let data = Duration::from_micros(400);
        let ack = Duration::from_micros(64);
        let sifs = Duration::from_micros(32);
        assert_eq!(exchange_time(data, ack, sifs, true), Duration::from_micros(528));
        assert_eq!(exchange_time(data, ack, sifs, false), Duration::from_micros(432));
    }

    #[test]
    fn frames_never_overrun_the_window_end() {
        let mut h = Harness::new();
        h.enqueue(peer(), 20, 200);
        h.add(SELF_ID, peer(), 1);
        h.arm();
        assert_eq!(h.window.armed_start(), Some(Instant::from_millis(1)));

        h.run_until(Instant::from_millis(10));
        let sent = h.radio.take_transmissions();
        // 228 bytes on air: 352us data, 480us with SIFS/ACK/SIFS.
        assert_eq!(sent.len(), 10);
        let end = Instant::from_millis(6);
        for tx in &sent {
            assert!(tx.start >= Instant::from_millis(1));
            assert!(tx.start + Duration::from_micros(480) <= end);
        }
        assert_eq!(h.outbound.len(), 10);
        assert_eq!(h.window.stats().frames_deferred, 1);
        assert!(h.window.active().is_none());
    }

    #[test]
    fn deferred_frame_keeps_its_turn() {
        let mut h = Harness::new();
        h.enqueue(peer(), 12, 200);
        h.add(SELF_ID, peer(), 1);
        h.arm();
        h.run_until(Instant::from_millis(10));
        // Tags 0..=9 went out; tag 10 was the one too late.
        assert_eq!(h.outbound.dequeue_for(peer()).map(|f| f.payload[0]), Some(10));
    }

    #[test]
    fn receiver_side_does_not_open_a_window() {
        let mut h = Harness::new();
        h.enqueue(peer(), 3, 100);
        let me = MacAddress::from_station_id(SELF_ID);
        h.add(PEER_ID, me, 1);
        h.arm();
        assert!(h.window.armed_start().is_none());
        h.run_until(Instant::from_millis(10));
        assert!(h.radio.take_transmissions().is_empty());
        assert_eq!(h.outbound.len(), 3);
    }

    #[test]
    fn busy_radio_postpones_the_first_frame() {
        let mut h = Harness::new();
        h.enqueue(peer(), 1, 100);
        h.add(SELF_ID, peer(), 1);
        h.radio.sense_busy(Instant::from_millis(2));
        h.arm();
        h.run_until(Instant::from_millis(10));
        let sent = h.radio.take_transmissions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].start, Instant::from_millis(2));
    }

    #[test]
    fn group_frames_drain_inside_own_peer_window() {
        let mut h = Harness::new();
        h.enqueue(MacAddress::BROADCAST, 2, 50);
        h.enqueue(peer(), 1, 50);
        h.add(SELF_ID, peer(), 1);
        h.arm();
        h.run_until(Instant::from_millis(10));
        let sent = h.radio.take_transmissions();
        assert_eq!(sent.len(), 3);
        let first = match &sent[0].frame.payload {
            FramePayload::Data(d) => d.destination,
            FramePayload::Beacon(_) => panic!("unexpected beacon"),
        };
        assert_eq!(first, peer());
        assert!(h.outbound.is_empty());
    }

    #[test]
    fn earlier_agreement_replaces_armed_start() {
        let mut h = Harness::new();
        h.add(SELF_ID, peer(), 20);
        h.arm();
        assert_eq!(h.window.armed_start(), Some(Instant::from_millis(20)));
        h.add(SELF_ID, MacAddress::from_station_id(3), 8);
        h.arm();
        assert_eq!(h.window.armed_start(), Some(Instant::from_millis(8)));
        // Only the replacement timer is queued.
        assert_eq!(h.queue.len(), 1);
    }

    #[test]
    fn consecutive_own_agreements_run_back_to_back() {
        let mut h = Harness::new();
        h.enqueue(peer(), 30, 200);
        h.add(SELF_ID, peer(), 1);
        h.add(SELF_ID, peer(), 6);
        h.arm();
        h.run_until(Instant::from_millis(20));
        assert_eq!(h.window.stats().windows, 2);
        assert_eq!(h.radio.take_transmissions().len(), 20);
    }

    #[test]
    fn frames_enqueued_mid_window_are_sent() {
        let mut h = Harness::new();
        h.add(SELF_ID, peer(), 1);
        h.arm();
        h.run_until(Instant::from_millis(2));
        assert!(h.window.active().is_some());
        h.enqueue(peer(), 1, 100);
        let mut ctx = MacContext {
            radio: &mut h.radio,
            coordinator: &h.timeline,
            timers: &mut h.queue,
        };
        h.window.on_enqueued(&mut h.outbound, &mut ctx);
        assert_eq!(h.radio.take_transmissions().len(), 1);
    }

    #[test]
    fn window_on_a_service_channel_keeps_its_frames() {
        let mut h = Harness::new();
        h.radio.set_channel_number(ChannelId(172));
        h.enqueue(peer(), 3, 100);
        h.add(SELF_ID, peer(), 60);
        h.arm();

        h.run_until(Instant::from_millis(70));
        assert!(h.radio.take_transmissions().is_empty());
        assert_eq!(h.outbound.len(), 3);
        assert_eq!(h.window.stats().frames_sent, 0);
        assert_eq!(h.window.stats().off_channel_holds, 1);
        assert!(h.window.active().is_none());
    }
}
