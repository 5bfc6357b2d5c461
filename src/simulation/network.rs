//! Single collision domain connecting every simulated station.
//!
//! High-level flow for each event:
//! 1) Pop the earliest event from the shared timeline.
//! 2) Route it to the owning station with a `MacContext` built from that
//!    station's radio, the slot timeline, and a timer view keyed by station.
//! 3) Propagate every transmission the station started: receivers tuned to
//!    the same channel sense the medium busy and get a reception that
//!    completes at the end of the airtime.
//! 4) On reception end, frames that overlapped another reception (or the
//!    receiver's own transmission) are lost; the rest are delivered if the
//!    receiver is still on the frame's channel.

use embassy_time::{Duration, Instant};
use std::cell::RefCell;
use std::rc::Rc;

use super::event_queue::EventQueue;
use super::sim_radio::{SimRadio, Transmission};
use super::timeline::SlotTimeline;
use crate::common::config::{MacConfig, RadioConfig, TimelineConfig};
use crate::common::types::{AccessKind, ChannelId, MacAddress};
use crate::mac::MacContext;
use crate::mac::radio::{AirFrame, DataFrame, FramePayload, RadioFrontEnd};
use crate::mac::station::{Station, StationStats};
use crate::mac::timers::{MacEvent, TimerHandle, Timers};
use crate::mac::window::WindowStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Mac { station: usize, event: MacEvent },
    ReceptionEnd { station: usize, reception: u64 },
    Inject { station: usize, destination: MacAddress, payload: Vec<u8> },
    ServiceRequest { station: usize, channel: ChannelId, kind: AccessKind, extends: u32, immediate: bool },
    ServiceRelease { station: usize, channel: ChannelId },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStats {
    pub beacons_sent: u64,
    pub data_sent: u64,
    pub delivered: u64,
    pub collisions: u64,
    pub missed_off_channel: u64,
    pub rejected_requests: u64,
}

/// A frame in flight towards one receiver.
#[derive(Debug, Clone)]
struct Reception {
    id: u64,
    frame: AirFrame,
    end: Instant,
    collided: bool,
}

struct Node {
    station: Station,
    radio: SimRadio,
    receptions: Vec<Reception>,
    inbox: Rc<RefCell<Vec<DataFrame>>>,
}

/// Timer view handed to one station; every event is tagged with its index.
struct StationTimers<'a> {
    queue: &'a mut EventQueue<NetworkEvent>,
    station: usize,
}

impl Timers for StationTimers<'_> {
    fn now(&self) -> Instant {
        self.queue.now()
    }

    fn schedule(&mut self, delay: Duration, event: MacEvent) -> TimerHandle {
        self.queue.schedule_in(delay, NetworkEvent::Mac { station: self.station, event })
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.queue.cancel_handle(handle)
    }

    fn delay_left(&self, handle: TimerHandle) -> Option<Duration> {
        self.queue.delay_left_of(handle)
    }
}

pub struct Network {
    mac: MacConfig,
    radio: RadioConfig,
    timeline: SlotTimeline,
    queue: EventQueue<NetworkEvent>,
    nodes: Vec<Node>,
    next_reception: u64,
    stats: NetworkStats,
}

impl Network {
    pub fn new(mac: &MacConfig, timeline: &TimelineConfig, radio: &RadioConfig) -> Self {
        Self {
            mac: mac.clone(),
            radio: radio.clone(),
            timeline: SlotTimeline::new(timeline),
            queue: EventQueue::new(),
            nodes: Vec::new(),
            next_reception: 0,
            stats: NetworkStats::default(),
        }
    }

    /// Add a station and return its index. `seed` drives its beacon jitter.
    pub fn add_station(&mut self, address: MacAddress, seed: u64) -> usize {
        let inbox = Rc::new(RefCell::new(Vec::new()));
        let sink = inbox.clone();
        let mut station = Station::new(address, &self.mac, seed);
        station.set_delivery_callback(Box::new(move |frame: &DataFrame| sink.borrow_mut().push(frame.clone())));
        self.nodes.push(Node {
            station,
            radio: SimRadio::new(self.radio.clone()),
            receptions: Vec::new(),
            inbox,
        });
        self.nodes.len() - 1
    }

    pub fn now(&self) -> Instant {
        self.queue.now()
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    pub fn station_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn station(&self, index: usize) -> &Station {
        &self.nodes[index].station
    }

    pub fn station_stats(&self, index: usize) -> (StationStats, WindowStats) {
        let station = &self.nodes[index].station;
        (station.stats(), station.window_stats())
    }

    pub fn radio(&self, index: usize) -> &SimRadio {
        &self.nodes[index].radio
    }

    /// Data frames delivered to station `index` so far.
    pub fn delivered_to(&self, index: usize) -> Vec<DataFrame> {
        self.nodes[index].inbox.borrow().clone()
    }

    /// Start every station at the current time.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() {
            self.with_station(index, |station, ctx| station.start(ctx));
        }
    }

    /// Cancel every station timer. Receptions in flight still complete.
    pub fn shutdown(&mut self) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let mut timers = StationTimers {
                queue: &mut self.queue,
                station: index,
            };
            node.station.shutdown(&mut timers);
        }
    }

    pub fn schedule(&mut self, at: Instant, event: NetworkEvent) {
        self.queue.schedule_at(at, event);
    }

    /// Queue `payload` at station `index` right now.
    pub fn enqueue(&mut self, index: usize, destination: MacAddress, payload: Vec<u8>) {
        self.with_station(index, |station, ctx| station.enqueue(payload, destination, ctx));
    }

    pub fn request_service_channel(&mut self, index: usize, channel: ChannelId, kind: AccessKind, extends: u32, immediate: bool) -> bool {
        self.with_station(index, |station, ctx| station.request_service_channel(channel, kind, extends, immediate, ctx))
    }

    pub fn release_service_channel(&mut self, index: usize, channel: ChannelId) -> bool {
        self.with_station(index, |station, ctx| station.release_service_channel(channel, ctx))
    }

    /// Process one event due no later than `limit`. Returns `false` once
    /// nothing is due, leaving the clock at `limit`.
    pub fn step(&mut self, limit: Instant) -> bool {
        let Some((_, event)) = self.queue.pop_until(limit) else {
            return false;
        };
        match event {
            NetworkEvent::Mac { station, event } => self.with_station(station, |s, ctx| s.handle_event(event, ctx)),
            NetworkEvent::ReceptionEnd { station, reception } => self.complete_reception(station, reception),
            NetworkEvent::Inject {
                station,
                destination,
                payload,
            } => self.enqueue(station, destination, payload),
            NetworkEvent::ServiceRequest {
                station,
                channel,
                kind,
                extends,
                immediate,
            } => {
                if !self.request_service_channel(station, channel, kind, extends, immediate) {
                    self.stats.rejected_requests += 1;
                    log::info!("Station {} was refused {:?} access on {}", station, kind, channel);
                }
            }
            NetworkEvent::ServiceRelease { station, channel } => {
                if !self.release_service_channel(station, channel) {
                    log::debug!("Station {} had nothing to release on {}", station, channel);
                }
            }
        }
        true
    }

    pub fn run_until(&mut self, limit: Instant) {
        while self.step(limit) {}
    }

    /// Run `f` against one station with its collaborators, then put every
    /// transmission it started on the air.
    fn with_station<R>(&mut self, index: usize, f: impl FnOnce(&mut Station, &mut MacContext) -> R) -> R {
        let result = {
            let node = &mut self.nodes[index];
            let mut timers = StationTimers {
                queue: &mut self.queue,
                station: index,
            };
            let mut ctx = MacContext {
                radio: &mut node.radio,
                coordinator: &self.timeline,
                timers: &mut timers,
            };
            f(&mut node.station, &mut ctx)
        };
        for tx in self.nodes[index].radio.take_transmissions() {
            self.propagate(index, tx);
        }
        result
    }

    fn propagate(&mut self, sender: usize, tx: Transmission) {
        match tx.frame.payload {
            FramePayload::Beacon(_) => self.stats.beacons_sent += 1,
            FramePayload::Data(_) => self.stats.data_sent += 1,
        }
        let end = tx.start + tx.airtime;

        // Half duplex: whatever the sender was receiving is lost.
        for reception in self.nodes[sender].receptions.iter_mut() {
            if reception.end > tx.start {
                reception.collided = true;
            }
        }

        for (index, node) in self.nodes.iter_mut().enumerate() {
            if index == sender || node.radio.channel_number() != tx.frame.channel {
                continue;
            }
            let mut collided = node.radio.is_transmitting(tx.start);
            for reception in node.receptions.iter_mut() {
                if reception.end > tx.start {
                    reception.collided = true;
                    collided = true;
                }
            }
            node.radio.sense_busy(end);

            let id = self.next_reception;
            self.next_reception += 1;
            node.receptions.push(Reception {
                id,
                frame: tx.frame.clone(),
                end,
                collided,
            });
            self.queue.schedule_at(end, NetworkEvent::ReceptionEnd { station: index, reception: id });
        }
    }

    fn complete_reception(&mut self, index: usize, id: u64) {
        let node = &mut self.nodes[index];
        let Some(position) = node.receptions.iter().position(|r| r.id == id) else {
            return;
        };
        let reception = node.receptions.swap_remove(position);
        if reception.collided {
            self.stats.collisions += 1;
            log::debug!("Station {} lost a frame on {} to a collision", index, reception.frame.channel);
            return;
        }
        if node.radio.channel_number() != reception.frame.channel {
            self.stats.missed_off_channel += 1;
            return;
        }
        self.stats.delivered += 1;
        self.with_station(index, |station, ctx| station.on_frame_received(&reception.frame, ctx));
    }
}
