//! Simulated single front-end radio with one logical MAC user per channel.
//!
//! The radio tracks:
//! - the tuned channel and the attach/suspend state of every channel's user
//! - carrier-sense busy time caused by its own transmissions and by frames
//!   heard from other stations on the tuned channel
//! - virtual busy periods declared by the channel scheduler (retuning, guards)
//! - an outbox of started transmissions, drained by the network loop

use embassy_time::{Duration, Instant};
use std::collections::BTreeMap;

use super::signal_calculations::calculate_air_time;
use crate::common::config::RadioConfig;
use crate::common::types::{CONTROL_CHANNEL, ChannelId};
use crate::mac::radio::{AirFrame, RadioFrontEnd};

#[derive(Debug, Clone, Copy)]
pub struct MacUser {
    pub attached: bool,
    pub suspended: bool,
    pub busy_until: Instant,
}

impl Default for MacUser {
    fn default() -> Self {
        Self {
            attached: false,
            suspended: false,
            busy_until: Instant::from_ticks(0),
        }
    }
}

/// A transmission started by this radio.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub start: Instant,
    pub airtime: Duration,
    pub frame: AirFrame,
}

pub struct SimRadio {
    config: RadioConfig,
    channel: ChannelId,
    users: BTreeMap<ChannelId, MacUser>,
    tx_until: Instant,
    sensed_busy_until: Instant,
    outbox: Vec<Transmission>,
    switch_count: u64,
}

impl SimRadio {
    /// A radio tuned to the control channel with its user attached.
    pub fn new(config: RadioConfig) -> Self {
        let mut users = BTreeMap::new();
        users.insert(
            CONTROL_CHANNEL,
            MacUser {
                attached: true,
                ..MacUser::default()
            },
        );
        Self {
            config,
            channel: CONTROL_CHANNEL,
            users,
            tx_until: Instant::from_ticks(0),
            sensed_busy_until: Instant::from_ticks(0),
            outbox: Vec::new(),
            switch_count: 0,
        }
    }

    pub fn user(&self, channel: ChannelId) -> MacUser {
        self.users.get(&channel).copied().unwrap_or_default()
    }

    /// Carrier sense: another station is sending on the tuned channel until `until`.
    pub fn sense_busy(&mut self, until: Instant) {
        self.sensed_busy_until = self.sensed_busy_until.max(until);
    }

    pub fn is_transmitting(&self, now: Instant) -> bool {
        now < self.tx_until
    }

    /// Transmissions started since the last call.
    pub fn take_transmissions(&mut self) -> Vec<Transmission> {
        std::mem::take(&mut self.outbox)
    }

    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    fn busy_until(&self) -> Instant {
        let user = self.user(self.channel);
        self.tx_until.max(self.sensed_busy_until).max(user.busy_until)
    }
}

impl RadioFrontEnd for SimRadio {
    fn is_channel_idle(&self, now: Instant) -> bool {
        let user = self.user(self.channel);
        user.attached && !user.suspended && self.busy_until() <= now
    }

    fn delay_until_idle(&self, now: Instant) -> Duration {
        self.busy_until().saturating_duration_since(now)
    }

    fn channel_switch_delay(&self) -> Duration {
        Duration::from_micros(self.config.switch_delay_us)
    }

    fn channel_number(&self) -> ChannelId {
        self.channel
    }

    fn set_channel_number(&mut self, channel: ChannelId) {
        if channel != self.channel {
            // Whatever was sensed on the previous channel is irrelevant after retuning.
            self.sensed_busy_until = Instant::from_ticks(0);
            self.channel = channel;
            self.switch_count += 1;
        }
    }

    fn frame_airtime(&self, bytes: usize) -> Duration {
        calculate_air_time(&self.config, bytes)
    }

    fn transmit(&mut self, now: Instant, frame: AirFrame) -> Duration {
        let airtime = self.frame_airtime(frame.len_bytes());
        if !self.is_channel_idle(now) {
            log::warn!("Transmitting on {} while the medium is not idle", self.channel);
        }
        self.tx_until = now + airtime;
        self.outbox.push(Transmission { start: now, airtime, frame });
        airtime
    }

    fn suspend_user(&mut self, channel: ChannelId) {
        self.users.entry(channel).or_default().suspended = true;
    }

    fn detach_user(&mut self, channel: ChannelId) {
        self.users.entry(channel).or_default().attached = false;
    }

    fn attach_user(&mut self, channel: ChannelId) {
        self.users.entry(channel).or_default().attached = true;
    }

    fn make_virtual_busy(&mut self, channel: ChannelId, now: Instant, duration: Duration) {
        let user = self.users.entry(channel).or_default();
        user.busy_until = user.busy_until.max(now + duration);
    }

    fn resume_user(&mut self, channel: ChannelId) {
        self.users.entry(channel).or_default().suspended = false;
    }
}
