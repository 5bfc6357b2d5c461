//! Physical/link collaborator contract and the frames that cross it.

use embassy_time::{Duration, Instant};

use crate::common::types::{ChannelId, MacAddress};

/// MAC header plus FCS added to every frame on air.
pub const MAC_OVERHEAD_BYTES: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub source: MacAddress,
    pub destination: MacAddress,
    pub payload: Vec<u8>,
    /// Sent inside a negotiated window rather than by contention.
    pub contention_free: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// Encoded `BeaconFrame`.
    Beacon(Vec<u8>),
    Data(DataFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirFrame {
    pub channel: ChannelId,
    pub payload: FramePayload,
}

impl AirFrame {
    /// Bytes on air, overhead included.
    pub fn len_bytes(&self) -> usize {
        let body = match &self.payload {
            FramePayload::Beacon(bytes) => bytes.len(),
            FramePayload::Data(frame) => frame.payload.len(),
        };
        body + MAC_OVERHEAD_BYTES
    }
}

/// The single radio front-end shared by every logical MAC user.
///
/// One MAC user exists per channel; only the user attached to the live
/// channel may contend. Switching is driven by the channel scheduler through
/// the user hooks below.
pub trait RadioFrontEnd {
    fn is_channel_idle(&self, now: Instant) -> bool;

    /// Zero when the channel is idle.
    fn delay_until_idle(&self, now: Instant) -> Duration;

    fn channel_switch_delay(&self) -> Duration;

    /// Channel the front-end is currently tuned to.
    fn channel_number(&self) -> ChannelId;

    fn set_channel_number(&mut self, channel: ChannelId);

    /// Airtime of a frame of `bytes` bytes, overhead included.
    fn frame_airtime(&self, bytes: usize) -> Duration;

    /// Start sending `frame` now. Returns its airtime.
    fn transmit(&mut self, now: Instant, frame: AirFrame) -> Duration;

    fn suspend_user(&mut self, channel: ChannelId);

    fn detach_user(&mut self, channel: ChannelId);

    fn attach_user(&mut self, channel: ChannelId);

    /// Declare the medium busy for `channel`'s user during `[now, now+duration)`.
    fn make_virtual_busy(&mut self, channel: ChannelId, now: Instant, duration: Duration);

    fn resume_user(&mut self, channel: ChannelId);
}
