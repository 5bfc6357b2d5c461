//! Identifiers shared by every layer of the stack.
//!
//! Contains:
//! - `ChannelId` with the control/service channel numbering of the 5.9 GHz band
//! - `MacAddress` with group-bit handling and simulation-friendly construction
//! - `AccessType` / `AccessKind` describing how a station occupies a channel

use serde::Deserialize;
use std::fmt;

/// Logical radio channel number.
///
/// Exactly one value is the control channel; every other valid number is a
/// service channel. A single front-end is tuned to one channel at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u8);

/// The always-available control channel (CCH).
pub const CONTROL_CHANNEL: ChannelId = ChannelId(178);

/// Service channels (SCH) available for extended or contention-free traffic.
pub const SERVICE_CHANNELS: [ChannelId; 6] = [ChannelId(172), ChannelId(174), ChannelId(176), ChannelId(180), ChannelId(182), ChannelId(184)];

impl ChannelId {
    pub fn is_control(self) -> bool {
        self == CONTROL_CHANNEL
    }

    pub fn is_service(self) -> bool {
        SERVICE_CHANNELS.contains(&self)
    }

    /// Whether this number is either the CCH or one of the SCHs.
    pub fn is_valid(self) -> bool {
        self.is_control() || self.is_service()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_control() { write!(f, "CCH{}", self.0) } else { write!(f, "SCH{}", self.0) }
    }
}

/// 48-bit link-layer address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Locally administered unicast address carrying `id` in the low 32 bits.
    /// Used by the simulator to map station ids onto addresses.
    pub fn from_station_id(id: u32) -> Self {
        let b = id.to_be_bytes();
        MacAddress([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    /// Group (multicast or broadcast) addresses have the I/G bit set.
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", o[0], o[1], o[2], o[3], o[4], o[5])
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Requested kind of service-channel access, as passed in by the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Continuous,
    Alternating,
    Extended,
}

/// Current occupation of the front-end.
///
/// At most one non-idle assignment is active at any time; `NoAccess` only
/// exists before the scheduler is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    NoAccess,
    DefaultControlAccess,
    ContinuousAccess(ChannelId),
    AlternatingAccess(ChannelId),
    /// `extends` is the number of sync intervals granted at activation.
    ExtendedAccess { channel: ChannelId, extends: u32 },
}

impl AccessType {
    /// Channel held by a non-default assignment.
    pub fn assigned_channel(&self) -> Option<ChannelId> {
        match *self {
            AccessType::ContinuousAccess(ch) | AccessType::AlternatingAccess(ch) => Some(ch),
            AccessType::ExtendedAccess { channel, .. } => Some(channel),
            AccessType::NoAccess | AccessType::DefaultControlAccess => None,
        }
    }

    pub fn kind(&self) -> Option<AccessKind> {
        match self {
            AccessType::ContinuousAccess(_) => Some(AccessKind::Continuous),
            AccessType::AlternatingAccess(_) => Some(AccessKind::Alternating),
            AccessType::ExtendedAccess { .. } => Some(AccessKind::Extended),
            AccessType::NoAccess | AccessType::DefaultControlAccess => None,
        }
    }

    /// True for the idle states that any assignment may replace.
    pub fn is_idle(&self) -> bool {
        matches!(self, AccessType::NoAccess | AccessType::DefaultControlAccess)
    }
}
