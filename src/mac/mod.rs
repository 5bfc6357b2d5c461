//! Multi-channel MAC coordination layer.
//!
//! ## Module Organization
//!
//! - `agreement_book`: pending requests and conflict-free agreements
//! - `beacon`: beacon wire format and grant/request policy
//! - `channel_scheduler`: single front-end channel assignment
//! - `window`: contention-free window execution
//! - `queue`: address-keyed outbound queue
//! - `station`: per-device MAC tying the components together
//! - `radio`, `coordination`, `timers`: contracts with the layers around the MAC

pub mod agreement_book;
pub mod beacon;
pub mod channel_scheduler;
pub mod coordination;
pub mod queue;
pub mod radio;
pub mod station;
pub mod timers;
pub mod window;

use embassy_time::Instant;

use coordination::ChannelCoordination;
use radio::RadioFrontEnd;
use timers::Timers;

/// Collaborators lent to the MAC for the duration of one event.
pub struct MacContext<'a> {
    pub radio: &'a mut dyn RadioFrontEnd,
    pub coordinator: &'a dyn ChannelCoordination,
    pub timers: &'a mut dyn Timers,
}

impl MacContext<'_> {
    pub fn now(&self) -> Instant {
        self.timers.now()
    }
}

pub use agreement_book::{Agreement, AgreementBook, Request};
pub use beacon::{BeaconFrame, BeaconMessage};
pub use channel_scheduler::ChannelScheduler;
pub use station::Station;
