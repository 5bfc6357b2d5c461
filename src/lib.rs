//! Multi-channel MAC coordination for vehicular radios with beacon-negotiated
//! contention-free windows, plus a discrete-event simulator to drive it.

pub mod common;
pub mod mac;
pub mod simulation;
