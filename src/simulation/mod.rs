//! Discrete-event simulation of stations sharing one collision domain.
//!
//! ## Module Organization
//!
//! - `event_queue`: cancellable timeline driving every station
//! - `timeline`: CCH/SCH slot timeline implementing channel coordination
//! - `signal_calculations`: OFDM airtime model
//! - `sim_radio`: single front-end radio with per-channel MAC users
//! - `network`: frame propagation, collisions and delivery
//! - `scenario`: scenario files and traffic generation

pub mod event_queue;
pub mod network;
pub mod scenario;
pub mod signal_calculations;
pub mod sim_radio;
pub mod timeline;

pub use network::{Network, NetworkEvent, NetworkStats};
pub use scenario::ScenarioConfig;
