//! Types and configuration shared by the MAC and the simulator.

pub mod config;
pub mod types;
