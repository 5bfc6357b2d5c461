//! Configuration sections for the MAC, the slot timeline and the radio model.
//!
//! All time fields are integers in the unit named by their suffix so that
//! configuration files stay readable (`window_duration_us = 5000`).

use embassy_time::Duration;
use serde::Deserialize;

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse configuration: {}", msg),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Per-station MAC parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MacConfig {
    /// Length of every beacon-negotiated window (µs).
    pub window_duration_us: u64,
    /// Period between beacon opportunities (ms).
    pub beacon_interval_ms: u64,
    /// Upper bound of the random per-station beacon offset (µs).
    pub beacon_jitter_us: u64,
    /// Maximum number of destinations listed in one request beacon.
    pub max_request_targets: usize,
    /// Requests not granted within this time are dropped (ms). 0 disables.
    pub request_timeout_ms: u64,
    /// Outbound frames held before the oldest is dropped.
    pub queue_capacity: usize,
    /// Short inter-frame space (µs).
    pub sifs_us: u64,
    /// Size of an acknowledgement frame (bytes).
    pub ack_bytes: usize,
    /// Emit an empty beacon when there is nothing to negotiate.
    pub keep_alive_beacons: bool,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            window_duration_us: 5_000,
            beacon_interval_ms: 100,
            beacon_jitter_us: 20_000,
            max_request_targets: 4,
            request_timeout_ms: 500,
            queue_capacity: 256,
            sifs_us: 32,
            ack_bytes: 14,
            keep_alive_beacons: false,
        }
    }
}

impl MacConfig {
    pub fn window_duration(&self) -> Duration {
        Duration::from_micros(self.window_duration_us)
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn sifs(&self) -> Duration {
        Duration::from_micros(self.sifs_us)
    }

    /// `None` when request timeouts are disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms == 0 { None } else { Some(Duration::from_millis(self.request_timeout_ms)) }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_duration_us == 0 {
            return Err(ConfigError::ValidationError("window_duration_us must be positive".to_string()));
        }
        if self.window_duration_us > u32::MAX as u64 {
            return Err(ConfigError::ValidationError(format!(
                "window_duration_us {} does not fit the 32-bit beacon duration field",
                self.window_duration_us
            )));
        }
        if self.beacon_interval_ms == 0 {
            return Err(ConfigError::ValidationError("beacon_interval_ms must be positive".to_string()));
        }
        if self.beacon_jitter_us >= self.beacon_interval_ms * 1000 {
            return Err(ConfigError::ValidationError(format!(
                "beacon_jitter_us {} must be smaller than the beacon interval",
                self.beacon_jitter_us
            )));
        }
        if self.max_request_targets == 0 || self.max_request_targets > u8::MAX as usize {
            return Err(ConfigError::ValidationError(format!(
                "max_request_targets {} must be 1-{}",
                self.max_request_targets,
                u8::MAX
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationError("queue_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

/// Alternating CCH/SCH interval layout. Each interval starts with a guard.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimelineConfig {
    pub control_interval_ms: u64,
    pub service_interval_ms: u64,
    pub guard_interval_ms: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            control_interval_ms: 50,
            service_interval_ms: 50,
            guard_interval_ms: 4,
        }
    }
}

impl TimelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_interval_ms == 0 || self.service_interval_ms == 0 {
            return Err(ConfigError::ValidationError("control and service intervals must be positive".to_string()));
        }
        if self.guard_interval_ms >= self.control_interval_ms || self.guard_interval_ms >= self.service_interval_ms {
            return Err(ConfigError::ValidationError(format!(
                "guard_interval_ms {} must be shorter than both intervals ({} / {})",
                self.guard_interval_ms, self.control_interval_ms, self.service_interval_ms
            )));
        }
        Ok(())
    }
}

/// OFDM radio model parameters (10 MHz channel by default).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RadioConfig {
    /// PHY data rate in Mbit/s.
    pub data_rate_mbps: u32,
    /// Preamble plus SIGNAL field duration (µs).
    pub preamble_us: u64,
    /// OFDM symbol duration (µs).
    pub symbol_us: u64,
    /// Time needed to retune the front-end (µs).
    pub switch_delay_us: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            data_rate_mbps: 6,
            preamble_us: 40,
            symbol_us: 8,
            switch_delay_us: 250,
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_rate_mbps == 0 {
            return Err(ConfigError::ValidationError("data_rate_mbps must be positive".to_string()));
        }
        if self.symbol_us == 0 {
            return Err(ConfigError::ValidationError("symbol_us must be positive".to_string()));
        }
        Ok(())
    }
}
