//! OFDM airtime calculation for the simulated radio: preamble plus whole
//! OFDM symbols for the payload at the configured PHY rate.
//!
//! Units:
//! - Time: microseconds internally, embassy `Duration` for the API
//! - Size: bytes on air, MAC overhead included by the caller

use embassy_time::Duration;

use crate::common::config::RadioConfig;

/// SERVICE field bits prepended to the PSDU.
const SERVICE_BITS: u64 = 16;
/// Convolutional encoder tail bits appended to the PSDU.
const TAIL_BITS: u64 = 6;

/// Calculate the airtime of a frame of `bytes` bytes.
///
/// # Formula
///
/// ```text
/// N_sym = ceil((16 + 8 × bytes + 6) / (rate × T_sym))
/// T     = T_preamble + N_sym × T_sym
/// ```
///
/// With the default 10 MHz profile (6 Mbit/s, 8 µs symbols) every symbol
/// carries 48 data bits.
pub(crate) fn calculate_air_time(config: &RadioConfig, bytes: usize) -> Duration {
    let bits = SERVICE_BITS + 8 * bytes as u64 + TAIL_BITS;
    let bits_per_symbol = (config.data_rate_mbps as u64 * config.symbol_us).max(1);
    let symbols = bits.div_ceil(bits_per_symbol);
    Duration::from_micros(config.preamble_us + symbols * config.symbol_us)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airtime_matches_ofdm_symbol_rounding() {
        let cfg = RadioConfig::default();
        // 14-byte ACK: 134 bits -> 3 symbols -> 40 + 24 us
        assert_eq!(calculate_air_time(&cfg, 14), Duration::from_micros(64));
        // 300 bytes: 2422 bits -> 51 symbols
        assert_eq!(calculate_air_time(&cfg, 300), Duration::from_micros(40 + 51 * 8));
    }

    #[test]
    fn airtime_increases_with_payload_and_drops_with_rate() {
        let slow = RadioConfig::default();
        let fast = RadioConfig {
            data_rate_mbps: 27,
            ..RadioConfig::default()
        };
        assert!(calculate_air_time(&slow, 1000) > calculate_air_time(&slow, 100));
        assert!(calculate_air_time(&fast, 1000) < calculate_air_time(&slow, 1000));
    }
}
