//! Scenario files: station set, traffic flows and service-channel requests.
//!
//! Scenarios are TOML by default; a `.json` extension selects JSON.
//!
//! ```toml
//! seed = 7
//! duration_ms = 2000
//!
//! [mac]
//! window_duration_us = 5000
//!
//! [[stations]]
//! id = 1
//! traffic = [{ to = 2, rate_per_s = 50.0, payload_bytes = 200 }]
//!
//! [[stations]]
//! id = 2
//! service_requests = [{ at_ms = 300, channel = 172, kind = "extended", extends = 3 }]
//! ```

use embassy_time::{Duration, Instant};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::network::{Network, NetworkEvent};
use crate::common::config::{ConfigError, MacConfig, RadioConfig, TimelineConfig};
use crate::common::types::{AccessKind, ChannelId, MacAddress};

const MAX_STATIONS: usize = 1000;
const MAX_PAYLOAD_BYTES: usize = 2304;

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub seed: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    pub stations: Vec<StationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub id: u32,
    #[serde(default)]
    pub traffic: Vec<TrafficFlow>,
    #[serde(default)]
    pub service_requests: Vec<ServiceRequestConfig>,
}

/// Poisson traffic from the owning station. No `to` means broadcast.
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficFlow {
    #[serde(default)]
    pub to: Option<u32>,
    pub rate_per_s: f64,
    pub payload_bytes: usize,
    #[serde(default)]
    pub start_ms: u64,
    #[serde(default)]
    pub stop_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRequestConfig {
    pub at_ms: u64,
    pub channel: u8,
    pub kind: AccessKind,
    #[serde(default)]
    pub extends: u32,
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    pub release_ms: Option<u64>,
}

impl ScenarioConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(format!("{}: {}", path.display(), e)))?;
        let is_json = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let scenario = if is_json { Self::from_json(&content)? } else { Self::from_toml(&content)? };
        log::info!("Loaded scenario {} with {} stations", path.display(), scenario.stations.len());
        Ok(scenario)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let scenario: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let scenario: Self = serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mac.validate()?;
        self.timeline.validate()?;
        self.radio.validate()?;

        if self.duration_ms == 0 {
            return Err(ConfigError::ValidationError("duration_ms must be positive".to_string()));
        }
        if self.stations.is_empty() {
            return Err(ConfigError::ValidationError("Scenario must contain at least one station".to_string()));
        }
        if self.stations.len() > MAX_STATIONS {
            return Err(ConfigError::ValidationError(format!(
                "Station count {} exceeds maximum of {}",
                self.stations.len(),
                MAX_STATIONS
            )));
        }

        let mut ids = HashSet::new();
        for station in &self.stations {
            if !ids.insert(station.id) {
                return Err(ConfigError::ValidationError(format!("Duplicate station id: {}", station.id)));
            }
        }

        for station in &self.stations {
            for flow in &station.traffic {
                if let Some(to) = flow.to {
                    if !ids.contains(&to) {
                        return Err(ConfigError::ValidationError(format!("Station {} sends to unknown station {}", station.id, to)));
                    }
                    if to == station.id {
                        return Err(ConfigError::ValidationError(format!("Station {} sends to itself", station.id)));
                    }
                }
                if !(flow.rate_per_s > 0.0 && flow.rate_per_s.is_finite()) {
                    return Err(ConfigError::ValidationError(format!(
                        "Station {} has a traffic rate of {}; must be positive",
                        station.id, flow.rate_per_s
                    )));
                }
                if flow.payload_bytes == 0 || flow.payload_bytes > MAX_PAYLOAD_BYTES {
                    return Err(ConfigError::ValidationError(format!(
                        "Station {} payload size {} is outside 1..={}",
                        station.id, flow.payload_bytes, MAX_PAYLOAD_BYTES
                    )));
                }
                if flow.stop_ms.is_some_and(|stop| stop <= flow.start_ms) {
                    return Err(ConfigError::ValidationError(format!("Station {} has a traffic flow that stops before it starts", station.id)));
                }
            }
            for request in &station.service_requests {
                if !ChannelId(request.channel).is_valid() {
                    return Err(ConfigError::ValidationError(format!("Station {} requests unknown channel {}", station.id, request.channel)));
                }
                if request.release_ms.is_some_and(|release| release <= request.at_ms) {
                    return Err(ConfigError::ValidationError(format!(
                        "Station {} releases channel {} before requesting it",
                        station.id, request.channel
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the network, start every station and schedule all scenario events.
    pub fn build(&self) -> Network {
        let mut network = Network::new(&self.mac, &self.timeline, &self.radio);
        let mut index_of = HashMap::new();
        for station in &self.stations {
            let index = network.add_station(MacAddress::from_station_id(station.id), self.seed ^ u64::from(station.id));
            index_of.insert(station.id, index);
        }
        network.start();

        let end = Instant::from_millis(self.duration_ms);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut injected = 0usize;
        for station in &self.stations {
            let index = index_of[&station.id];
            for flow in &station.traffic {
                let destination = flow.to.map_or(MacAddress::BROADCAST, MacAddress::from_station_id);
                for at in arrival_times(flow, end, &mut rng) {
                    network.schedule(
                        at,
                        NetworkEvent::Inject {
                            station: index,
                            destination,
                            payload: vec![0; flow.payload_bytes],
                        },
                    );
                    injected += 1;
                }
            }
            for request in &station.service_requests {
                let channel = ChannelId(request.channel);
                network.schedule(
                    Instant::from_millis(request.at_ms),
                    NetworkEvent::ServiceRequest {
                        station: index,
                        channel,
                        kind: request.kind,
                        extends: request.extends,
                        immediate: request.immediate,
                    },
                );
                if let Some(release) = request.release_ms {
                    network.schedule(Instant::from_millis(release), NetworkEvent::ServiceRelease { station: index, channel });
                }
            }
        }
        log::info!("Scheduled {} frame arrivals over {} ms", injected, self.duration_ms);
        network
    }
}

/// Poisson arrival instants of one flow inside `[start_ms, min(stop_ms, end))`.
fn arrival_times(flow: &TrafficFlow, end: Instant, rng: &mut StdRng) -> Vec<Instant> {
    let stop = flow.stop_ms.map_or(end, |s| Instant::from_millis(s).min(end));
    // Validation guarantees a finite positive rate.
    let Ok(gap) = Exp::new(flow.rate_per_s) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut t = Instant::from_millis(flow.start_ms);
    loop {
        let seconds: f64 = gap.sample(rng);
        t += Duration::from_micros((seconds * 1_000_000.0) as u64);
        if t >= stop {
            break;
        }
        out.push(t);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_STATIONS: &str = r#"
        seed = 3
        duration_ms = 1000

        [mac]
        beacon_jitter_us = 0

        [[stations]]
        id = 1
        traffic = [{ to = 2, rate_per_s = 20.0, payload_bytes = 100 }]

        [[stations]]
        id = 2
        service_requests = [{ at_ms = 600, channel = 172, kind = "extended", extends = 1, release_ms = 900 }]
    "#;

    #[test]
    fn toml_scenario_parses_with_defaults() {
        let scenario = ScenarioConfig::from_toml(TWO_STATIONS).unwrap();
        assert_eq!(scenario.stations.len(), 2);
        assert_eq!(scenario.mac.beacon_jitter_us, 0);
        assert_eq!(scenario.mac.window_duration_us, 5000);
        assert_eq!(scenario.timeline.control_interval_ms, 50);
        assert_eq!(scenario.stations[1].service_requests[0].kind, AccessKind::Extended);
    }

    #[test]
    fn json_scenario_parses() {
        let json = r#"{
            "duration_ms": 500,
            "stations": [
                { "id": 1, "traffic": [{ "rate_per_s": 5.0, "payload_bytes": 40 }] },
                { "id": 2 }
            ]
        }"#;
        let scenario = ScenarioConfig::from_json(json).unwrap();
        assert_eq!(scenario.seed, 0);
        assert_eq!(scenario.stations[0].traffic[0].to, None);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let toml = "duration_ms = 10\n[[stations]]\nid = 1\n[[stations]]\nid = 1\n";
        let err = ScenarioConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("Duplicate")));
    }

    #[test]
    fn traffic_to_unknown_station_is_rejected() {
        let toml = "duration_ms = 10\n[[stations]]\nid = 1\ntraffic = [{ to = 9, rate_per_s = 1.0, payload_bytes = 10 }]\n";
        assert!(matches!(ScenarioConfig::from_toml(toml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let toml = "duration_ms = 10\n[[stations]]\nid = 1\nservice_requests = [{ at_ms = 1, channel = 99, kind = \"continuous\" }]\n";
        assert!(matches!(ScenarioConfig::from_toml(toml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(ScenarioConfig::from_toml("duration_ms = ["), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn arrivals_stay_inside_the_flow_bounds() {
        let flow = TrafficFlow {
            to: Some(2),
            rate_per_s: 200.0,
            payload_bytes: 10,
            start_ms: 100,
            stop_ms: Some(400),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let times = arrival_times(&flow, Instant::from_millis(1000), &mut rng);
        assert!(!times.is_empty());
        assert!(times.iter().all(|t| *t > Instant::from_millis(100) && *t < Instant::from_millis(400)));
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn bundled_scenario_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/intersection.toml");
        let scenario = ScenarioConfig::load(&path).unwrap();
        assert_eq!(scenario.stations.len(), 4);
        assert_eq!(scenario.stations[3].service_requests[1].kind, AccessKind::Continuous);
    }

    #[test]
    fn built_scenario_delivers_traffic() {
        let scenario = ScenarioConfig::from_toml(TWO_STATIONS).unwrap();
        let mut network = scenario.build();
        network.run_until(Instant::from_millis(scenario.duration_ms));
        assert_eq!(network.station_count(), 2);
        assert!(network.stats().beacons_sent > 0);
        assert!(!network.delivered_to(1).is_empty());
        assert_eq!(network.stats().rejected_requests, 0);
    }
}
