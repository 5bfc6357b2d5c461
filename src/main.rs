use anyhow::Context;
use embassy_time::Instant;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;

use wave_mac_simulator::common::types::AccessType;
use wave_mac_simulator::simulation::ScenarioConfig;

const DEFAULT_SCENARIO: &str = "scenarios/intersection.toml";

fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wave_mac_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Starting up");

    let path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_SCENARIO));
    let scenario = ScenarioConfig::load(&path).with_context(|| format!("Failed to load scenario {}", path.display()))?;

    let mut network = scenario.build();
    network.run_until(Instant::from_millis(scenario.duration_ms));
    network.shutdown();

    let stats = network.stats();
    info!(
        "Finished after {} ms: {} beacons, {} data frames sent, {} delivered, {} collisions, {} missed off-channel, {} refused channel requests",
        scenario.duration_ms,
        stats.beacons_sent,
        stats.data_sent,
        stats.delivered,
        stats.collisions,
        stats.missed_off_channel,
        stats.rejected_requests
    );

    for (index, station) in scenario.stations.iter().enumerate() {
        let (mac, window) = network.station_stats(index);
        let access = match network.station(index).access() {
            AccessType::DefaultControlAccess => "control".to_string(),
            other => format!("{:?}", other),
        };
        info!(
            "Station {}: {} beacons sent, {} agreements recorded ({} rejected), {} requests expired, {} windows, {} frames sent, {} deferred, {} held off-channel, {} delivered, {} queued, {} dropped, access {}",
            station.id,
            mac.beacons_sent,
            mac.agreements_recorded,
            mac.agreements_rejected,
            mac.requests_expired,
            window.windows,
            window.frames_sent,
            window.frames_deferred,
            window.off_channel_holds,
            mac.frames_delivered,
            network.station(index).queue().len(),
            network.station(index).queue().dropped(),
            access
        );
    }
    Ok(())
}
