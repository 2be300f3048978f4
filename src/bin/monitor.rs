use ecotrack::alert::classify_station;
use ecotrack::bootstrap::{config_path, init_tracing, shutdown_channel};
use ecotrack::config::Config;
use ecotrack::monitor::Monitor;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    info!("EcoTrack monitor starting...");

    let path = config_path();
    let config = Config::load(&path)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration from {}: {}", path, e))?;
    let monitor_config = config
        .monitor
        .ok_or_else(|| anyhow::anyhow!("No 'monitor' section in {}", path))?;

    if monitor_config.credentials().is_none() {
        info!("No monitor credentials configured; favorites will not be evaluated");
    }

    let shutdown_rx = shutdown_channel();
    let (mut monitor, mut state_rx) = Monitor::new(monitor_config, shutdown_rx)?;

    // Report each published pass
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            if let Some(err) = &state.last_error {
                error!("Pass {} failed, showing last known data: {}", state.passes, err);
            }
            for station in state.stations.iter() {
                info!(
                    "{} ({}): {}",
                    station.station_name,
                    station.station_id,
                    classify_station(station)
                );
            }
        }
    });

    if let Err(e) = monitor.run().await {
        error!("Monitor error: {}", e);
    }

    info!("EcoTrack monitor shutting down");
    Ok(())
}
