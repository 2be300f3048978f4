use ecotrack::bootstrap::{config_path, init_tracing, shutdown_signal};
use ecotrack::config::Config;
use ecotrack::gateway::{self, Gateway};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("EcoTrack API gateway starting...");

    let path = config_path();
    let config = Config::load(&path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}\n\n\
             Make sure:\n\
             1. {} exists (or set ECOTRACK_CONFIG)\n\
             2. All required environment variables are set (check .env.example)\n\
             3. Create a .env file if needed",
            path,
            e,
            path
        )
    })?;
    info!("Configuration loaded");

    let addr = config.gateway.socket_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind gateway to {}: {}\n\n\
             Common fixes:\n\
             1. Check nothing else is listening on that port\n\
             2. Change gateway.listen_addr (GATEWAY_LISTEN_ADDR)",
            addr,
            e
        )
    })?;

    let gateway = Arc::new(Gateway::new(&config)?);
    gateway::serve(listener, gateway, shutdown_signal()).await?;

    info!("EcoTrack API gateway shutting down");
    Ok(())
}
