use crate::aggregate::{aggregate, Stations};
use crate::alert::evaluate;
use crate::client::ApiClient;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::model::{AlertState, FavoriteLocation, Reading};
use crate::resolver::resolve;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

/// Everything derived in one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub stations: Stations,
    pub alerts: Vec<AlertState>,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Set when the latest pass failed; the derived data is then from the last good pass.
    pub last_error: Option<String>,
    pub passes: u64,
}

impl DashboardState {
    pub fn alerting(&self) -> impl Iterator<Item = &AlertState> {
        self.alerts.iter().filter(|a| a.is_alerting)
    }
}

/// Resolve each favorite to its nearest station and evaluate its thresholds.
pub fn evaluate_favorites(favorites: &[FavoriteLocation], stations: &Stations) -> Vec<AlertState> {
    favorites
        .iter()
        .map(|favorite| {
            let nearest = resolve(favorite.latitude, favorite.longitude, stations);
            evaluate(favorite, nearest)
        })
        .collect()
}

/// Derive a fresh state from a reading batch and the user's favorites.
pub fn derive_state(readings: &[Reading], favorites: &[FavoriteLocation]) -> DashboardState {
    let stations = aggregate(readings);
    let alerts = evaluate_favorites(favorites, &stations);
    DashboardState {
        stations,
        alerts,
        refreshed_at: Some(Utc::now()),
        last_error: None,
        passes: 0,
    }
}

pub struct Monitor {
    config: MonitorConfig,
    client: ApiClient,
    state_tx: watch::Sender<Arc<DashboardState>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(Self, watch::Receiver<Arc<DashboardState>>)> {
        let client = ApiClient::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_seconds),
        )?;
        let (state_tx, state_rx) = watch::channel(Arc::new(DashboardState::default()));

        Ok((
            Self {
                config,
                client,
                state_tx,
                shutdown_rx,
            },
            state_rx,
        ))
    }

    pub fn state(&self) -> Arc<DashboardState> {
        self.state_tx.borrow().clone()
    }

    pub async fn run(&mut self) -> Result<()> {
        let initial_delay = Duration::from_secs(self.config.initial_delay_seconds);
        let refresh_interval = self.config.refresh_interval();

        info!(
            "Monitor starting with {}s initial delay, {}m interval",
            self.config.initial_delay_seconds, self.config.interval_minutes
        );

        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {},
            _ = self.shutdown_rx.changed() => {
                info!("Shutdown received during initial delay");
                return Ok(());
            }
        }

        if let Err(e) = self.refresh().await {
            error!("Refresh error: {}", e);
        }

        // A pass that outlasts the interval delays the next one instead of overlapping it
        let mut ticker = interval(refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // First tick is immediate, skip it

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!("Refresh error: {}", e);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping monitor");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run one fetch-aggregate-resolve-evaluate pass and publish the result.
    ///
    /// On failure the previous stations and alerts stay published with the
    /// error attached.
    pub async fn refresh(&mut self) -> Result<()> {
        let previous = self.state();
        let passes = previous.passes + 1;

        match self.fetch().await {
            Ok((favorites, readings)) => {
                let mut state = derive_state(&readings, &favorites);
                state.passes = passes;

                info!(
                    "Refresh {}: {} stations, {} favorites, {} alerting",
                    passes,
                    state.stations.len(),
                    state.alerts.len(),
                    state.alerting().count()
                );
                for alert in state.alerting() {
                    warn!(
                        "Favorite '{}' ({}) is alerting: PM2.5 {:?} near {}",
                        alert.label,
                        alert.favorite_id,
                        alert.current_pm25,
                        alert.nearest_station_name.as_deref().unwrap_or("unknown station")
                    );
                }

                self.state_tx.send_replace(Arc::new(state));
                Ok(())
            }
            Err(e) => {
                if e.is_unauthorized() {
                    warn!("Token rejected, will log in again on the next pass");
                    self.client.clear_token();
                }

                let retained = DashboardState {
                    last_error: Some(e.to_string()),
                    passes,
                    ..(*previous).clone()
                };
                self.state_tx.send_replace(Arc::new(retained));
                Err(e)
            }
        }
    }

    async fn fetch(&mut self) -> Result<(Vec<FavoriteLocation>, Vec<Reading>)> {
        if !self.client.is_authenticated() {
            if let Some((email, password)) = self.config.credentials() {
                let (email, password) = (email.to_string(), password.to_string());
                self.client.login(&email, &password).await?;
            }
        }

        if self.client.is_authenticated() {
            tokio::try_join!(self.client.list_favorites(), self.client.latest_readings())
        } else {
            Ok((Vec::new(), self.client.latest_readings().await?))
        }
    }
}
