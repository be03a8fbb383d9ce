// ============================
// fleet-backend-lib/src/lib.rs
// ============================
//! Core of the fleet real-time location server.
//!
//! Vehicle positions live in a [`location_store::LocationStore`]. They are
//! fed by authorized reporters over the WebSocket protocol and, for vehicles
//! that are quiet, by the fallback [`simulator::Simulator`]. Every tick (and
//! after every accepted report) the [`broadcaster::Broadcaster`] joins the
//! positions with the fleet directory and pushes the snapshot to every open
//! connection.

pub mod auth;
pub mod broadcaster;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod eta;
pub mod location_store;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod simulator;
pub mod validation;
pub mod ws_router;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::{CredentialValidator, JwtValidator};
use crate::broadcaster::Broadcaster;
use crate::config::Settings;
use crate::directory::{FleetDirectory, FleetFixture, InMemoryDirectory};
use crate::error::AppError;
use crate::location_store::{LocationSource, LocationStore};
use crate::registry::ConnectionRegistry;
use crate::simulator::Simulator;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub locations: LocationStore,
    pub registry: ConnectionRegistry,
    pub directory: Arc<dyn FleetDirectory>,
    pub auth: Arc<dyn CredentialValidator>,
    pub broadcaster: Broadcaster,
    pub simulator: Simulator,
}

impl AppState {
    /// Wire the components together around the given collaborators
    pub fn new(
        settings: Settings,
        directory: Arc<dyn FleetDirectory>,
        auth: Arc<dyn CredentialValidator>,
    ) -> Self {
        let locations = LocationStore::new();
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(
            locations.clone(),
            directory.clone(),
            registry.clone(),
            settings.broadcast.default_speed_kmh,
        );
        let simulator = Simulator::new(
            locations.clone(),
            directory.clone(),
            settings.simulation.clone(),
        );

        Self {
            settings: Arc::new(settings),
            locations,
            registry,
            directory,
            auth,
            broadcaster,
            simulator,
        }
    }

    /// Build the state the server runs with: the configured fixture (or the
    /// demo fleet), its seed positions and a JWT validator.
    pub async fn from_settings(settings: Settings) -> Result<Self, AppError> {
        settings.validate()?;

        let fixture = match &settings.directory.path {
            Some(path) => {
                info!(path = %path.display(), "loading fleet fixture");
                FleetFixture::load(path).await?
            },
            None => FleetFixture::sample(),
        };

        let directory = Arc::new(InMemoryDirectory::from_fixture(&fixture));
        let auth = Arc::new(JwtValidator::new(&settings.auth.jwt_secret));
        let state = Self::new(settings, directory, auth);
        state.seed(&fixture);

        info!(
            vehicles = fixture.vehicles.len(),
            positions = state.locations.len(),
            "fleet loaded"
        );
        Ok(state)
    }

    /// Load the fixture's starting positions into the store
    pub fn seed(&self, fixture: &FleetFixture) {
        for position in &fixture.positions {
            self.locations.set(
                position.vehicle_id,
                position.latitude,
                position.longitude,
                position.speed,
                LocationSource::Seeded,
            );
        }
    }

    /// Run one tick: simulate, then broadcast
    pub async fn tick(&self) -> Result<(), AppError> {
        let moved = self.simulator.step().await;
        let report = self.broadcaster.broadcast_all().await?;
        debug!(
            moved = moved.moved,
            delivered = report.delivered,
            pruned = report.pruned,
            "tick"
        );
        Ok(())
    }

    /// Spawn the periodic simulate-and-broadcast task
    pub fn spawn_update_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        // `interval` panics on a zero period; `new` does not validate settings
        let period = Duration::from_secs(state.settings.broadcast.interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; connections already got a snapshot
            interval.tick().await;

            loop {
                interval.tick().await;
                if let Err(e) = state.tick().await {
                    warn!(error = %e, "update tick failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_from_settings_seeds_demo_fleet() {
        let state = AppState::from_settings(Settings::default()).await.unwrap();
        assert_eq!(state.locations.len(), 3);
        assert_eq!(state.locations.get(1).unwrap().source, LocationSource::Seeded);
        assert_eq!(state.broadcaster.snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn test_from_settings_missing_fixture() {
        let mut settings = Settings::default();
        settings.directory.path = Some("/definitely/not/here.json".into());
        assert!(matches!(
            AppState::from_settings(settings).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_from_settings_rejects_invalid_settings() {
        let mut settings = Settings::default();
        settings.broadcast.interval_secs = 0;
        assert!(matches!(
            AppState::from_settings(settings).await,
            Err(AppError::Config(_))
        ));

        let mut settings = Settings::default();
        settings.simulation.min_speed_kmh = 25;
        settings.simulation.max_speed_kmh = 25;
        assert!(matches!(
            AppState::from_settings(settings).await,
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_loop_survives_unvalidated_settings() {
        let mut settings = Settings::default();
        settings.broadcast.interval_secs = 0;
        settings.simulation.min_speed_kmh = 30;
        settings.simulation.max_speed_kmh = 10;
        let directory = Arc::new(InMemoryDirectory::from_fixture(&FleetFixture::sample()));
        let auth = Arc::new(JwtValidator::new("secret"));
        let state = Arc::new(AppState::new(settings, directory, auth));
        state.seed(&FleetFixture::sample());

        let (tx, mut rx) = mpsc::channel(8);
        state.registry.register(tx);
        let handle = state.spawn_update_loop();

        time::sleep(Duration::from_millis(1500)).await;
        assert!(rx.recv().await.is_some());
        assert!(!handle.is_finished());
        assert_eq!(state.locations.get(1).unwrap().speed, Some(30.0));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_loop_pushes_every_interval() {
        let state = Arc::new(AppState::from_settings(Settings::default()).await.unwrap());
        let (tx, mut rx) = mpsc::channel(8);
        state.registry.register(tx);

        let handle = state.spawn_update_loop();

        // Nothing before the first full interval
        time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_secs(2)).await;
        assert!(rx.recv().await.is_some());

        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.recv().await.is_some());

        handle.abort();
    }
}
