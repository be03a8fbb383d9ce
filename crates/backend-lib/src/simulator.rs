// ============================
// fleet-backend-lib/src/simulator.rs
// ============================
//! Fallback random walk for vehicles that are not reporting.
use std::sync::Arc;

use ::metrics::counter;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use tracing::{debug, warn};

use crate::config::SimulationSettings;
use crate::directory::FleetDirectory;
use crate::location_store::{LocationSource, LocationStore, VehicleLocation};
use crate::metrics as keys;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub moved: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Simulator {
    locations: LocationStore,
    directory: Arc<dyn FleetDirectory>,
    settings: SimulationSettings,
}

impl Simulator {
    pub fn new(
        locations: LocationStore,
        directory: Arc<dyn FleetDirectory>,
        settings: SimulationSettings,
    ) -> Self {
        Self {
            locations,
            directory,
            settings,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Nudge every eligible vehicle once.
    ///
    /// Only vehicles that are in the directory and already have a location
    /// move; nothing is invented.
    pub async fn step(&self) -> SimulationReport {
        let mut report = SimulationReport::default();
        if !self.settings.enabled {
            return report;
        }

        let vehicles = match self.directory.list_vehicles().await {
            Ok(vehicles) => vehicles,
            Err(e) => {
                warn!(error = %e, "vehicle listing failed, simulation step skipped");
                return report;
            },
        };

        for vehicle in vehicles {
            let Some(current) = self.locations.get(vehicle.id) else {
                continue;
            };

            if !self.should_move(&current) {
                report.skipped += 1;
                continue;
            }

            let (latitude, longitude, speed) = jitter(&current, &self.settings);
            self.locations
                .set(vehicle.id, latitude, longitude, Some(speed), LocationSource::Simulated);
            report.moved += 1;
        }

        counter!(keys::SIMULATION_MOVED).increment(report.moved as u64);
        debug!(moved = report.moved, skipped = report.skipped, "simulation step");
        report
    }

    fn should_move(&self, current: &VehicleLocation) -> bool {
        if self.settings.disabled_vehicles.contains(&current.vehicle_id) {
            return false;
        }

        if current.source == LocationSource::Reported {
            let window = i64::try_from(self.settings.fresh_report_window_secs).unwrap_or(i64::MAX);
            let age = Utc::now().signed_duration_since(current.observed_at);
            if age < ChronoDuration::seconds(window) {
                return false;
            }
        }

        true
    }
}

/// Random step around `current` plus a fresh whole-number speed
fn jitter(current: &VehicleLocation, settings: &SimulationSettings) -> (f64, f64, f64) {
    let mut rng = rand::rng();
    let span = settings.max_delta_degrees;
    let latitude = current.latitude + (rng.random::<f64>() - 0.5) * span;
    let longitude = current.longitude + (rng.random::<f64>() - 0.5) * span;
    // `random_range` panics on an empty range
    let speed = if settings.min_speed_kmh < settings.max_speed_kmh {
        rng.random_range(settings.min_speed_kmh..settings.max_speed_kmh)
    } else {
        settings.min_speed_kmh
    };
    (latitude.clamp(-90.0, 90.0), longitude.clamp(-180.0, 180.0), f64::from(speed))
}
