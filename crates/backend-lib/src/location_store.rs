//! Latest-known position per vehicle.
//!
//! One record per vehicle id, replaced wholesale on every write, so readers
//! never observe a half-updated record. Writers for different vehicles land on
//! independent shards of the map and do not contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_common::VehicleId;
use serde::{Deserialize, Serialize};

/// Where a position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    /// Loaded from the fleet fixture at startup
    Seeded,
    /// Pushed by an authorized reporter over the wire
    Reported,
    /// Produced by the fallback random walk
    Simulated,
}

/// Latest position of one vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLocation {
    pub vehicle_id: VehicleId,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub source: LocationSource,
}

/// Concurrent map of vehicle id to its latest location
#[derive(Clone, Default)]
pub struct LocationStore {
    locations: Arc<DashMap<VehicleId, VehicleLocation>>,
}

impl LocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the position of a vehicle, stamping it with the current time
    pub fn set(
        &self,
        vehicle_id: VehicleId,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
        source: LocationSource,
    ) -> VehicleLocation {
        let location = VehicleLocation {
            vehicle_id,
            latitude,
            longitude,
            speed,
            observed_at: Utc::now(),
            source,
        };
        self.locations.insert(vehicle_id, location.clone());
        location
    }

    pub fn get(&self, vehicle_id: VehicleId) -> Option<VehicleLocation> {
        self.locations.get(&vehicle_id).map(|entry| entry.value().clone())
    }

    /// Every current location, in no particular order
    pub fn list(&self) -> Vec<VehicleLocation> {
        self.locations
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
