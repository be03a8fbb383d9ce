// ============================
// fleet-backend-lib/src/broadcaster.rs
// ============================
//! Snapshot building and fan-out.
//!
//! A snapshot joins every known location with the directory. Vehicles the
//! directory does not know are dropped; missing route or stop data only
//! leaves the affected fields out.
use std::sync::Arc;

use ::metrics::counter;
use axum::extract::ws::{Message, Utf8Bytes};
use fleet_common::{ServerToClient, VehicleLocationView};
use tracing::{debug, warn};

use crate::directory::FleetDirectory;
use crate::error::AppError;
use crate::eta;
use crate::location_store::{LocationStore, VehicleLocation};
use crate::metrics as keys;
use crate::registry::{ConnectionId, ConnectionRegistry, SendOutcome};

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Connections removed because the frame could not be queued
    pub pruned: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    locations: LocationStore,
    directory: Arc<dyn FleetDirectory>,
    registry: ConnectionRegistry,
    default_speed_kmh: f64,
}

impl Broadcaster {
    pub fn new(
        locations: LocationStore,
        directory: Arc<dyn FleetDirectory>,
        registry: ConnectionRegistry,
        default_speed_kmh: f64,
    ) -> Self {
        Self {
            locations,
            directory,
            registry,
            default_speed_kmh,
        }
    }

    /// Current view of every vehicle with both a location and a directory record
    pub async fn snapshot(&self) -> Vec<VehicleLocationView> {
        let mut locations = self.locations.list();
        locations.sort_by_key(|l| l.vehicle_id);

        let mut views = Vec::with_capacity(locations.len());
        for location in &locations {
            if let Some(view) = self.view_for(location).await {
                views.push(view);
            }
        }
        views
    }

    async fn view_for(&self, location: &VehicleLocation) -> Option<VehicleLocationView> {
        let vehicle = match self.directory.get_vehicle(location.vehicle_id).await {
            Ok(Some(vehicle)) => vehicle,
            Ok(None) => return None,
            Err(e) => {
                warn!(vehicle_id = location.vehicle_id, error = %e, "vehicle lookup failed");
                return None;
            },
        };

        let mut view = VehicleLocationView {
            vehicle_id: vehicle.id,
            vehicle_label: vehicle.label,
            latitude: location.latitude,
            longitude: location.longitude,
            route_label: None,
            next_stop_label: None,
            eta_text: None,
        };

        let Some(route_id) = vehicle.route_id else {
            return Some(view);
        };

        match self.directory.get_route(route_id).await {
            Ok(route) => view.route_label = route.map(|r| r.label),
            Err(e) => warn!(route_id, error = %e, "route lookup failed"),
        }

        match self.directory.get_ordered_stops(route_id).await {
            Ok(stops) => {
                if let Some(next) = stops.into_iter().next() {
                    let distance = eta::haversine_km(
                        (location.latitude, location.longitude),
                        (next.latitude, next.longitude),
                    );
                    let minutes = eta::estimate_minutes(distance, location.speed, self.default_speed_kmh);
                    view.next_stop_label = Some(next.label);
                    view.eta_text = Some(eta::format_eta(minutes));
                }
            },
            Err(e) => warn!(route_id, error = %e, "stop lookup failed"),
        }

        Some(view)
    }

    /// Snapshot serialized as a `bus_locations` frame
    pub async fn encoded_snapshot(&self) -> Result<Utf8Bytes, AppError> {
        let frame = ServerToClient::BusLocations {
            data: self.snapshot().await,
        };
        Ok(serde_json::to_string(&frame)?.into())
    }

    /// Queue one snapshot for every registered connection without blocking.
    ///
    /// A connection whose queue is full or closed is unregistered, so every
    /// connection still registered afterwards has the frame queued.
    pub async fn broadcast_all(&self) -> Result<BroadcastReport, AppError> {
        let payload = self.encoded_snapshot().await?;
        let mut report = BroadcastReport::default();

        self.registry.for_each(|id, entry| {
            match self.registry.try_send(id, Message::Text(payload.clone())) {
                SendOutcome::Queued => report.delivered += 1,
                SendOutcome::Full => {
                    warn!(connection_id = %id, age_secs = entry.age_secs(), "outbound queue full, slow connection evicted");
                    counter!(keys::BROADCAST_PRUNED, "reason" => "slow").increment(1);
                    report.pruned += 1;
                },
                SendOutcome::Closed => {
                    debug!(connection_id = %id, "connection closed, pruned");
                    counter!(keys::BROADCAST_PRUNED, "reason" => "closed").increment(1);
                    report.pruned += 1;
                },
                // Removed between the copy and the send
                SendOutcome::Unknown => {},
            }
        });

        counter!(keys::BROADCAST_SENT).increment(report.delivered as u64);
        Ok(report)
    }

    /// Queue one snapshot for a single connection, waiting for queue space.
    /// Returns false if the connection is unknown or gone.
    pub async fn send_to(&self, id: ConnectionId) -> Result<bool, AppError> {
        let Some(tx) = self.registry.sender(id) else {
            return Ok(false);
        };

        let payload = self.encoded_snapshot().await?;
        if tx.send(Message::Text(payload)).await.is_err() {
            self.registry.unregister(id);
            return Ok(false);
        }
        Ok(true)
    }
}
