// ============================
// fleet-backend-lib/src/directory.rs
// ============================
//! Vehicle / route / stop directory.
//!
//! The directory is owned by the surrounding CRUD application; this crate only
//! reads it. `InMemoryDirectory` is the shipped backend, populated from a JSON
//! fixture file or from the built-in demo fleet.
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fleet_common::VehicleId;
use serde::{Deserialize, Serialize};
use tokio::fs as tokio_fs;

use crate::error::AppError;

pub type RouteId = i64;
pub type StopId = i64;

/// A fleet vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    /// Human-facing label, e.g. `BUS-101`
    pub label: String,
    #[serde(default)]
    pub route_id: Option<RouteId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Membership of a stop in a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub route_id: RouteId,
    pub stop_id: StopId,
    pub order: u32,
    #[serde(default)]
    pub arrival_time: Option<String>,
}

/// A stop as seen along one route, already resolved and ordered
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedStop {
    pub label: String,
    pub order: u32,
    pub latitude: f64,
    pub longitude: f64,
}

/// Starting position for a vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedPosition {
    pub vehicle_id: VehicleId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
}

/// Read access to the fleet records
#[async_trait]
pub trait FleetDirectory: Send + Sync {
    async fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>, AppError>;

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, AppError>;

    async fn get_route(&self, id: RouteId) -> Result<Option<Route>, AppError>;

    /// Stops of a route sorted by their order; empty if the route has none
    async fn get_ordered_stops(&self, route_id: RouteId) -> Result<Vec<OrderedStop>, AppError>;
}

/// Serialized form of a whole fleet, as stored in a fixture file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetFixture {
    pub routes: Vec<Route>,
    pub stops: Vec<Stop>,
    pub route_stops: Vec<RouteStop>,
    pub vehicles: Vec<Vehicle>,
    pub positions: Vec<SeedPosition>,
}

impl FleetFixture {
    /// Read a fixture from a JSON file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::NotFound(format!(
                "fleet fixture {}",
                path.display()
            )));
        }

        let content = tokio_fs::read_to_string(path).await?;
        let fixture: FleetFixture = serde_json::from_str(&content)?;
        Ok(fixture)
    }

    /// Write the fixture as pretty JSON, creating parent directories
    pub async fn store<P: AsRef<Path>>(&self, path: P) -> Result<(), AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio_fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)?;
        tokio_fs::write(path, json).await?;
        Ok(())
    }

    /// The demo fleet: three campus routes, four stops, three buses
    pub fn sample() -> Self {
        let routes = vec![
            Route { id: 1, label: "Route 1 - City Center".to_string() },
            Route { id: 2, label: "Route 2 - North Campus".to_string() },
            Route { id: 3, label: "Route 3 - South Hills".to_string() },
        ];

        let stops = vec![
            Stop { id: 1, label: "College Main Gate".to_string(), latitude: 20.590, longitude: 78.960 },
            Stop { id: 2, label: "Central Library".to_string(), latitude: 20.595, longitude: 78.963 },
            Stop { id: 3, label: "North Campus".to_string(), latitude: 20.598, longitude: 78.968 },
            Stop { id: 4, label: "East Station".to_string(), latitude: 20.592, longitude: 78.972 },
        ];

        let route_stop = |route_id, stop_id, order, time: &str| RouteStop {
            route_id,
            stop_id,
            order,
            arrival_time: Some(time.to_string()),
        };
        let route_stops = vec![
            route_stop(1, 1, 1, "08:00:00"),
            route_stop(1, 2, 2, "08:15:00"),
            route_stop(2, 1, 1, "09:00:00"),
            route_stop(2, 3, 2, "09:20:00"),
            route_stop(3, 1, 1, "10:00:00"),
            route_stop(3, 4, 2, "10:25:00"),
        ];

        let vehicles = vec![
            Vehicle { id: 1, label: "BUS-101".to_string(), route_id: Some(1) },
            Vehicle { id: 2, label: "BUS-102".to_string(), route_id: Some(2) },
            Vehicle { id: 3, label: "BUS-103".to_string(), route_id: Some(3) },
        ];

        let positions = vec![
            SeedPosition { vehicle_id: 1, latitude: 20.593, longitude: 78.965, speed: Some(20.0) },
            SeedPosition { vehicle_id: 2, latitude: 20.598, longitude: 78.958, speed: Some(15.0) },
            SeedPosition { vehicle_id: 3, latitude: 20.588, longitude: 78.972, speed: Some(18.0) },
        ];

        Self { routes, stops, route_stops, vehicles, positions }
    }
}

/// Directory held entirely in memory
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    vehicles: Arc<DashMap<VehicleId, Vehicle>>,
    routes: Arc<DashMap<RouteId, Route>>,
    stops: Arc<DashMap<StopId, Stop>>,
    route_stops: Arc<DashMap<RouteId, Vec<RouteStop>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: &FleetFixture) -> Self {
        let directory = Self::new();
        for route in &fixture.routes {
            directory.insert_route(route.clone());
        }
        for stop in &fixture.stops {
            directory.insert_stop(stop.clone());
        }
        for route_stop in &fixture.route_stops {
            directory.add_route_stop(route_stop.clone());
        }
        for vehicle in &fixture.vehicles {
            directory.insert_vehicle(vehicle.clone());
        }
        directory
    }

    pub fn insert_vehicle(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id, vehicle);
    }

    pub fn remove_vehicle(&self, id: VehicleId) -> Option<Vehicle> {
        self.vehicles.remove(&id).map(|(_, vehicle)| vehicle)
    }

    pub fn insert_route(&self, route: Route) {
        self.routes.insert(route.id, route);
    }

    pub fn insert_stop(&self, stop: Stop) {
        self.stops.insert(stop.id, stop);
    }

    pub fn add_route_stop(&self, route_stop: RouteStop) {
        self.route_stops
            .entry(route_stop.route_id)
            .or_default()
            .push(route_stop);
    }
}

#[async_trait]
impl FleetDirectory for InMemoryDirectory {
    async fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>, AppError> {
        Ok(self.vehicles.get(&id).map(|v| v.value().clone()))
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, AppError> {
        let mut vehicles: Vec<Vehicle> = self.vehicles.iter().map(|v| v.value().clone()).collect();
        vehicles.sort_by_key(|v| v.id);
        Ok(vehicles)
    }

    async fn get_route(&self, id: RouteId) -> Result<Option<Route>, AppError> {
        Ok(self.routes.get(&id).map(|r| r.value().clone()))
    }

    async fn get_ordered_stops(&self, route_id: RouteId) -> Result<Vec<OrderedStop>, AppError> {
        let Some(members) = self.route_stops.get(&route_id).map(|m| m.value().clone()) else {
            return Ok(Vec::new());
        };

        // Memberships pointing at unknown stops are skipped
        let mut ordered: Vec<OrderedStop> = members
            .into_iter()
            .filter_map(|member| {
                let stop = self.stops.get(&member.stop_id)?;
                Some(OrderedStop {
                    label: stop.label.clone(),
                    order: member.order,
                    latitude: stop.latitude,
                    longitude: stop.longitude,
                })
            })
            .collect();
        ordered.sort_by_key(|s| s.order);
        Ok(ordered)
    }
}
