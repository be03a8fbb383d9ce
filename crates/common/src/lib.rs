// ================
// common/src/lib.rs
// ================
//! Wire protocol shared by the fleet tracking server and its clients.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Field names
//! on the wire are camelCase (`busId`, `busNumber`, ...) so existing browser
//! clients keep working unchanged.

use serde::{Deserialize, Serialize};

/// Identifier of a fleet vehicle (bus).
pub type VehicleId = i64;

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    /// Authentication handshake
    /// # Fields
    /// * `token` - Bearer credential issued by the main application
    Auth { token: String },
    /// Ask for the current snapshot of every vehicle
    RequestBusLocations,
    /// Report a real position for a vehicle
    /// # Fields
    /// * `token` - Credential, re-validated on every report
    /// * `bus_id` - Vehicle the position belongs to
    /// * `latitude` / `longitude` - WGS84 degrees
    /// * `speed` - Speed in km/h, if known
    UpdateBusLocation {
        token: String,
        #[serde(rename = "busId")]
        bus_id: VehicleId,
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        speed: Option<f64>,
    },
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    /// Outcome of an `auth` handshake
    AuthResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Full snapshot of every visible vehicle
    BusLocations { data: Vec<VehicleLocationView> },
    /// Explicit rejection of a position report (only sent when enabled server-side)
    UpdateRejected {
        #[serde(rename = "busId")]
        bus_id: VehicleId,
        reason: String,
    },
}

impl ServerToClient {
    /// Successful handshake reply.
    pub fn auth_accepted(username: impl Into<String>, role: impl Into<String>) -> Self {
        ServerToClient::AuthResult {
            success: true,
            username: Some(username.into()),
            role: Some(role.into()),
            message: None,
        }
    }

    /// Failed handshake reply.
    pub fn auth_denied(message: impl Into<String>) -> Self {
        ServerToClient::AuthResult {
            success: false,
            username: None,
            role: None,
            message: Some(message.into()),
        }
    }
}

/// Broadcast-ready view of one vehicle, joined with its route metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VehicleLocationView {
    #[serde(rename = "busId")]
    pub vehicle_id: VehicleId,
    #[serde(rename = "busNumber")]
    pub vehicle_label: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "routeName", default, skip_serializing_if = "Option::is_none")]
    pub route_label: Option<String>,
    #[serde(rename = "nextStop", default, skip_serializing_if = "Option::is_none")]
    pub next_stop_label: Option<String>,
    #[serde(rename = "eta", default, skip_serializing_if = "Option::is_none")]
    pub eta_text: Option<String>,
}
