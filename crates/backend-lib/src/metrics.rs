// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_MALFORMED: &str = "ws.malformed";
pub const AUTH_ACCEPTED: &str = "auth.accepted";
pub const AUTH_REJECTED: &str = "auth.rejected";
pub const UPDATE_ACCEPTED: &str = "update.accepted";
pub const UPDATE_REJECTED: &str = "update.rejected";
pub const BROADCAST_SENT: &str = "broadcast.sent";
pub const BROADCAST_PRUNED: &str = "broadcast.pruned";
pub const SIMULATION_MOVED: &str = "simulation.moved";
