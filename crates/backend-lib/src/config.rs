// ============================
// fleet-backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Settings are layered with `figment`: compiled-in defaults, then an optional
//! TOML file, then `FLEET_*` environment variables (nested keys use `__`, e.g.
//! `FLEET_SIMULATION__ENABLED=false`).
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use fleet_common::VehicleId;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FLEET_";

/// Development secret; the binary warns when it is still in use.
pub const DEV_JWT_SECRET: &str = "access_secret_key";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Path of the WebSocket endpoint
    pub ws_path: String,
    /// Frames that may queue for one connection before it starts skipping broadcasts
    pub outbound_queue_capacity: usize,
    pub auth: AuthSettings,
    pub directory: DirectorySettings,
    pub broadcast: BroadcastSettings,
    pub simulation: SimulationSettings,
    pub protocol: ProtocolSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HMAC secret used to verify HS256 access tokens
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// JSON fixture with vehicles, routes and stops; the built-in demo fleet when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Seconds between periodic snapshot pushes
    pub interval_secs: u64,
    /// Speed assumed for ETA estimates when a vehicle reports none
    pub default_speed_kmh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Run the random-walk fallback on every tick
    pub enabled: bool,
    /// Total span of the per-axis jitter in degrees (centered on zero)
    pub max_delta_degrees: f64,
    /// Inclusive lower bound of simulated speeds (km/h)
    pub min_speed_kmh: u32,
    /// Exclusive upper bound of simulated speeds (km/h)
    pub max_speed_kmh: u32,
    /// A real report younger than this suppresses simulation for that vehicle
    pub fresh_report_window_secs: u64,
    /// Vehicles the simulator must never move
    pub disabled_vehicles: Vec<VehicleId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Reject position reports from connections that never completed `auth`
    pub require_auth_for_updates: bool,
    /// Reply `update_rejected` instead of dropping rejected reports silently
    pub explicit_update_rejections: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            ws_path: "/ws".to_string(),
            outbound_queue_capacity: 32,
            auth: AuthSettings::default(),
            directory: DirectorySettings::default(),
            broadcast: BroadcastSettings::default(),
            simulation: SimulationSettings::default(),
            protocol: ProtocolSettings::default(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            default_speed_kmh: 20.0,
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_delta_degrees: 0.0005,
            min_speed_kmh: 15,
            max_speed_kmh: 25,
            fresh_report_window_secs: 30,
            disabled_vehicles: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from `config.toml` in the working directory plus the environment
    pub fn load() -> Result<Self, AppError> {
        Self::load_from("config.toml")
    }

    /// Load settings from a specific TOML file plus the environment.
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<(), AppError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "log_level must be one of {VALID_LOG_LEVELS:?}, got {}",
                self.log_level
            )));
        }

        if !self.ws_path.starts_with('/') {
            return Err(AppError::Config("ws_path must start with '/'".to_string()));
        }

        if self.outbound_queue_capacity == 0 {
            return Err(AppError::Config(
                "outbound_queue_capacity must be greater than zero".to_string(),
            ));
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(AppError::Config("auth.jwt_secret must not be empty".to_string()));
        }

        if self.broadcast.interval_secs == 0 {
            return Err(AppError::Config(
                "broadcast.interval_secs must be greater than zero".to_string(),
            ));
        }

        if !self.broadcast.default_speed_kmh.is_finite() || self.broadcast.default_speed_kmh <= 0.0 {
            return Err(AppError::Config(
                "broadcast.default_speed_kmh must be a positive number".to_string(),
            ));
        }

        let sim = &self.simulation;
        if !sim.max_delta_degrees.is_finite() || !(0.0..1.0).contains(&sim.max_delta_degrees) {
            return Err(AppError::Config(
                "simulation.max_delta_degrees must be in [0, 1)".to_string(),
            ));
        }

        if sim.min_speed_kmh >= sim.max_speed_kmh {
            return Err(AppError::Config(format!(
                "simulation.min_speed_kmh ({}) must be below max_speed_kmh ({})",
                sim.min_speed_kmh, sim.max_speed_kmh
            )));
        }

        Ok(())
    }
}
