// ==================
// crates/backend-lib/src/protocol.rs
// ==================
//! Per-connection protocol handling.
//!
//! One `ProtocolHandler` lives for the lifetime of one WebSocket. It owns the
//! connection's auth state and turns inbound frames into store mutations,
//! replies and broadcasts:
//!
//! - `auth` validates the token and answers `auth_result`. A failed attempt
//!   keeps the connection open.
//! - `request_bus_locations` answers with one snapshot, in any state.
//! - `update_bus_location` re-validates its own token, checks the role and
//!   the coordinates, stores the position and pushes a fresh snapshot to
//!   every connection. Rejections are silent unless
//!   `protocol.explicit_update_rejections` is set.
//!
//! Unparsable frames and unknown message types are logged and dropped.
use std::sync::Arc;

use ::metrics::counter;
use axum::extract::ws::Message;
use fleet_common::{ClientToServer, ServerToClient, VehicleId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::Principal;
use crate::error::AppError;
use crate::location_store::LocationSource;
use crate::metrics as keys;
use crate::registry::ConnectionId;
use crate::validation;
use crate::AppState;

const INVALID_TOKEN_MESSAGE: &str = "Invalid authentication token";

/// Authentication state of one connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated(Principal),
}

pub struct ProtocolHandler {
    state: Arc<AppState>,
    connection_id: ConnectionId,
    tx: mpsc::Sender<Message>,
    conn_state: ConnectionState,
}

impl ProtocolHandler {
    /// Register a freshly accepted connection and send it the current snapshot
    pub async fn on_connect(state: Arc<AppState>, tx: mpsc::Sender<Message>) -> Result<Self, AppError> {
        let connection_id = state.registry.register(tx.clone());
        info!(connection_id = %connection_id, "client connected");

        let handler = Self {
            state,
            connection_id,
            tx,
            conn_state: ConnectionState::Unauthenticated,
        };
        handler.state.broadcaster.send_to(connection_id).await?;
        Ok(handler)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.conn_state
    }

    /// Handle one text frame. Errors mean the connection can no longer be served.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), AppError> {
        match serde_json::from_str::<ClientToServer>(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "ignoring malformed message");
                counter!(keys::WS_MALFORMED).increment(1);
                Ok(())
            },
        }
    }

    pub async fn handle_message(&mut self, message: ClientToServer) -> Result<(), AppError> {
        match message {
            ClientToServer::Auth { token } => self.handle_auth(&token).await,
            ClientToServer::RequestBusLocations => {
                if !self.state.broadcaster.send_to(self.connection_id).await? {
                    return Err(AppError::Internal("connection closed".to_string()));
                }
                Ok(())
            },
            ClientToServer::UpdateBusLocation {
                token,
                bus_id,
                latitude,
                longitude,
                speed,
            } => self.handle_update(&token, bus_id, latitude, longitude, speed).await,
        }
    }

    async fn authenticate(&self, token: &str) -> Result<Principal, AppError> {
        validation::validate_token_shape(token)?;
        self.state
            .auth
            .validate(token)
            .await
            .ok_or_else(|| AppError::Auth(INVALID_TOKEN_MESSAGE.to_string()))
    }

    async fn handle_auth(&mut self, token: &str) -> Result<(), AppError> {
        let principal = match self.authenticate(token).await {
            Ok(principal) => principal,
            Err(e) => {
                // A failed retry leaves an earlier successful handshake in place
                info!(connection_id = %self.connection_id, code = e.error_code(), error = %e, "authentication failed");
                counter!(keys::AUTH_REJECTED).increment(1);
                return self.reply(&ServerToClient::auth_denied(INVALID_TOKEN_MESSAGE)).await;
            },
        };

        info!(
            connection_id = %self.connection_id,
            username = %principal.identity,
            role = %principal.role,
            "client authenticated"
        );
        counter!(keys::AUTH_ACCEPTED).increment(1);

        self.state
            .registry
            .set_principal(self.connection_id, Some(principal.clone()));
        let reply = ServerToClient::auth_accepted(principal.identity.clone(), principal.role.as_str());
        self.conn_state = ConnectionState::Authenticated(principal);
        self.reply(&reply).await
    }

    async fn handle_update(
        &mut self,
        token: &str,
        bus_id: VehicleId,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
    ) -> Result<(), AppError> {
        let principal = match self.check_update(token, bus_id, latitude, longitude, speed).await {
            Ok(principal) => principal,
            Err(e) => return self.reject(bus_id, &e).await,
        };

        self.state
            .locations
            .set(bus_id, latitude, longitude, speed, LocationSource::Reported);
        counter!(keys::UPDATE_ACCEPTED).increment(1);
        debug!(
            connection_id = %self.connection_id,
            vehicle_id = bus_id,
            reporter = %principal.identity,
            latitude,
            longitude,
            "position reported"
        );

        let report = self.state.broadcaster.broadcast_all().await?;
        debug!(
            delivered = report.delivered,
            pruned = report.pruned,
            "update broadcast"
        );
        Ok(())
    }

    /// Everything a report must pass before it may touch the store
    async fn check_update(
        &self,
        token: &str,
        bus_id: VehicleId,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
    ) -> Result<Principal, AppError> {
        if self.state.settings.protocol.require_auth_for_updates
            && self.conn_state == ConnectionState::Unauthenticated
        {
            return Err(AppError::Auth("connection is not authenticated".to_string()));
        }

        let principal = self.authenticate(token).await?;
        if !principal.can_report_positions() {
            return Err(AppError::Auth(format!(
                "role '{}' may not report positions",
                principal.role
            )));
        }

        validation::validate_position(latitude, longitude, speed)?;

        // Only vehicles the directory knows may occupy the store
        if self.state.directory.get_vehicle(bus_id).await?.is_none() {
            return Err(AppError::NotFound(format!("vehicle {bus_id}")));
        }

        Ok(principal)
    }

    async fn reject(&self, bus_id: VehicleId, error: &AppError) -> Result<(), AppError> {
        info!(
            connection_id = %self.connection_id,
            vehicle_id = bus_id,
            code = error.error_code(),
            reason = %error,
            "position report rejected"
        );
        counter!(keys::UPDATE_REJECTED).increment(1);

        if self.state.settings.protocol.explicit_update_rejections {
            let reply = ServerToClient::UpdateRejected {
                bus_id,
                reason: error.to_string(),
            };
            return self.reply(&reply).await;
        }
        Ok(())
    }

    async fn reply(&self, message: &ServerToClient) -> Result<(), AppError> {
        let json = serde_json::to_string(message)?;
        self.tx.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Drop the connection from the registry; safe to call more than once
    pub fn on_disconnect(&self) {
        match self.state.registry.unregister(self.connection_id) {
            Some(entry) => info!(
                connection_id = %self.connection_id,
                connected_secs = entry.age_secs(),
                "client disconnected"
            ),
            // already evicted by a failed broadcast
            None => info!(connection_id = %self.connection_id, "client disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtValidator, Role};
    use crate::config::Settings;
    use crate::directory::{FleetFixture, InMemoryDirectory};
    use fleet_common::VehicleLocationView;
    use std::time::Duration;

    const SECRET: &str = "protocol-test-secret";

    fn state_with(settings: Settings) -> Arc<AppState> {
        let directory = Arc::new(InMemoryDirectory::from_fixture(&FleetFixture::sample()));
        let auth = Arc::new(JwtValidator::new(SECRET));
        let state = AppState::new(settings, directory, auth);
        state.locations.set(1, 10.0, 20.0, None, LocationSource::Seeded);
        Arc::new(state)
    }

    fn token(role: &str) -> String {
        JwtValidator::new(SECRET)
            .issue(1, "tester", role, Duration::from_secs(600))
            .unwrap()
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Message>) -> ServerToClient {
        let Some(Message::Text(text)) = rx.recv().await else {
            panic!("expected a text frame");
        };
        serde_json::from_str(text.as_str()).unwrap()
    }

    fn locations(frame: ServerToClient) -> Vec<VehicleLocationView> {
        match frame {
            ServerToClient::BusLocations { data } => data,
            other => panic!("expected bus_locations, got {other:?}"),
        }
    }

    async fn connect(state: &Arc<AppState>) -> (ProtocolHandler, mpsc::Receiver<Message>) {
        let (tx, mut rx) = mpsc::channel(16);
        let handler = ProtocolHandler::on_connect(state.clone(), tx).await.unwrap();
        // initial snapshot
        let initial = locations(next_frame(&mut rx).await);
        assert_eq!(initial.len(), 1);
        (handler, rx)
    }

    #[tokio::test]
    async fn test_connect_registers_and_sends_snapshot() {
        let state = state_with(Settings::default());
        let (handler, _rx) = connect(&state).await;
        assert!(state.registry.contains(handler.connection_id()));
        assert_eq!(handler.connection_state(), &ConnectionState::Unauthenticated);

        handler.on_disconnect();
        handler.on_disconnect();
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_auth_success_and_failure() {
        let state = state_with(Settings::default());
        let (mut handler, mut rx) = connect(&state).await;

        handler.handle_text(r#"{"type":"auth","token":"bogus"}"#).await.unwrap();
        assert_eq!(
            next_frame(&mut rx).await,
            ServerToClient::auth_denied("Invalid authentication token")
        );
        assert_eq!(handler.connection_state(), &ConnectionState::Unauthenticated);

        let message = ClientToServer::Auth { token: token("driver") };
        handler.handle_message(message).await.unwrap();
        assert_eq!(next_frame(&mut rx).await, ServerToClient::auth_accepted("tester", "driver"));
        assert_eq!(
            handler.connection_state(),
            &ConnectionState::Authenticated(Principal::new("tester", Role::Driver))
        );
        assert_eq!(
            state.registry.principal(handler.connection_id()).map(|p| p.role),
            Some(Role::Driver)
        );
    }

    #[tokio::test]
    async fn test_request_after_failed_auth() {
        let state = state_with(Settings::default());
        let (mut handler, mut rx) = connect(&state).await;

        handler.handle_text(r#"{"type":"auth","token":""}"#).await.unwrap();
        next_frame(&mut rx).await;

        handler.handle_text(r#"{"type":"request_bus_locations"}"#).await.unwrap();
        let views = locations(next_frame(&mut rx).await);
        assert_eq!(views[0].vehicle_label, "BUS-101");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_ignored() {
        let state = state_with(Settings::default());
        let (mut handler, mut rx) = connect(&state).await;

        handler.handle_text("not json").await.unwrap();
        handler.handle_text(r#"{"type":"teleport"}"#).await.unwrap();
        handler.handle_text(r#"{"type":"update_bus_location","busId":1}"#).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(state.registry.contains(handler.connection_id()));
    }

    #[tokio::test]
    async fn test_valid_update_is_stored_and_broadcast() {
        let state = state_with(Settings::default());
        let (mut reporter, mut reporter_rx) = connect(&state).await;
        let (_viewer, mut viewer_rx) = connect(&state).await;

        let update = ClientToServer::UpdateBusLocation {
            token: token("driver"),
            bus_id: 1,
            latitude: 10.001,
            longitude: 20.001,
            speed: Some(22.0),
        };
        reporter.handle_message(update).await.unwrap();

        let stored = state.locations.get(1).unwrap();
        assert_eq!(stored.source, LocationSource::Reported);
        assert_eq!(stored.speed, Some(22.0));

        for rx in [&mut reporter_rx, &mut viewer_rx] {
            let views = locations(next_frame(rx).await);
            assert_eq!((views[0].latitude, views[0].longitude), (10.001, 20.001));
        }
    }

    #[tokio::test]
    async fn test_rejected_updates_are_silent_by_default() {
        let state = state_with(Settings::default());
        let (mut handler, mut rx) = connect(&state).await;

        let viewer = ClientToServer::UpdateBusLocation {
            token: token("student"),
            bus_id: 1,
            latitude: 11.0,
            longitude: 21.0,
            speed: None,
        };
        handler.handle_message(viewer).await.unwrap();

        let bad_token = ClientToServer::UpdateBusLocation {
            token: "nope".to_string(),
            bus_id: 1,
            latitude: 11.0,
            longitude: 21.0,
            speed: None,
        };
        handler.handle_message(bad_token).await.unwrap();

        let out_of_range = ClientToServer::UpdateBusLocation {
            token: token("admin"),
            bus_id: 1,
            latitude: 123.0,
            longitude: 21.0,
            speed: None,
        };
        handler.handle_message(out_of_range).await.unwrap();

        assert!(rx.try_recv().is_err());
        let stored = state.locations.get(1).unwrap();
        assert_eq!((stored.latitude, stored.longitude), (10.0, 20.0));
    }

    #[tokio::test]
    async fn test_unknown_vehicle_reports_are_rejected() {
        let mut settings = Settings::default();
        settings.protocol.explicit_update_rejections = true;
        let state = state_with(settings);
        let (mut handler, mut rx) = connect(&state).await;
        let driver = token("driver");

        for bus_id in 1000..1020 {
            let update = ClientToServer::UpdateBusLocation {
                token: driver.clone(),
                bus_id,
                latitude: 11.0,
                longitude: 21.0,
                speed: None,
            };
            handler.handle_message(update).await.unwrap();
            match next_frame(&mut rx).await {
                ServerToClient::UpdateRejected { bus_id: rejected, reason } => {
                    assert_eq!(rejected, bus_id);
                    assert!(reason.contains("Not found"), "{reason}");
                },
                other => panic!("expected update_rejected, got {other:?}"),
            }
        }

        assert_eq!(state.locations.len(), 1);
        assert!(state.locations.get(1000).is_none());
    }

    #[tokio::test]
    async fn test_rejection_reasons_carry_error_kind() {
        let mut settings = Settings::default();
        settings.protocol.explicit_update_rejections = true;
        let state = state_with(settings);
        let (mut handler, mut rx) = connect(&state).await;

        let cases = [
            ("not-a-jwt".to_string(), 10.0, "Authentication error"),
            (String::new(), 10.0, "Invalid input: Invalid token"),
            (token("student"), 10.0, "may not report positions"),
            (token("admin"), 95.0, "Invalid input: Invalid latitude"),
        ];
        for (token, latitude, expected) in cases {
            let update = ClientToServer::UpdateBusLocation {
                token,
                bus_id: 1,
                latitude,
                longitude: 20.0,
                speed: None,
            };
            handler.handle_message(update).await.unwrap();
            match next_frame(&mut rx).await {
                ServerToClient::UpdateRejected { reason, .. } => {
                    assert!(reason.contains(expected), "{reason} should mention {expected}");
                },
                other => panic!("expected update_rejected, got {other:?}"),
            }
        }
        assert_eq!(state.locations.get(1).unwrap().latitude, 10.0);
    }

    #[tokio::test]
    async fn test_explicit_rejections_and_required_auth() {
        let mut settings = Settings::default();
        settings.protocol.explicit_update_rejections = true;
        settings.protocol.require_auth_for_updates = true;
        let state = state_with(settings);
        let (mut handler, mut rx) = connect(&state).await;

        let update = ClientToServer::UpdateBusLocation {
            token: token("driver"),
            bus_id: 1,
            latitude: 11.0,
            longitude: 21.0,
            speed: None,
        };
        handler.handle_message(update.clone()).await.unwrap();
        match next_frame(&mut rx).await {
            ServerToClient::UpdateRejected { bus_id, reason } => {
                assert_eq!(bus_id, 1);
                assert!(reason.contains("not authenticated"));
            },
            other => panic!("expected update_rejected, got {other:?}"),
        }
        assert_eq!(state.locations.get(1).unwrap().latitude, 10.0);

        handler
            .handle_message(ClientToServer::Auth { token: token("driver") })
            .await
            .unwrap();
        next_frame(&mut rx).await;

        handler.handle_message(update).await.unwrap();
        let views = locations(next_frame(&mut rx).await);
        assert_eq!(views[0].latitude, 11.0);
    }

    #[tokio::test]
    async fn test_reply_to_closed_connection_is_an_error() {
        let state = state_with(Settings::default());
        let (mut handler, rx) = connect(&state).await;
        drop(rx);

        let result = handler.handle_text(r#"{"type":"request_bus_locations"}"#).await;
        assert!(result.is_err());
        assert!(!state.registry.contains(handler.connection_id()));
    }
}
