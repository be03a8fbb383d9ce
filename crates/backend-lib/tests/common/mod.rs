//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fleet_backend_lib::{
    auth::JwtValidator,
    client::{endpoint_url, TrackingSession},
    config::Settings,
    directory::{FleetFixture, InMemoryDirectory},
    ws_router, AppState,
};
use fleet_common::ServerToClient;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SECRET: &str = "integration-secret";
pub const WAIT: Duration = Duration::from_secs(5);

/// App state over the demo directory with an empty location store
pub fn test_state(settings: Settings) -> Arc<AppState> {
    let directory = Arc::new(InMemoryDirectory::from_fixture(&FleetFixture::sample()));
    let auth = Arc::new(JwtValidator::new(SECRET));
    Arc::new(AppState::new(settings, directory, auth))
}

pub fn token(role: &str) -> String {
    JwtValidator::new(SECRET)
        .issue(42, "it-user", role, Duration::from_secs(600))
        .unwrap()
}

/// Serve the router on an ephemeral port; returns the WebSocket URL
pub async fn spawn_server(state: Arc<AppState>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = endpoint_url(&addr.to_string(), false, &state.settings.ws_path);
    let app = ws_router::create_router(state);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, handle)
}

pub async fn connected_session(url: &str) -> TrackingSession {
    let mut session = TrackingSession::new(url);
    session.connect().await.unwrap();
    session
}

pub async fn next_event(session: &mut TrackingSession) -> ServerToClient {
    tokio::time::timeout(WAIT, session.next_event())
        .await
        .expect("timed out waiting for a server message")
        .unwrap()
        .expect("server closed the connection")
}

/// True if nothing arrives within a short grace period
pub async fn stays_quiet(session: &mut TrackingSession) -> bool {
    tokio::time::timeout(Duration::from_millis(300), session.next_event())
        .await
        .is_err()
}
