// ============================
// fleet-backend-lib/src/ws_router.rs
// ============================
//! HTTP router and WebSocket connection handling.
use std::sync::Arc;
use std::time::Duration;

use ::metrics::{counter, gauge};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fleet_common::{VehicleId, VehicleLocationView};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::metrics as keys;
use crate::protocol::ProtocolHandler;
use crate::AppState;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the full router: the WebSocket endpoint plus the read-only HTTP routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let ws_path = state.settings.ws_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/api/bus-locations", get(list_locations))
        .route("/api/bus-locations/{id}", get(get_location))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for WebSocket connections
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    counter!(keys::WS_CONNECTION).increment(1);
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn list_locations(State(state): State<Arc<AppState>>) -> Json<Vec<VehicleLocationView>> {
    Json(state.broadcaster.snapshot().await)
}

async fn get_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<VehicleId>,
) -> Result<Json<VehicleLocationView>, AppError> {
    state
        .broadcaster
        .snapshot()
        .await
        .into_iter()
        .find(|view| view.vehicle_id == id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("vehicle {id}")))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.len(),
        "vehicles": state.locations.len(),
    }))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound queue for this connection, drained by its own writer task
    let (client_tx, mut client_rx) = mpsc::channel::<Message>(state.settings.outbound_queue_capacity);

    // Ends once every sender is dropped, after flushing what is queued.
    // `close` also flushes the reply to a client-initiated close.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = client_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    gauge!(keys::WS_ACTIVE).increment(1.0);

    let registry = state.registry.clone();
    let mut handler = match ProtocolHandler::on_connect(state, client_tx).await {
        Ok(handler) => handler,
        Err(e) => {
            warn!(error = %e, "failed to set up connection");
            gauge!(keys::WS_ACTIVE).decrement(1.0);
            send_task.abort();
            return;
        },
    };
    let connection_id = handler.connection_id();
    let evicted = registry.eviction_signal(connection_id);

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = wait_evicted(evicted.as_deref()) => {
                warn!(connection_id = %connection_id, "connection evicted, closing");
                break;
            },
        };

        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(connection_id = %connection_id, error = %e, "websocket error");
                break;
            },
            None => break,
        };

        match message {
            Message::Text(text) => {
                if let Err(e) = handler.handle_text(text.as_str()).await {
                    debug!(connection_id = %connection_id, error = %e, "connection no longer writable");
                    break;
                }
            },
            Message::Close(_) => break,
            // axum answers pings itself; binary frames are not part of the protocol
            _ => {},
        }
    }

    handler.on_disconnect();
    // Last sender goes with the handler; the writer drains and closes
    drop(handler);

    if time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        debug!(connection_id = %connection_id, "writer did not drain in time");
        send_task.abort();
    }

    counter!(keys::WS_DISCONNECTION).increment(1);
    gauge!(keys::WS_ACTIVE).decrement(1.0);
}

/// Resolves when the registry evicts the connection; never if it was already gone
async fn wait_evicted(signal: Option<&Notify>) {
    match signal {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
