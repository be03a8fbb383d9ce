// ============================
// fleet-backend-lib/src/client.rs
// ============================
//! Client side of the tracking protocol.
//!
//! A `TrackingSession` is created explicitly, connected and disconnected
//! explicitly, and can be held by as many components as need one. Dropped
//! connections are retried with exponential backoff through
//! [`TrackingSession::connect_with_retry`].
use std::time::Duration;

use fleet_common::{ClientToServer, ServerToClient, VehicleId};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// WebSocket URL for a host, e.g. `ws://localhost:3000/ws`
pub fn endpoint_url(host: &str, secure: bool, path: &str) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{host}{path}")
}

/// Exponential reconnect backoff, capped
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

pub struct TrackingSession {
    url: String,
    policy: ReconnectPolicy,
    stream: Option<WsStream>,
}

impl TrackingSession {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_policy(url, ReconnectPolicy::default())
    }

    pub fn with_policy(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            stream: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection once. Replaces any existing connection.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "tracking session connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Connect, backing off between failed attempts per the session's policy
    pub async fn connect_with_retry(&mut self) -> Result<(), ClientError> {
        let mut attempt: u32 = 0;
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if self.policy.max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(ClientError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.policy.delay(attempt - 1);
                    warn!(url = %self.url, attempt, delay_ms = delay.as_millis() as u64, error = %e, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// Close the connection if open, waiting for the server to acknowledge
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        if let Some(mut stream) = self.stream.take() {
            stream.close(None).await?;
            // frames already in flight are dropped
            while let Some(frame) = stream.next().await {
                if let Message::Close(_) = frame? {
                    break;
                }
            }
            info!(url = %self.url, "tracking session disconnected");
        }
        Ok(())
    }

    pub async fn authenticate(&mut self, token: &str) -> Result<(), ClientError> {
        self.send(&ClientToServer::Auth {
            token: token.to_string(),
        })
        .await
    }

    pub async fn request_locations(&mut self) -> Result<(), ClientError> {
        self.send(&ClientToServer::RequestBusLocations).await
    }

    pub async fn update_location(
        &mut self,
        token: &str,
        bus_id: VehicleId,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
    ) -> Result<(), ClientError> {
        self.send(&ClientToServer::UpdateBusLocation {
            token: token.to_string(),
            bus_id,
            latitude,
            longitude,
            speed,
        })
        .await
    }

    async fn send(&mut self, message: &ClientToServer) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        let json = serde_json::to_string(message)?;
        stream.send(Message::text(json)).await?;
        Ok(())
    }

    /// Wait for the next server message. `None` once the server has closed.
    ///
    /// Frames that are not valid protocol messages are logged and skipped.
    pub async fn next_event(&mut self) -> Result<Option<ServerToClient>, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;

        while let Some(frame) = stream.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<ServerToClient>(text.as_str()) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => warn!(error = %e, "ignoring unparsable server frame"),
                },
                Message::Close(_) => break,
                other => debug!(?other, "ignoring non-text frame"),
            }
        }

        self.stream = None;
        Ok(None)
    }
}
