// ============================
// fleet-backend-lib/src/registry.rs
// ============================
//! Live connection registry.
//!
//! Each open WebSocket owns a bounded outbound queue; the registry maps a
//! connection id to that queue plus whatever principal the connection has
//! authenticated as. Entries are added on accept and removed on close, or
//! when a send to the connection fails. A connection that is removed for a
//! failed send is signalled through its eviction [`Notify`] so its socket
//! task can shut down.
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify,
};
use tracing::debug;
use uuid::Uuid;

use crate::auth::Principal;

pub type ConnectionId = Uuid;

/// Registered connection
#[derive(Clone)]
pub struct ConnectionEntry {
    pub tx: mpsc::Sender<Message>,
    pub principal: Option<Principal>,
    pub connected_at: DateTime<Utc>,
    evicted: Arc<Notify>,
}

impl ConnectionEntry {
    /// Seconds since the connection was accepted
    pub fn age_secs(&self) -> i64 {
        Utc::now().signed_duration_since(self.connected_at).num_seconds()
    }
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// Queue at capacity; the slow connection has been unregistered
    Full,
    /// Writer is gone; the connection has been unregistered
    Closed,
    /// No such connection
    Unknown,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and hand back its fresh id
    pub fn register(&self, tx: mpsc::Sender<Message>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                tx,
                principal: None,
                connected_at: Utc::now(),
                evicted: Arc::new(Notify::new()),
            },
        );
        debug!(connection_id = %id, total = self.connections.len(), "connection registered");
        id
    }

    /// Remove a connection. Returns `None` if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> Option<ConnectionEntry> {
        let (_, entry) = self.connections.remove(&id)?;
        debug!(connection_id = %id, total = self.connections.len(), "connection unregistered");
        Some(entry)
    }

    /// Remove a connection after a failed send and wake its socket task
    fn evict(&self, id: ConnectionId) {
        if let Some(entry) = self.unregister(id) {
            entry.evicted.notify_one();
        }
    }

    /// Signal fired when the connection is evicted for a failed send.
    /// The permit is kept, so waiting after the eviction still completes.
    pub fn eviction_signal(&self, id: ConnectionId) -> Option<Arc<Notify>> {
        self.connections.get(&id).map(|e| e.evicted.clone())
    }

    /// Record the identity a connection authenticated as
    pub fn set_principal(&self, id: ConnectionId, principal: Option<Principal>) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.principal = principal;
                true
            },
            None => false,
        }
    }

    pub fn principal(&self, id: ConnectionId) -> Option<Principal> {
        self.connections.get(&id).and_then(|e| e.principal.clone())
    }

    pub fn sender(&self, id: ConnectionId) -> Option<mpsc::Sender<Message>> {
        self.connections.get(&id).map(|e| e.tx.clone())
    }

    /// Enqueue without waiting. Any failure, full or closed, evicts the
    /// connection, so every connection still registered got the frame.
    pub fn try_send(&self, id: ConnectionId, message: Message) -> SendOutcome {
        let Some(tx) = self.sender(id) else {
            return SendOutcome::Unknown;
        };

        match tx.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.evict(id);
                SendOutcome::Full
            },
            Err(TrySendError::Closed(_)) => {
                self.evict(id);
                SendOutcome::Closed
            },
        }
    }

    /// Visit every connection present when the call started.
    ///
    /// Works on a copy of the entries, so the visitor may register or
    /// unregister connections (including the one being visited).
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(ConnectionId, &ConnectionEntry),
    {
        let entries: Vec<(ConnectionId, ConnectionEntry)> = self
            .connections
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        for (id, entry) in &entries {
            visit(*id, entry);
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);

        let id = registry.register(tx);
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let a = registry.register(tx.clone());
        let b = registry.register(tx);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_principal_tracking() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.register(tx);
        assert!(registry.principal(id).is_none());

        let principal = Principal::new("dave", Role::Driver);
        assert!(registry.set_principal(id, Some(principal.clone())));
        assert_eq!(registry.principal(id), Some(principal));

        registry.unregister(id);
        assert!(!registry.set_principal(id, None));
    }

    #[test]
    fn test_try_send_outcomes() {
        let registry = ConnectionRegistry::new();

        let (tx, mut rx) = mpsc::channel(1);
        let id = registry.register(tx);
        assert_eq!(registry.try_send(id, Message::Text("a".into())), SendOutcome::Queued);
        assert_eq!(registry.try_send(id, Message::Text("b".into())), SendOutcome::Full);
        assert!(!registry.contains(id));
        assert!(rx.try_recv().is_ok());
        assert_eq!(registry.try_send(id, Message::Text("c".into())), SendOutcome::Unknown);

        let (tx, rx) = mpsc::channel(1);
        let id = registry.register(tx);
        drop(rx);
        assert_eq!(registry.try_send(id, Message::Text("d".into())), SendOutcome::Closed);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_failed_send_fires_eviction_signal() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx);
        let evicted = registry.eviction_signal(id).unwrap();

        registry.try_send(id, Message::Text("a".into()));
        registry.try_send(id, Message::Text("b".into()));

        // fired before anyone waited
        tokio::time::timeout(std::time::Duration::from_secs(1), evicted.notified())
            .await
            .unwrap();
        assert!(registry.eviction_signal(id).is_none());
    }

    #[test]
    fn test_plain_unregister_reports_entry() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx);

        let entry = registry.unregister(id).unwrap();
        assert!(entry.age_secs() >= 0);
        assert!(entry.principal.is_none());
    }

    #[test]
    fn test_for_each_tolerates_removal() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (tx, rx) = mpsc::channel(1);
            registry.register(tx);
            receivers.push(rx);
        }

        let mut visited = 0;
        registry.for_each(|id, _entry| {
            visited += 1;
            registry.unregister(id);
        });

        assert_eq!(visited, 5);
        assert!(registry.is_empty());
    }
}
