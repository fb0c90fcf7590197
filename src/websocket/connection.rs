use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    presence::PresenceDirectory,
    relay::metrics::{RelayEvent, RelayMetrics},
    websocket::types::ServerEvent,
};

/// Bounded outbound queue feeding one socket's writer task.
pub type WsSender = mpsc::Sender<ServerEvent>;

/// Opaque handle for one live transport connection, valid only in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Live states. A closed connection has no entry at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated(String),
}

/// What happened to a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the recipient's connection.
    Pushed(ConnectionId),
    /// Recipient has no presence entry.
    Offline,
    /// Recipient's queue was full or the connection was already gone.
    Dropped(ConnectionId),
}

struct ConnectionEntry {
    state: ConnectionState,
    sender: WsSender,
}

/// Per-process table of live connections. The only component that pushes
/// data to a remote party.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    presence: Arc<dyn PresenceDirectory>,
    metrics: Arc<RelayMetrics>,
}

impl ConnectionRegistry {
    pub fn new(presence: Arc<dyn PresenceDirectory>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            presence,
            metrics,
        }
    }

    pub fn register(&self, handle: ConnectionId, sender: WsSender) {
        self.connections.insert(
            handle,
            ConnectionEntry {
                state: ConnectionState::Unauthenticated,
                sender,
            },
        );
    }

    /// Attaches a verified identity. Only valid once, from the unauthenticated state.
    pub fn authenticate(&self, handle: ConnectionId, user_id: &str) -> Result<()> {
        let mut entry = self
            .connections
            .get_mut(&handle)
            .ok_or_else(|| AppError::Authentication("Connection is no longer live".to_string()))?;

        if matches!(entry.state, ConnectionState::Authenticated(_)) {
            return Err(AppError::Authentication(
                "Connection is already authenticated".to_string(),
            ));
        }

        entry.state = ConnectionState::Authenticated(user_id.to_string());
        Ok(())
    }

    pub fn state(&self, handle: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&handle).map(|entry| entry.state.clone())
    }

    pub fn user_of(&self, handle: ConnectionId) -> Option<String> {
        match self.state(handle)? {
            ConnectionState::Authenticated(user_id) => Some(user_id),
            ConnectionState::Unauthenticated => None,
        }
    }

    /// Removes the connection. An authenticated connection also gives up its
    /// presence entry, unless a newer connection has already taken it over.
    pub async fn deregister(&self, handle: ConnectionId) {
        let Some((_, entry)) = self.connections.remove(&handle) else {
            return;
        };

        if let ConnectionState::Authenticated(user_id) = entry.state {
            match self.presence.release(&user_id, handle).await {
                Ok(true) => tracing::info!(%handle, user_id = %user_id, "Removed presence"),
                Ok(false) => tracing::debug!(
                    %handle,
                    user_id = %user_id,
                    "Presence already held by another connection"
                ),
                Err(e) => tracing::warn!(
                    %handle,
                    user_id = %user_id,
                    error = %e,
                    "Failed to remove presence on disconnect"
                ),
            }
        }
    }

    /// Best-effort push that never waits on the recipient's socket.
    pub fn send_to(&self, handle: ConnectionId, event: ServerEvent) -> Delivery {
        let Some(entry) = self.connections.get(&handle) else {
            self.metrics.record(RelayEvent::DroppedClosed);
            tracing::debug!(%handle, "Push target is no longer live");
            return Delivery::Dropped(handle);
        };

        match entry.sender.try_send(event) {
            Ok(()) => {
                self.metrics.record(RelayEvent::Pushed);
                Delivery::Pushed(handle)
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record(RelayEvent::DroppedFull);
                tracing::warn!(%handle, "Outbound queue full, dropping push");
                Delivery::Dropped(handle)
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record(RelayEvent::DroppedClosed);
                tracing::debug!(%handle, "Outbound queue closed, dropping push");
                Delivery::Dropped(handle)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
