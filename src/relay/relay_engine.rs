//! Relay engine: authentication on connect, persistence, and routing.
//!
//! ```text
//!  CONNECTED_UNAUTH ──auth ok──► AUTHENTICATED ──disconnect──► CLOSED
//!         │                                                      ▲
//!         └──────────── no token / auth failed ──────────────────┘
//! ```
//!
//! A relayed message is always persisted first. Only then is the
//! recipient's presence looked up and, if found, the stored record pushed
//! to that one connection. A recipient without presence is a normal
//! outcome, not an error.

use std::sync::Arc;
use validator::Validate;

use crate::{
    auth::IdentityVerifier,
    error::{AppError, Result},
    message::{Message, MessageStore, SendMessageRequest},
    presence::PresenceDirectory,
    relay::metrics::{RelayEvent, RelayMetrics},
    websocket::{ConnectionId, ConnectionRegistry, Delivery, ServerEvent, WsSender},
};

/// Result of a fire-and-forget `send` event. Never reported to the sender.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The connection has not completed the handshake.
    Unauthenticated,
    /// Missing or empty `receiverId` / `content`.
    Invalid,
    /// The store rejected the write; nothing was pushed.
    Failed,
    Relayed { message: Message, delivery: Delivery },
}

#[derive(Clone)]
pub struct RelayEngine {
    registry: ConnectionRegistry,
    presence: Arc<dyn PresenceDirectory>,
    store: Arc<dyn MessageStore>,
    verifier: Arc<dyn IdentityVerifier>,
    metrics: Arc<RelayMetrics>,
    refresh_presence_on_send: bool,
}

impl RelayEngine {
    pub fn new(
        presence: Arc<dyn PresenceDirectory>,
        store: Arc<dyn MessageStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let metrics = Arc::new(RelayMetrics::default());
        let registry = ConnectionRegistry::new(presence.clone(), metrics.clone());

        Self {
            registry,
            presence,
            store,
            verifier,
            metrics,
            refresh_presence_on_send: false,
        }
    }

    /// Re-bind the sender's presence after every successful send, extending
    /// its TTL. Off by default: presence normally reflects connect activity only.
    pub fn with_presence_refresh(mut self, enabled: bool) -> Self {
        self.refresh_presence_on_send = enabled;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Transport connected. The connection starts unauthenticated.
    pub fn open(&self, handle: ConnectionId, sender: WsSender) {
        self.registry.register(handle, sender);
        tracing::debug!(%handle, "Connection opened");
    }

    /// Verifies the resolved handshake token and binds presence.
    ///
    /// Any error is connection-fatal; the caller closes the transport
    /// without telling the peer why.
    pub async fn authenticate(&self, handle: ConnectionId, token: Option<String>) -> Result<String> {
        let result = self.try_authenticate(handle, token).await;

        match &result {
            Ok(user_id) => {
                self.metrics.record(RelayEvent::Authenticated);
                tracing::info!(%handle, user_id = %user_id, "Connection authenticated");
            }
            Err(e) => {
                self.metrics.record(RelayEvent::Rejected);
                tracing::warn!(%handle, error = %e, "Rejecting connection");
            }
        }

        result
    }

    async fn try_authenticate(&self, handle: ConnectionId, token: Option<String>) -> Result<String> {
        let token =
            token.ok_or_else(|| AppError::Authentication("No token provided".to_string()))?;

        let user_id = self.verifier.verify(&token).await.map_err(|e| match e {
            AppError::Authentication(_) => e,
            other => AppError::Authentication(other.to_string()),
        })?;

        // Fails if the peer went away while the token was being verified.
        self.registry.authenticate(handle, &user_id)?;
        self.presence.bind(&user_id, handle).await?;

        Ok(user_id)
    }

    /// Handles a `send` event from one connection.
    pub async fn on_send(&self, handle: ConnectionId, request: SendMessageRequest) -> SendOutcome {
        let Some(sender_id) = self.registry.user_of(handle) else {
            self.metrics.record(RelayEvent::UnauthenticatedSend);
            tracing::warn!(%handle, "Socket not authenticated, ignoring send");
            return SendOutcome::Unauthenticated;
        };

        match self.relay(&sender_id, request).await {
            Ok((message, delivery)) => {
                if self.refresh_presence_on_send {
                    self.refresh_presence(&sender_id, handle).await;
                }
                SendOutcome::Relayed { message, delivery }
            }
            Err(AppError::Validation(e)) => {
                tracing::warn!(%handle, sender_id = %sender_id, error = %e, "Invalid message payload dropped");
                SendOutcome::Invalid
            }
            Err(e) => {
                tracing::error!(%handle, sender_id = %sender_id, error = %e, "Failed to relay message");
                SendOutcome::Failed
            }
        }
    }

    /// Persists a message from `sender_id`, then routes it to the recipient.
    ///
    /// This is also the synchronous HTTP path; its errors propagate.
    pub async fn relay(
        &self,
        sender_id: &str,
        request: SendMessageRequest,
    ) -> Result<(Message, Delivery)> {
        if let Err(e) = request.validate() {
            self.metrics.record(RelayEvent::InvalidPayload);
            return Err(e.into());
        }

        let message = match self
            .store
            .append(sender_id, &request.receiver_id, &request.content)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record(RelayEvent::PersistFailed);
                return Err(e);
            }
        };
        self.metrics.record(RelayEvent::Persisted);
        tracing::info!(
            message_id = %message.id,
            sender_id,
            receiver_id = %message.receiver_id,
            "Message persisted"
        );

        let delivery = self.route(&message).await;
        Ok((message, delivery))
    }

    /// Pushes a stored message to the recipient's live connection, if any.
    pub async fn route(&self, message: &Message) -> Delivery {
        let handle = match self.presence.lookup(&message.receiver_id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                self.metrics.record(RelayEvent::Offline);
                tracing::debug!(receiver_id = %message.receiver_id, "Recipient is not online");
                return Delivery::Offline;
            }
            Err(e) => {
                self.metrics.record(RelayEvent::Offline);
                tracing::warn!(
                    receiver_id = %message.receiver_id,
                    error = %e,
                    "Presence lookup failed, treating recipient as offline"
                );
                return Delivery::Offline;
            }
        };

        self.registry
            .send_to(handle, ServerEvent::Receive(message.clone()))
    }

    async fn refresh_presence(&self, user_id: &str, handle: ConnectionId) {
        match self.presence.refresh(user_id, handle).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(user_id, %handle, "Presence held by another connection, not refreshed");
            }
            Err(e) => tracing::warn!(user_id, %handle, error = %e, "Failed to refresh presence"),
        }
    }

    /// Transport disconnected. Cascades to presence cleanup when authenticated.
    pub async fn close(&self, handle: ConnectionId) {
        self.registry.deregister(handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{create_jwt, JwtVerifier};
    use crate::message::InMemoryMessageStore;
    use crate::presence::InMemoryPresence;
    use crate::websocket::ConnectionState;
    use axum::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const SECRET: &str = "relay-secret";

    struct Harness {
        engine: RelayEngine,
        store: Arc<InMemoryMessageStore>,
        presence: Arc<InMemoryPresence>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryMessageStore::new());
        let presence = Arc::new(InMemoryPresence::new(Duration::from_secs(1800)));
        let engine = RelayEngine::new(
            presence.clone(),
            store.clone(),
            Arc::new(JwtVerifier::new(SECRET, None, None)),
        );
        Harness {
            engine,
            store,
            presence,
        }
    }

    fn token(user_id: &str) -> Option<String> {
        Some(create_jwt(user_id, SECRET, 1).unwrap())
    }

    fn send(receiver_id: &str, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
        }
    }

    async fn connect(
        engine: &RelayEngine,
        user_id: &str,
    ) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let handle = ConnectionId::new();
        let (tx, rx) = mpsc::channel(8);
        engine.open(handle, tx);
        engine.authenticate(handle, token(user_id)).await.unwrap();
        (handle, rx)
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let h = harness();
        let handle = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(8);
        h.engine.open(handle, tx);

        let result = h.engine.authenticate(handle, None).await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
        assert_eq!(
            h.engine.registry().state(handle),
            Some(ConnectionState::Unauthenticated)
        );
        assert_eq!(h.engine.metrics().snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn test_invalid_token_rejected_without_presence() {
        let h = harness();
        let handle = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(8);
        h.engine.open(handle, tx);

        let forged = Some(create_jwt("alice", "wrong-secret", 1).unwrap());
        assert!(h.engine.authenticate(handle, forged).await.is_err());
        assert!(h.presence.is_empty());
    }

    #[tokio::test]
    async fn test_authenticate_binds_presence() {
        let h = harness();
        let (handle, _rx) = connect(&h.engine, "alice").await;

        assert_eq!(h.presence.lookup("alice").await.unwrap(), Some(handle));
        assert_eq!(
            h.engine.registry().state(handle),
            Some(ConnectionState::Authenticated("alice".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_send_is_not_persisted() {
        let h = harness();
        let (_alice, mut alice_rx) = connect(&h.engine, "alice").await;

        let bob = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(8);
        h.engine.open(bob, tx);

        let outcome = h.engine.on_send(bob, send("alice", "hi")).await;
        assert_eq!(outcome, SendOutcome::Unauthenticated);
        assert!(h.store.is_empty().await);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_present_recipient_is_pushed() {
        let h = harness();
        let (alice, mut alice_rx) = connect(&h.engine, "alice").await;
        let (bob, _bob_rx) = connect(&h.engine, "bob").await;

        let outcome = h.engine.on_send(bob, send("alice", "hi")).await;
        let SendOutcome::Relayed { message, delivery } = outcome else {
            panic!("expected relayed outcome");
        };
        assert_eq!(message.sender_id, "bob");
        assert_eq!(message.receiver_id, "alice");
        assert_eq!(delivery, Delivery::Pushed(alice));

        match alice_rx.try_recv().unwrap() {
            ServerEvent::Receive(received) => assert_eq!(received, message),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_to_absent_recipient_is_stored_only() {
        let h = harness();
        let (bob, _bob_rx) = connect(&h.engine, "bob").await;

        let outcome = h.engine.on_send(bob, send("carol", "hello?")).await;
        assert!(matches!(
            outcome,
            SendOutcome::Relayed {
                delivery: Delivery::Offline,
                ..
            }
        ));

        let carol = h.store.find_all_for_user("carol").await.unwrap();
        assert_eq!(carol.len(), 1);
        assert_eq!(carol[0].sender_id, "bob");
    }

    #[tokio::test]
    async fn test_disconnect_removes_presence() {
        let h = harness();
        let (alice, _alice_rx) = connect(&h.engine, "alice").await;
        let (bob, _bob_rx) = connect(&h.engine, "bob").await;

        h.engine.close(alice).await;
        assert_eq!(h.presence.lookup("alice").await.unwrap(), None);
        assert_eq!(h.engine.registry().state(alice), None);

        let outcome = h.engine.on_send(bob, send("alice", "still there?")).await;
        assert!(matches!(
            outcome,
            SendOutcome::Relayed {
                delivery: Delivery::Offline,
                ..
            }
        ));
        assert_eq!(h.store.find_all_for_user("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_dropped() {
        let h = harness();
        let (bob, _bob_rx) = connect(&h.engine, "bob").await;

        assert_eq!(h.engine.on_send(bob, send("", "hi")).await, SendOutcome::Invalid);
        assert_eq!(h.engine.on_send(bob, send("alice", "")).await, SendOutcome::Invalid);
        assert!(h.store.is_empty().await);
        assert_eq!(h.engine.metrics().snapshot().invalid_payloads, 2);
    }

    #[tokio::test]
    async fn test_per_sender_order_preserved() {
        let h = harness();
        let (_alice, mut alice_rx) = connect(&h.engine, "alice").await;
        let (bob, _bob_rx) = connect(&h.engine, "bob").await;

        h.engine.on_send(bob, send("alice", "first")).await;
        h.engine.on_send(bob, send("alice", "second")).await;

        let stored = h.store.find_all_for_user("alice").await.unwrap();
        assert_eq!(stored[0].content, "first");
        assert_eq!(stored[1].content, "second");
        assert!(stored[0].timestamp <= stored[1].timestamp);

        let mut pushed = Vec::new();
        while let Ok(ServerEvent::Receive(m)) = alice_rx.try_recv() {
            pushed.push(m.content);
        }
        assert_eq!(pushed, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_last_connection_wins_and_old_close_keeps_new_presence() {
        let h = harness();
        let (first, _rx1) = connect(&h.engine, "alice").await;
        let (second, _rx2) = connect(&h.engine, "alice").await;

        assert_eq!(h.presence.lookup("alice").await.unwrap(), Some(second));

        h.engine.close(first).await;
        assert_eq!(h.presence.lookup("alice").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_instead_of_blocking() {
        let h = harness();
        let alice = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);
        h.engine.open(alice, tx);
        h.engine.authenticate(alice, token("alice")).await.unwrap();
        let (bob, _bob_rx) = connect(&h.engine, "bob").await;

        h.engine.on_send(bob, send("alice", "fills the queue")).await;
        let outcome = h.engine.on_send(bob, send("alice", "overflow")).await;

        assert!(matches!(
            outcome,
            SendOutcome::Relayed {
                delivery: Delivery::Dropped(_),
                ..
            }
        ));
        assert_eq!(h.store.find_all_for_user("alice").await.unwrap().len(), 2);
        assert_eq!(h.engine.metrics().snapshot().dropped_full, 1);
    }

    struct BrokenStore;

    #[async_trait]
    impl MessageStore for BrokenStore {
        async fn append(&self, _: &str, _: &str, _: &str) -> Result<Message> {
            Err(AppError::Persistence(sqlx::Error::PoolTimedOut))
        }

        async fn find_all_for_user(&self, _: &str) -> Result<Vec<Message>> {
            Err(AppError::Persistence(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_pushed() {
        let presence = Arc::new(InMemoryPresence::new(Duration::from_secs(1800)));
        let engine = RelayEngine::new(
            presence,
            Arc::new(BrokenStore),
            Arc::new(JwtVerifier::new(SECRET, None, None)),
        );
        let (_alice, mut alice_rx) = connect(&engine, "alice").await;
        let (bob, _bob_rx) = connect(&engine, "bob").await;

        assert_eq!(engine.on_send(bob, send("alice", "hi")).await, SendOutcome::Failed);
        assert!(alice_rx.try_recv().is_err());

        let result = engine.relay("bob", send("alice", "hi")).await;
        assert!(matches!(result, Err(AppError::Persistence(_))));
        assert_eq!(engine.metrics().snapshot().persist_failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_refresh_on_send_extends_ttl() {
        let store = Arc::new(InMemoryMessageStore::new());
        let presence = Arc::new(InMemoryPresence::new(Duration::from_secs(60)));
        let engine = RelayEngine::new(
            presence.clone(),
            store,
            Arc::new(JwtVerifier::new(SECRET, None, None)),
        )
        .with_presence_refresh(true);

        let (bob, _bob_rx) = connect(&engine, "bob").await;
        tokio::time::advance(Duration::from_secs(50)).await;
        engine.on_send(bob, send("alice", "keepalive")).await;
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(presence.lookup("bob").await.unwrap(), Some(bob));
    }

    /// Binds a newer connection for the user just before each refresh lands.
    struct ReconnectDuringRefresh {
        inner: InMemoryPresence,
        newer: ConnectionId,
    }

    #[async_trait]
    impl PresenceDirectory for ReconnectDuringRefresh {
        async fn bind(&self, user_id: &str, handle: ConnectionId) -> Result<()> {
            self.inner.bind(user_id, handle).await
        }

        async fn lookup(&self, user_id: &str) -> Result<Option<ConnectionId>> {
            self.inner.lookup(user_id).await
        }

        async fn unbind(&self, user_id: &str) -> Result<()> {
            self.inner.unbind(user_id).await
        }

        async fn release(&self, user_id: &str, handle: ConnectionId) -> Result<bool> {
            self.inner.release(user_id, handle).await
        }

        async fn refresh(&self, user_id: &str, handle: ConnectionId) -> Result<bool> {
            self.inner.bind(user_id, self.newer).await?;
            self.inner.refresh(user_id, handle).await
        }
    }

    #[tokio::test]
    async fn test_presence_refresh_keeps_newer_connection() {
        let newer = ConnectionId::new();
        let presence = Arc::new(ReconnectDuringRefresh {
            inner: InMemoryPresence::new(Duration::from_secs(1800)),
            newer,
        });
        let engine = RelayEngine::new(
            presence.clone(),
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(JwtVerifier::new(SECRET, None, None)),
        )
        .with_presence_refresh(true);

        let (bob, _bob_rx) = connect(&engine, "bob").await;
        let outcome = engine.on_send(bob, send("alice", "still here")).await;

        assert!(matches!(outcome, SendOutcome::Relayed { .. }));
        assert_eq!(presence.lookup("bob").await.unwrap(), Some(newer));
    }
}
