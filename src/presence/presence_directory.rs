use axum::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Result;
use crate::websocket::ConnectionId;

/// Maps a user to the connection currently able to receive pushes for them.
///
/// Entries expire a fixed TTL after they were bound. Lookups never extend
/// the TTL; only a fresh `bind` does.
#[async_trait]
pub trait PresenceDirectory: Send + Sync {
    /// Overwrites any existing mapping for `user_id` (last writer wins).
    async fn bind(&self, user_id: &str, handle: ConnectionId) -> Result<()>;

    async fn lookup(&self, user_id: &str) -> Result<Option<ConnectionId>>;

    /// Idempotent; removing an absent entry is a no-op.
    async fn unbind(&self, user_id: &str) -> Result<()>;

    /// Unbinds `user_id` only while it still points at `handle`.
    /// Returns whether an entry was removed.
    async fn release(&self, user_id: &str, handle: ConnectionId) -> Result<bool>;

    /// Restarts the TTL of `user_id` only while it still points at `handle`.
    /// Returns whether the entry was extended.
    async fn refresh(&self, user_id: &str, handle: ConnectionId) -> Result<bool>;
}

#[derive(Debug, Clone, Copy)]
struct PresenceEntry {
    handle: ConnectionId,
    expires_at: Instant,
}

impl PresenceEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local presence directory backed by a sharded concurrent map.
#[derive(Clone)]
pub struct InMemoryPresence {
    entries: Arc<DashMap<String, PresenceEntry>>,
    ttl: Duration,
}

impl InMemoryPresence {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purges expired entries until the runtime shuts down.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let presence = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = presence.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired presence entries");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl PresenceDirectory for InMemoryPresence {
    async fn bind(&self, user_id: &str, handle: ConnectionId) -> Result<()> {
        let entry = PresenceEntry {
            handle,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(user_id.to_string(), entry);
        Ok(())
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<ConnectionId>> {
        let now = Instant::now();
        let found = self.entries.get(user_id).map(|entry| *entry);

        match found {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.handle)),
            Some(_) => {
                self.entries.remove_if(user_id, |_, entry| !entry.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn unbind(&self, user_id: &str) -> Result<()> {
        self.entries.remove(user_id);
        Ok(())
    }

    async fn release(&self, user_id: &str, handle: ConnectionId) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(user_id, |_, entry| entry.handle == handle)
            .is_some())
    }

    async fn refresh(&self, user_id: &str, handle: ConnectionId) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(user_id) {
            Some(mut entry) if entry.handle == handle && entry.is_live(now) => {
                entry.expires_at = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
