//! Redis-backed presence directory.
//!
//! Layout matches what other services in the deployment read:
//!
//! ```text
//!  user:{user_id}  ->  {connection handle id}   (EX ttl)
//! ```
//!
//! Expiry is delegated to Redis, so entries left behind by a crashed
//! process disappear on their own once the TTL elapses.

use axum::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Script};
use std::time::Duration;

use super::PresenceDirectory;
use crate::error::Result;
use crate::websocket::ConnectionId;

const PRESENCE_KEY_PREFIX: &str = "user";

/// Deletes the key only while it still holds the given handle.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Restarts the key's TTL only while it still holds the given handle.
const REFRESH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisPresence {
    conn: MultiplexedConnection,
    ttl_secs: u64,
    release_script: Script,
    refresh_script: Script,
}

impl RedisPresence {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(Self {
            conn,
            ttl_secs: ttl.as_secs().max(1),
            release_script: Script::new(RELEASE_SCRIPT),
            refresh_script: Script::new(REFRESH_SCRIPT),
        })
    }

    fn key(user_id: &str) -> String {
        format!("{PRESENCE_KEY_PREFIX}:{user_id}")
    }
}

#[async_trait]
impl PresenceDirectory for RedisPresence {
    async fn bind(&self, user_id: &str, handle: ConnectionId) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::key(user_id), handle.to_string(), self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<ConnectionId>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(user_id)).await?;

        Ok(raw.and_then(|value| match value.parse::<ConnectionId>() {
            Ok(handle) => Some(handle),
            Err(_) => {
                tracing::warn!(user_id, value = %value, "Ignoring unparseable presence entry");
                None
            }
        }))
    }

    async fn unbind(&self, user_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(user_id)).await?;
        Ok(())
    }

    async fn release(&self, user_id: &str, handle: ConnectionId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release_script
            .key(Self::key(user_id))
            .arg(handle.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn refresh(&self, user_id: &str, handle: ConnectionId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .refresh_script
            .key(Self::key(user_id))
            .arg(handle.to_string())
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended > 0)
    }
}
