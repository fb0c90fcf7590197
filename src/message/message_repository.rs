use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{error::Result, message::message_models::Message};

/// Durable, append-only message log queryable by participant.
///
/// Appends must be visible to every later query (read-your-writes), and
/// concurrent appends must never lose writes or repeat ids.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Assigns id and timestamp, persists, and returns the stored record.
    async fn append(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message>;

    /// Every message sent or received by `user_id`, oldest first, ties in
    /// insertion order.
    async fn find_all_for_user(&self, user_id: &str) -> Result<Vec<Message>>;
}

#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for MessageRepository {
    async fn append(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message> {
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, sender_id, receiver_id, content)
             VALUES ($1, $2, $3, $4)
             RETURNING id, seq, sender_id, receiver_id, content, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    async fn find_all_for_user(&self, user_id: &str) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT id, seq, sender_id, receiver_id, content, created_at
             FROM messages
             WHERE sender_id = $1 OR receiver_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }
}
