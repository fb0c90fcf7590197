use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Canonical stored message. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned insertion order, tie-break for equal timestamps.
    #[serde(skip)]
    pub seq: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// Assigned by the store at persistence time.
    #[sqlx(rename = "created_at")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// The participant on the other side of this message, seen from `user_id`.
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// All messages between one user and one counterpart, oldest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// The counterpart's user id.
    pub user_id: String,
    pub messages: Vec<Message>,
}
