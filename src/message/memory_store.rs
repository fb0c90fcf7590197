use axum::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::Result,
    message::{message_models::Message, message_repository::MessageStore},
};

/// Non-durable store for local development and tests.
///
/// Appends are serialised behind one lock, which is what gives ids,
/// sequence numbers and timestamps their insertion order.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message> {
        let mut messages = self.messages.lock().await;

        let now = Utc::now();
        // Wall clocks can step backwards; stored timestamps must not.
        let timestamp = match messages.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let message = Message {
            id: Uuid::new_v4(),
            seq: messages.len() as i64 + 1,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            timestamp,
        };
        messages.push(message.clone());

        Ok(message)
    }

    async fn find_all_for_user(&self, user_id: &str) -> Result<Vec<Message>> {
        let messages = self.messages.lock().await;

        Ok(messages
            .iter()
            .filter(|m| m.sender_id == user_id || m.receiver_id == user_id)
            .cloned()
            .collect())
    }
}
