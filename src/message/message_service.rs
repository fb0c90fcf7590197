use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::message::message_models::{Conversation, Message};
use crate::message::message_repository::MessageStore;

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
}

impl MessageService {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Rebuilds every conversation `user_id` takes part in. Nothing is cached.
    pub async fn get_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let messages = self.store.find_all_for_user(user_id).await?;
        tracing::debug!(user_id, count = messages.len(), "Loaded messages for conversations");
        Ok(group_conversations(user_id, messages))
    }
}

/// Groups a user's messages by counterpart.
///
/// Messages are ordered by timestamp, then insertion order. Groups appear in
/// the order their counterpart first shows up in that sequence.
pub fn group_conversations(user_id: &str, mut messages: Vec<Message>) -> Vec<Conversation> {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.seq.cmp(&b.seq)));

    let mut conversations: Vec<Conversation> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for message in messages {
        let other = message.counterpart(user_id).to_string();
        let slot = *index.entry(other.clone()).or_insert_with(|| {
            conversations.push(Conversation {
                user_id: other,
                messages: Vec::new(),
            });
            conversations.len() - 1
        });
        conversations[slot].messages.push(message);
    }

    conversations
}
