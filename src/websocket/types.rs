use serde::{Deserialize, Serialize};

use crate::message::{Message, SendMessageRequest};

// Client-to-server frames
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Connection-level handshake. `auth.token` outranks the query string
    /// and the `Authorization` header.
    Connect {
        #[serde(default)]
        auth: Option<HandshakeAuth>,
    },
    Send(SendMessageRequest),
    Ping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeAuth {
    #[serde(default)]
    pub token: Option<String>,
}

// Server-to-client frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// A persisted message addressed to this connection's user.
    Receive(Message),
    Ping,
    Pong,
}
