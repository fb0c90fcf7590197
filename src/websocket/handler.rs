use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, Uri},
    response::Response,
};
use futures::{
    sink::SinkExt,
    stream::{SplitStream, StreamExt},
};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    relay::{metrics::RelayEvent, RelayEngine},
    state::AppState,
    websocket::{
        connection::{ConnectionId, WsSender},
        handshake::TokenSources,
        types::{ClientEvent, ServerEvent},
    },
};

/// Real-time chat WebSocket.
///
/// The peer must open with a `connect` frame. Its `auth.token`, else the
/// `token` query parameter, else the bearer header identifies the user.
/// Rejected peers are closed without an explanation.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let sources = TokenSources::from_request(&uri, &headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, sources))
}

/// Drives one connection: handshake, then events strictly in arrival order.
async fn handle_socket(socket: WebSocket, state: AppState, mut sources: TokenSources) {
    let handle = ConnectionId::new();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer.max(1));

    state.relay.open(handle, tx.clone());

    // Handshake
    let handshake_timeout = Duration::from_secs(state.config.handshake_timeout_secs);
    let connect_frame = await_connect_frame(&mut receiver, handle, &state.relay);
    let auth_payload = match tokio::time::timeout(handshake_timeout, connect_frame).await {
        Ok(Some(auth_payload)) => auth_payload,
        Ok(None) => {
            tracing::debug!(%handle, "Peer left before handshake");
            state.relay.close(handle).await;
            return;
        }
        Err(_) => {
            tracing::debug!(%handle, "Handshake timed out");
            state.relay.close(handle).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    sources.auth_payload = auth_payload;

    let user_id = match state.relay.authenticate(handle, sources.resolve()).await {
        Ok(user_id) => user_id,
        Err(_) => {
            state.relay.close(handle).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let _ = tx.try_send(ServerEvent::Connected {
        user_id: user_id.clone(),
    });

    // Task: send events from the queue to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(%handle, error = %e, "Failed to encode server event"),
            }
        }
    });

    // Heartbeat task
    let heartbeat_every = Duration::from_secs(state.config.heartbeat_interval_secs.max(1));
    let tx_heartbeat = tx.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + heartbeat_every, heartbeat_every);
        loop {
            interval.tick().await;
            match tx_heartbeat.try_send(ServerEvent::Ping) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Closed(_)) => break,
            }
        }
    });

    // Events are handled inline, one at a time. A store call that is in
    // flight when the peer disconnects still runs to completion.
    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    process_client_message(&text, handle, &tx, &state).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Binary and transport ping/pong frames carry nothing for the relay.
                Some(Ok(_)) => {}
            },
            _ = &mut send_task => break,
        }
    }

    // Cleanup
    heartbeat_task.abort();
    state.relay.close(handle).await;
    send_task.abort();

    tracing::info!(%handle, user_id = %user_id, "Chat WebSocket closed");
}

/// Waits for the `connect` frame and returns its `auth.token`.
///
/// Anything else sent before the handshake goes through the relay, which
/// ignores it for an unauthenticated connection. `None` means the peer left.
async fn await_connect_frame(
    receiver: &mut SplitStream<WebSocket>,
    handle: ConnectionId,
    relay: &RelayEngine,
) -> Option<Option<String>> {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::Connect { auth }) => return Some(auth.and_then(|a| a.token)),
                Ok(ClientEvent::Send(request)) => {
                    relay.on_send(handle, request).await;
                }
                Ok(ClientEvent::Ping) => {}
                Err(e) => {
                    relay.metrics().record(RelayEvent::InvalidPayload);
                    tracing::debug!(%handle, error = %e, "Ignoring malformed frame before handshake");
                }
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Process one frame from an authenticated connection.
async fn process_client_message(
    text: &str,
    handle: ConnectionId,
    outbound: &WsSender,
    state: &AppState,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            state.relay.metrics().record(RelayEvent::InvalidPayload);
            tracing::warn!(%handle, error = %e, "Invalid message payload received");
            return;
        }
    };

    match event {
        ClientEvent::Send(request) => {
            state.relay.on_send(handle, request).await;
        }
        ClientEvent::Connect { .. } => {
            tracing::debug!(%handle, "Ignoring repeated connect frame");
        }
        // Replies go straight to our own queue; they are not relay pushes.
        ClientEvent::Ping => {
            let _ = outbound.try_send(ServerEvent::Pong);
        }
    }
}
