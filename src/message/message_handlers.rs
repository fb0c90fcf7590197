use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    error::{AppError, Result},
    message::{message_dto::SendMessageRequest, message_models::Message},
    middleware::AuthUser,
    state::AppState,
};

/// Get all conversations for a user
#[utoipa::path(
    get,
    path = "/api/chat/{user_id}",
    tag = "chat",
    params(
        ("user_id" = String, Path, description = "User whose conversations to load")
    ),
    responses(
        (status = 200, description = "Conversations grouped by counterpart", body = Vec<crate::message::Conversation>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Conversations of another user")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(target_user_id): Path<String>,
) -> Result<impl IntoResponse> {
    if target_user_id != user_id {
        return Err(AppError::Forbidden(
            "You can only read your own conversations".to_string(),
        ));
    }

    tracing::info!(user_id = %user_id, "Get all conversations");
    let conversations = state.message_service.get_conversations(&user_id).await?;

    Ok((StatusCode::OK, Json(conversations)))
}

/// Send a message to another user
///
/// Synchronous fallback for the WebSocket `send` event: the message is
/// persisted and relayed the same way, but failures are returned.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message persisted and relayed", body = Message),
        (status = 400, description = "Malformed body, or missing receiverId or content"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Message store unavailable")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(payload) = payload?;
    let (message, delivery): (Message, _) = state.relay.relay(&user_id, payload).await?;
    tracing::debug!(message_id = %message.id, ?delivery, "Message created over HTTP");

    Ok((StatusCode::CREATED, Json(message)))
}
