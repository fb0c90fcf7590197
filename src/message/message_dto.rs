use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

/// Inbound send payload, shared by the WebSocket `send` event and `POST /api/chat`.
///
/// Any client-supplied `senderId` or `timestamp` is ignored; the server
/// asserts the sender and assigns the timestamp.
#[derive(Clone, Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub receiver_id: String,
    #[serde(default)]
    #[validate(length(min = 1))]
    pub content: String,
}
