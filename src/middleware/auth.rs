use crate::{
    error::AppError,
    state::AppState,
    websocket::{bearer_token, token_from_query},
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // Check query parameters for token when there is no bearer header
    let token = bearer_token(req.headers())
        .or_else(|| token_from_query(req.uri()))
        .ok_or(AppError::Unauthorized("Missing bearer token".to_string()))?;

    let user_id = state.verifier.verify(&token).await?;

    req.extensions_mut().insert(AuthUser(user_id));

    Ok(next.run(req).await)
}

// Extractor for getting the verified user id from request extensions
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthorized("Invalid credentials".to_string()))
    }
}
