use axum::extract::Query;
use axum::http::{header::AUTHORIZATION, HeaderMap, Uri};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Places a client may put its identity token when connecting.
#[derive(Debug, Clone, Default)]
pub struct TokenSources {
    /// `auth.token` from the `connect` frame.
    pub auth_payload: Option<String>,
    /// `?token=` on the upgrade request.
    pub query: Option<String>,
    /// `Authorization: Bearer` on the upgrade request.
    pub header: Option<String>,
}

impl TokenSources {
    pub fn from_request(uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            auth_payload: None,
            query: token_from_query(uri),
            header: bearer_token(headers),
        }
    }

    /// First non-empty token in priority order: auth payload, query, header.
    pub fn resolve(self) -> Option<String> {
        non_empty(self.auth_payload)
            .or_else(|| non_empty(self.query))
            .or_else(|| non_empty(self.header))
    }
}

fn non_empty(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.trim().is_empty())
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme != "Bearer" {
        return None;
    }
    non_empty(Some(token.trim().to_string()))
}

/// Token from a `token` query parameter.
pub fn token_from_query(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    non_empty(query.token)
}
