use crate::error::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// `iss` and `aud` are checked by `Validation` on the raw payload and are not mapped here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: &str, expiration_hours: i64) -> Result<Self> {
        let expiration = Utc::now()
            .checked_add_signed(Duration::hours(expiration_hours))
            .ok_or(AppError::InternalError)?
            .timestamp();

        Ok(Self {
            sub: user_id.to_string(),
            exp: expiration,
        })
    }
}

pub fn create_jwt(user_id: &str, secret: &str, expiration_hours: i64) -> Result<String> {
    encode_claims(&Claims::new(user_id, expiration_hours)?, secret)
}

pub fn encode_claims<T: Serialize>(claims: &T, secret: &str) -> Result<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Authentication("Failed to create token".to_string()))
}

pub fn verify_jwt(token: &str, secret: &str, validation: &Validation) -> Result<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), validation)
        .map(|data| data.claims)
        .map_err(|e| AppError::Authentication(e.to_string()))
}
