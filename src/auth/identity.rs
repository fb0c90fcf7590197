use axum::async_trait;
use jsonwebtoken::{Algorithm, Validation};

use crate::auth::jwt::verify_jwt;
use crate::error::{AppError, Result};

/// Turns an opaque identity token into a verified user id.
///
/// Every failure kind collapses into [`AppError::Authentication`].
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String>;
}

/// HS256 verifier for tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: String,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: impl Into<String>, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        match audience {
            Some(audience) => validation.set_audience(&[audience]),
            // Issuers stamp `aud` on every token; only check it when one is configured.
            None => validation.validate_aud = false,
        }

        Self {
            secret: secret.into(),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<String> {
        let claims = verify_jwt(token, &self.secret, &self.validation)?;

        if claims.sub.trim().is_empty() {
            return Err(AppError::Authentication("Token has no subject".to_string()));
        }

        Ok(claims.sub)
    }
}
