pub mod identity;
pub mod jwt;

pub use identity::{IdentityVerifier, JwtVerifier};
pub use jwt::{create_jwt, verify_jwt, Claims};
