// ============================
// fleet-backend-lib/src/auth/jwt.rs
// ============================
//! HS256 access-token validation.
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CredentialValidator, Principal, Role};
use crate::error::AppError;

/// Access-token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Validates access tokens signed with a shared secret
#[derive(Clone)]
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token; used by tests and local tooling
    pub fn issue(&self, id: i64, username: &str, role: &str, ttl: Duration) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            id,
            username: username.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now.saturating_add(ttl),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Decode and verify a token
    pub fn decode_claims(&self, token: &str) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

#[async_trait]
impl CredentialValidator for JwtValidator {
    async fn validate(&self, token: &str) -> Option<Principal> {
        match self.decode_claims(token) {
            Ok(claims) => Some(Principal::new(claims.username, Role::parse(&claims.role))),
            Err(e) => {
                debug!(error = %e, "token rejected");
                None
            },
        }
    }
}
