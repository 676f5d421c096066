//! Session token verification

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Session token claims issued by the request handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Submitting user ID
    pub user_id: String,

    #[serde(default)]
    pub username: Option<String>,

    /// Expiration timestamp, checked when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Verifies HS256 session tokens against the shared secret
pub struct SessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Tokens without `exp` are accepted
        validation.set_required_spec_claims::<&str>(&[]);

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Verify a raw token and return its claims
    pub fn verify(&self, raw: &str) -> Result<SessionClaims, ServiceError> {
        let token_data = decode::<SessionClaims>(raw, &self.key, &self.validation)
            .map_err(|e| ServiceError::AuthError(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }

    /// Verify an `Authorization` header value of the form `Bearer <token>`
    pub fn verify_header(&self, header: Option<&str>) -> Result<SessionClaims, ServiceError> {
        let header = header.ok_or_else(|| ServiceError::AuthError("Access token required".to_string()))?;
        let raw = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::AuthError("Access token required".to_string()))?;

        self.verify(raw)
    }
}
