use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use kindred_types::ChatError;
use kindred_types::api::Claims;

/// Who a verified credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: Uuid,
    pub email: String,
}

/// Turns a presented credential into an identity. Token issuance lives
/// outside this service; we only check what clients present.
pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthIdentity, ChatError>;
}

/// HS256 JWT verification against a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl AuthVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<AuthIdentity, ChatError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::ExpiredSignature => ChatError::Unauthorized("token expired".into()),
                _ => ChatError::Unauthorized("invalid token".into()),
            }
        })?;

        Ok(AuthIdentity {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}
