//! Session tokens shared by the gateway and scripts.

use std::collections::HashMap;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::Module;
use crate::runtime::error::{ErrorCode, RuntimeError};

/// Session token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User ID.
    pub uid: String,
    /// Username.
    pub usn: String,
    /// Session (token) ID.
    pub tid: String,
    /// Expiration timestamp.
    pub exp: i64,
    /// Session variables.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub vrs: HashMap<String, String>,
}

/// Signing and verification keys for session tokens (HS256).
#[derive(Clone)]
pub struct SessionKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionKeys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a session token.
    pub fn issue(&self, claims: &SessionClaims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
    }

    /// Verify a session token and return its claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, RuntimeError> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Session token validation failed: {}", e);
                RuntimeError::new(ErrorCode::Unauthenticated, "Auth token invalid")
            })
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl Module {
    /// Issue a session token the gateway accepts.
    ///
    /// `expires_at` is a Unix timestamp in seconds; without one the token
    /// lives for the configured expiry. Returns the token and its expiry.
    pub fn authenticate_token_generate(
        &self,
        user_id: &str,
        username: &str,
        expires_at: Option<i64>,
        vars: HashMap<String, String>,
    ) -> Result<(String, i64), RuntimeError> {
        let keys = self.session_keys.as_ref().ok_or_else(|| {
            RuntimeError::new(
                ErrorCode::FailedPrecondition,
                "session tokens are not configured",
            )
        })?;
        if uuid::Uuid::parse_str(user_id).is_err() {
            return Err(RuntimeError::invalid_argument(
                "expects user ID to be a valid identifier",
            ));
        }

        let now = chrono::Utc::now().timestamp();
        let exp = match expires_at {
            Some(exp) if exp <= now => {
                return Err(RuntimeError::invalid_argument(
                    "expiry must be in the future",
                ))
            }
            Some(exp) => exp,
            None => now + expiry_secs(self.token_expiry),
        };

        let claims = SessionClaims {
            uid: user_id.to_string(),
            usn: username.to_string(),
            tid: self.uuid_v4(),
            exp,
            vrs: vars,
        };
        let token = keys
            .issue(&claims)
            .map_err(|e| RuntimeError::internal(format!("failed to sign session token: {e}")))?;
        Ok((token, exp))
    }
}

fn expiry_secs(expiry: Duration) -> i64 {
    i64::try_from(expiry.as_secs()).unwrap_or(i64::MAX / 2)
}
