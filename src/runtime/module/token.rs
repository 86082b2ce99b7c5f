//! Signed-claims token issuance.

use std::str::FromStr;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};

use super::Module;
use crate::runtime::error::RuntimeError;

fn signing_key(algorithm: Algorithm, key: &str) -> Result<EncodingKey, RuntimeError> {
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            if key.is_empty() {
                return Err(RuntimeError::invalid_argument(
                    "signing key must not be empty",
                ));
            }
            Ok(EncodingKey::from_secret(key.as_bytes()))
        }
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
            EncodingKey::from_rsa_pem(key.as_bytes()).map_err(|e| {
                RuntimeError::invalid_argument(format!("invalid RSA signing key: {e}"))
            })
        }
        other => Err(RuntimeError::invalid_argument(format!(
            "unsupported signing algorithm: {other:?}"
        ))),
    }
}

impl Module {
    /// Sign `claims` as a JWT.
    ///
    /// Supports HS256/384/512 with a shared secret and RS256/384/512 with a
    /// PEM private key.
    pub fn jwt_generate(
        &self,
        algorithm: &str,
        signing_key_text: &str,
        claims: &Map<String, Value>,
    ) -> Result<String, RuntimeError> {
        let algorithm = Algorithm::from_str(&algorithm.to_uppercase()).map_err(|_| {
            RuntimeError::invalid_argument(format!("unsupported signing algorithm: {algorithm}"))
        })?;
        let key = signing_key(algorithm, signing_key_text)?;

        encode(&Header::new(algorithm), claims, &key)
            .map_err(|e| RuntimeError::invalid_argument(format!("failed to sign token: {e}")))
    }
}
