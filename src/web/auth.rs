//! Caller authentication for the RPC gateway.
//!
//! A call is either server-to-server (the `http_key` query parameter) or
//! made by a user holding a session token in the `Authorization` header.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::runtime::context::HeaderMultiMap;
use crate::web::error::ApiError;

pub use crate::runtime::module::{SessionClaims, SessionKeys};

/// Query parameter carrying the server key.
pub const HTTP_KEY_PARAM: &str = "http_key";

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Caller {
    /// Server-to-server call with the configured key. No user.
    Server,
    /// User with a valid session.
    User(SessionClaims),
}

/// Compare server keys without leaking the position of the first mismatch.
fn keys_match(presented: &str, expected: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(presented.as_bytes(), expected.as_bytes()).is_ok()
}

/// Authenticate a request from its headers and query parameters.
///
/// The server key takes precedence over a bearer token when both are sent.
pub fn authenticate(
    headers: &HeaderMap,
    query: &HeaderMultiMap,
    http_key: &str,
    keys: &SessionKeys,
) -> Result<Caller, ApiError> {
    if let Some(key) = query.get(HTTP_KEY_PARAM) {
        return if keys_match(key, http_key) {
            Ok(Caller::Server)
        } else {
            Err(ApiError::unauthenticated("Server key invalid"))
        };
    }

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthenticated("Auth token or HTTP key required"))?;

    keys.verify(token.trim())
        .map(Caller::User)
        .map_err(ApiError::from)
}
