//! Router and handlers for the RPC gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, RawQuery, State},
    http::{header::ACCEPT_LANGUAGE, header::AUTHORIZATION, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::auth::{authenticate, Caller, SessionKeys, HTTP_KEY_PARAM};
use super::error::ApiError;
use crate::runtime::context::{ExecutionMode, HeaderMultiMap, InboundRequest};
use crate::runtime::dispatcher::Dispatcher;

/// Language used when the caller names none.
const DEFAULT_LANG: &str = "en";

/// Shared gateway state.
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub http_key: String,
    pub session_keys: SessionKeys,
}

/// RPC response body.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: String,
    pub payload: String,
}

/// Create the gateway router.
pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v2/rpc/:id", post(rpc_post).get(rpc_get))
        .route("/healthcheck", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}

async fn rpc_post(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: String,
) -> Result<Json<RpcResponse>, ApiError> {
    let query = parse_query(query.as_deref());
    invoke(&state, id, body, query, &headers, peer.map(|p| p.0)).await
}

async fn rpc_get(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Json<RpcResponse>, ApiError> {
    let query = parse_query(query.as_deref());
    let payload = query.get("payload").unwrap_or_default().to_string();
    invoke(&state, id, payload, query, &headers, peer.map(|p| p.0)).await
}

async fn invoke(
    state: &GatewayState,
    id: String,
    payload: String,
    query: HeaderMultiMap,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Result<Json<RpcResponse>, ApiError> {
    let caller = authenticate(headers, &query, &state.http_key, &state.session_keys)?;

    let mut request = InboundRequest::new(id.clone(), payload);
    request.mode = ExecutionMode::Rpc;
    request.lang = request_lang(&query, headers);
    request.headers = forwarded_headers(headers);
    request.query_params = query
        .iter()
        .filter(|(k, _)| k.as_str() != HTTP_KEY_PARAM)
        .flat_map(|(k, values)| values.iter().map(move |v| (k.clone(), v.clone())))
        .collect();
    if let Some(peer) = peer {
        request.client_ip = peer.ip().to_string();
        request.client_port = peer.port().to_string();
    }
    if let Caller::User(claims) = caller {
        request.user_id = claims.uid;
        request.username = claims.usn;
        request.session_id = claims.tid;
        request.session_exp = claims.exp;
        request.vars = claims.vrs;
    }

    let payload = state.dispatcher.dispatch(request).await?;
    Ok(Json(RpcResponse { id, payload }))
}

fn parse_query(query: Option<&str>) -> HeaderMultiMap {
    url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Request headers handed to functions. Credentials are not forwarded.
fn forwarded_headers(headers: &HeaderMap) -> HeaderMultiMap {
    headers
        .iter()
        .filter(|(name, _)| **name != AUTHORIZATION)
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect()
}

/// `lang` query parameter, else the first `Accept-Language` tag.
fn request_lang(query: &HeaderMultiMap, headers: &HeaderMap) -> String {
    if let Some(lang) = query.get("lang").filter(|l| !l.is_empty()) {
        return lang.to_string();
    }

    headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .unwrap_or(DEFAULT_LANG)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_keeps_repeats() {
        let query = parse_query(Some("a=1&b=x%20y&a=2"));
        assert_eq!(query.get_all("a"), ["1", "2"]);
        assert_eq!(query.get("b"), Some("x y"));
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_request_lang() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_lang(&HeaderMultiMap::new(), &headers), "en");

        headers.insert(ACCEPT_LANGUAGE, "fr-CH, fr;q=0.9, en;q=0.8".parse().unwrap());
        assert_eq!(request_lang(&HeaderMultiMap::new(), &headers), "fr-CH");

        let query = parse_query(Some("lang=ja"));
        assert_eq!(request_lang(&query, &headers), "ja");
    }

    #[test]
    fn test_forwarded_headers_drop_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer x".parse().unwrap());
        headers.insert("x-client", "game".parse().unwrap());
        let forwarded = forwarded_headers(&headers);
        assert!(!forwarded.contains_key("authorization"));
        assert_eq!(forwarded.get("x-client"), Some("game"));
    }
}
