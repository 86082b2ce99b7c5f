//! RPC gateway tests.

mod common;

use std::sync::Arc;

use axum::http::header::{ACCEPT_LANGUAGE, AUTHORIZATION};
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;

use common::{lua_dispatcher, lua_dispatcher_with, GAME_MODULE};
use linna::config::ServerConfig;
use linna::runtime::Module;
use linna::web::{create_router, Gateway, GatewayState, SessionClaims, SessionKeys};

const HTTP_KEY: &str = "test-http-key";
const SESSION_SECRET: &str = "test-session-secret";

const INSPECT_MODULE: &str = r#"
return function(ctx, logger, nk, initializer)
  initializer:register_rpc("inspect", function(ctx, logger, nk, payload)
    return nk.json_encode({
      query = ctx.query_params,
      has_authorization = ctx.headers.authorization ~= nil,
      client = ctx.headers["x-client"],
      vars = ctx.vars,
      exp = ctx.user_session_exp,
      client_ip = ctx.client_ip,
    })
  end)
end
"#;

/// Create a test server over the game and inspect modules.
fn create_test_server() -> (TestServer, TempDir) {
    let (dispatcher, dir) =
        lua_dispatcher(&[("game.lua", GAME_MODULE), ("inspect.lua", INSPECT_MODULE)]);
    let state = Arc::new(GatewayState {
        dispatcher,
        http_key: HTTP_KEY.to_string(),
        session_keys: SessionKeys::new(SESSION_SECRET),
    });

    let server = TestServer::new(create_router(state)).expect("Failed to create test server");
    (server, dir)
}

fn session_token(exp: i64) -> String {
    let claims = SessionClaims {
        uid: "user-1".to_string(),
        usn: "ada".to_string(),
        tid: "session-1".to_string(),
        exp,
        vrs: [("tier".to_string(), "gold".to_string())].into(),
    };
    SessionKeys::new(SESSION_SECRET).issue(&claims).unwrap()
}

fn future_exp() -> i64 {
    chrono::Utc::now().timestamp() + 3600
}

#[tokio::test(flavor = "multi_thread")]
async fn test_healthcheck() {
    let (server, _dir) = create_test_server();
    server.get("/healthcheck").await.assert_status_ok();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_credentials_unauthorized() {
    let (server, _dir) = create_test_server();

    let response = server.post("/v2/rpc/echo").text("hello").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], 16);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_http_key_unauthorized() {
    let (server, _dir) = create_test_server();
    let response = server
        .post("/v2/rpc/echo")
        .add_query_param("http_key", "wrong")
        .text("hello")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_key_post_echo() {
    let (server, _dir) = create_test_server();

    let response = server
        .post("/v2/rpc/echo")
        .add_query_param("http_key", HTTP_KEY)
        .text(r#"{"score":10}"#)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["id"], "echo");
    assert_eq!(body["payload"], r#"{"score":10}"#);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_uses_payload_query_param() {
    let (server, _dir) = create_test_server();

    let response = server
        .get("/v2/rpc/echo")
        .add_query_param("http_key", HTTP_KEY)
        .add_query_param("payload", "from-query")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["payload"], "from-query");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_token_fills_context() {
    let (server, _dir) = create_test_server();

    let response = server
        .post("/v2/rpc/whoami")
        .add_header(AUTHORIZATION, format!("Bearer {}", session_token(future_exp())))
        .add_header(ACCEPT_LANGUAGE, "fr-FR,fr;q=0.9")
        .text("")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let payload: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload["user_id"], "user-1");
    assert_eq!(payload["session_id"], "session-1");
    assert_eq!(payload["lang"], "fr-FR");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_expired_session_unauthorized() {
    let (server, _dir) = create_test_server();
    let expired = chrono::Utc::now().timestamp() - 3600;

    let response = server
        .post("/v2/rpc/echo")
        .add_header(AUTHORIZATION, format!("Bearer {}", session_token(expired)))
        .text("")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_credentials_are_not_forwarded() {
    let (server, _dir) = create_test_server();
    let exp = future_exp();

    let response = server
        .post("/v2/rpc/inspect")
        .add_header(AUTHORIZATION, format!("Bearer {}", session_token(exp)))
        .add_header("x-client", "unity")
        .add_query_param("season", "3")
        .text("")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let payload: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload["has_authorization"], false);
    assert_eq!(payload["client"][0], "unity");
    assert_eq!(payload["query"]["season"][0], "3");
    assert_eq!(payload["vars"]["tier"], "gold");
    assert_eq!(payload["exp"], exp);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_key_not_in_query_params() {
    let (server, _dir) = create_test_server();

    let response = server
        .post("/v2/rpc/inspect")
        .add_query_param("http_key", HTTP_KEY)
        .add_query_param("season", "3")
        .text("")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let payload: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert!(payload["query"].get("http_key").is_none());
    assert_eq!(payload["query"]["season"][0], "3");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_codes_map_to_http_status() {
    let (server, _dir) = create_test_server();

    let response = server
        .post("/v2/rpc/forbidden")
        .add_query_param("http_key", HTTP_KEY)
        .text("")
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["code"], 7);
    assert_eq!(body["message"], "not allowed");

    let response = server
        .post("/v2/rpc/missing")
        .add_query_param("http_key", HTTP_KEY)
        .text("")
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], 5);
}

const LOGIN_MODULE: &str = r#"
return function(ctx, logger, nk, initializer)
  initializer:register_rpc("login", function(ctx, logger, nk, payload)
    local request = nk.json_decode(payload)
    local user_id, username, created = nk.authenticate(request.device, request.username, true)
    local token, exp = nk.authenticate_token_generate(user_id, username, nil, { tier = "gold" })
    return nk.json_encode({ user_id = user_id, created = created, token = token, exp = exp })
  end)
end
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_script_issued_session_is_accepted() {
    let module = Arc::new(
        Module::builder()
            .session_keys(SessionKeys::new(SESSION_SECRET))
            .build()
            .unwrap(),
    );
    let (dispatcher, _dir) =
        lua_dispatcher_with(module, &[("game.lua", GAME_MODULE), ("login.lua", LOGIN_MODULE)]);
    let state = Arc::new(GatewayState {
        dispatcher,
        http_key: HTTP_KEY.to_string(),
        session_keys: SessionKeys::new(SESSION_SECRET),
    });
    let server = TestServer::new(create_router(state)).unwrap();

    let login = |device: &'static str| {
        server
            .post("/v2/rpc/login")
            .add_query_param("http_key", HTTP_KEY)
            .text(format!(r#"{{"device":"{device}","username":"ada"}}"#))
    };
    let body: Value = login("device-000001").await.json();
    let first: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(first["created"], true);

    let body: Value = login("device-000001").await.json();
    let again: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(again["created"], false);
    assert_eq!(again["user_id"], first["user_id"]);

    let token = again["token"].as_str().unwrap();
    let response = server
        .post("/v2/rpc/whoami")
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .text("")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let whoami: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(whoami["user_id"], first["user_id"]);

    // A second device cannot take the same username.
    let response = login("device-000002").await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gateway_serves_on_bound_port() {
    let (dispatcher, _dir) =
        lua_dispatcher(&[("game.lua", GAME_MODULE), ("inspect.lua", INSPECT_MODULE)]);
    let state = GatewayState {
        dispatcher,
        http_key: HTTP_KEY.to_string(),
        session_keys: SessionKeys::new(SESSION_SECRET),
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
    };

    let gateway = Gateway::new(&config, state).unwrap();
    assert_eq!(gateway.addr().port(), 0);
    let addr = gateway.run_with_addr().await.unwrap();
    assert_ne!(addr.port(), 0);

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/v2/rpc/inspect?http_key={HTTP_KEY}"))
        .body("")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    let payload: Value = serde_json::from_str(body["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload["client_ip"], "127.0.0.1");

    let response = client
        .get(format!("http://{addr}/healthcheck"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let bad = ServerConfig {
        host: "not an address".to_string(),
        port: 0,
    };
    let (dispatcher, _dir) = lua_dispatcher(&[("game.lua", GAME_MODULE)]);
    let state = GatewayState {
        dispatcher,
        http_key: HTTP_KEY.to_string(),
        session_keys: SessionKeys::new(SESSION_SECRET),
    };
    assert!(Gateway::new(&bad, state).is_err());
}
