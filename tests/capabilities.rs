//! Capability module tests against real endpoints, keys and databases.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{json, Value};

use common::{lua_dispatcher_with, test_module};
use linna::config::DatabaseConfig;
use linna::db;
use linna::runtime::module::HttpMethod;
use linna::runtime::{ErrorCode, InboundRequest, Module};

const RSA_PRIVATE_KEY: &str = include_str!("fixtures/rsa_private.pem");
const RSA_PUBLIC_KEY: &str = include_str!("fixtures/rsa_public.pem");

/// Serve a small HTTP API on a random local port.
async fn spawn_http_server() -> String {
    let app = Router::new()
        .route("/hello", get(|| async { "world" }))
        .route(
            "/created",
            get(|| async { (StatusCode::CREATED, [("x-game", "linna")], "made") }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "nothing here") }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_request_returns_status_headers_and_body() {
    let base = spawn_http_server().await;
    let nk = test_module();

    let res = nk
        .http_request(
            &format!("{base}/created"),
            HttpMethod::Get,
            &HashMap::new(),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(res.code, 201);
    assert_eq!(res.body, "made");
    assert_eq!(res.headers.get("x-game"), Some("linna"));

    // Non-2xx is a normal response.
    let res = nk
        .http_request(
            &format!("{base}/missing"),
            HttpMethod::Get,
            &HashMap::new(),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(res.code, 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_request_timeout_is_deadline_exceeded() {
    // Accepts connections at the TCP level but never answers.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let err = test_module()
        .http_request(
            &format!("http://{addr}/slow"),
            HttpMethod::Get,
            &HashMap::new(),
            None,
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DeadlineExceeded);
    drop(listener);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lua_http_request() {
    let base = spawn_http_server().await;
    let module = r#"
return function(ctx, logger, nk, initializer)
  initializer:register_rpc("fetch", function(ctx, logger, nk, payload)
    local res = nk.http_request(payload, "get")
    return res.code .. ":" .. res.body
  end)
end
"#;
    let (dispatcher, _dir) = lua_dispatcher_with(test_module(), &[("fetch.lua", module)]);

    let out = dispatcher
        .dispatch(InboundRequest::new("fetch", format!("{base}/hello")))
        .await
        .unwrap();
    assert_eq!(out, "200:world");

    let err = dispatcher
        .dispatch(InboundRequest::new("fetch", "ftp://example.com/file"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
}

#[test]
fn test_jwt_generate_rs256_verifies_with_public_key() {
    let nk = test_module();
    let exp = chrono::Utc::now().timestamp() + 600;
    let claims = json!({ "sub": "user-1", "exp": exp });

    let token = nk
        .jwt_generate("RS256", RSA_PRIVATE_KEY, claims.as_object().unwrap())
        .unwrap();

    let key = DecodingKey::from_rsa_pem(RSA_PUBLIC_KEY.as_bytes()).unwrap();
    let data = jsonwebtoken::decode::<Value>(
        &token,
        &key,
        &Validation::new(jsonwebtoken::Algorithm::RS256),
    )
    .unwrap();
    assert_eq!(data.claims["sub"], "user-1");
}

#[test]
fn test_rsa_sha256_signature_verifies() {
    let nk = test_module();
    let signature = nk.rsa_sha256_hash("match-result", RSA_PRIVATE_KEY).unwrap();

    // PKCS#1 v1.5 signatures are deterministic.
    assert_eq!(
        signature,
        nk.rsa_sha256_hash("match-result", RSA_PRIVATE_KEY).unwrap()
    );

    let raw = general_purpose::STANDARD.decode(&signature).unwrap();
    assert_eq!(raw.len(), 256);
    let url_safe = general_purpose::URL_SAFE_NO_PAD.encode(raw);
    let key = DecodingKey::from_rsa_pem(RSA_PUBLIC_KEY.as_bytes()).unwrap();
    assert!(jsonwebtoken::crypto::verify(
        &url_safe,
        b"match-result",
        &key,
        jsonwebtoken::Algorithm::RS256
    )
    .unwrap());
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread")]
async fn test_lua_sql_roundtrip() {
    let pool = db::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    })
    .await
    .unwrap();
    let nk = Arc::new(Module::builder().database(pool).build().unwrap());

    let module = r#"
return function(ctx, logger, nk, initializer)
  nk.sql_exec("CREATE TABLE scores (player TEXT NOT NULL, score INTEGER NOT NULL)")

  initializer:register_rpc("submit", function(ctx, logger, nk, payload)
    local entry = nk.json_decode(payload)
    return tostring(nk.sql_exec("INSERT INTO scores (player, score) VALUES (?, ?)",
      { entry.player, entry.score }))
  end)

  initializer:register_rpc("top", function(ctx, logger, nk, payload)
    local rows = nk.sql_query("SELECT player, score FROM scores ORDER BY score DESC LIMIT 1")
    return rows[1].player .. "=" .. rows[1].score
  end)
end
"#;
    let (dispatcher, _dir) = lua_dispatcher_with(Arc::clone(&nk), &[("scores.lua", module)]);

    for (player, score) in [("ada", 30), ("grace", 50), ("linus", 10)] {
        let payload = json!({ "player": player, "score": score }).to_string();
        let out = dispatcher
            .dispatch(InboundRequest::new("submit", payload))
            .await
            .unwrap();
        assert_eq!(out, "1");
    }

    let out = dispatcher
        .dispatch(InboundRequest::new("top", ""))
        .await
        .unwrap();
    assert_eq!(out, "grace=50");

    let rows = nk.sql_query("SELECT COUNT(*) AS n FROM scores", &[]).await.unwrap();
    assert_eq!(rows[0]["n"], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lua_sql_without_database_is_unavailable() {
    let module = r#"
return function(ctx, logger, nk, initializer)
  initializer:register_rpc("count", function(ctx, logger, nk, payload)
    return nk.sql_query("SELECT 1")
  end)
end
"#;
    let (dispatcher, _dir) = lua_dispatcher_with(test_module(), &[("count.lua", module)]);
    let err = dispatcher
        .dispatch(InboundRequest::new("count", ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unavailable);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lua_sql_failure_hides_driver_detail() {
    let pool = db::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    })
    .await
    .unwrap();
    let nk = Arc::new(Module::builder().database(pool).build().unwrap());

    let module = r#"
return function(ctx, logger, nk, initializer)
  initializer:register_rpc("peek", function(ctx, logger, nk, payload)
    return nk.sql_query("SELECT password FROM internal_accounts")
  end)
end
"#;
    let (dispatcher, _dir) = lua_dispatcher_with(nk, &[("peek.lua", module)]);
    let err = dispatcher
        .dispatch(InboundRequest::new("peek", ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(err.message, "failed to run query");
}
