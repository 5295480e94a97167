//! Integration tests for the `/auth/*` REST surface in auth-disabled mode
//! (no live OIDC provider is exercised here — that's `JwksVerifier`'s job,
//! covered by unit tests in `src/server/auth.rs`).

#![cfg(feature = "coordinator")]

use a2a_rs::config::AuthConfig;
use a2a_rs::server::{auth_router, verifier_for, AuthRoutesState, SessionStore};
use std::sync::Arc;
use std::time::Duration;

async fn start_auth_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let config = AuthConfig::default();
    let verifier = verifier_for(&config);
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(60)));
    let state = AuthRoutesState::new(config, "http://unused.invalid/token".to_string(), verifier, sessions);
    let app = auth_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    base_url
}

#[tokio::test]
async fn status_reports_disabled_by_default() {
    let base_url = start_auth_server().await;
    let client = reqwest::Client::new();
    let status: serde_json::Value = client
        .get(format!("{base_url}/auth/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["enabled"], false);
}

#[tokio::test]
async fn me_accepts_any_bearer_token_with_noop_verifier() {
    let base_url = start_auth_server().await;
    let client = reqwest::Client::new();
    let me: serde_json::Value = client
        .get(format!("{base_url}/auth/me"))
        .bearer_auth("anything")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["sub"], "test-user");
}

#[tokio::test]
async fn me_rejects_missing_bearer_token() {
    let base_url = start_auth_server().await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("{base_url}/auth/me")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn logout_is_always_acknowledged() {
    let base_url = start_auth_server().await;
    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(format!("{base_url}/auth/logout"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["success"], true);
}

/// A minimal stand-in OIDC token endpoint, so login/refresh can be exercised
/// end to end without a live provider (no HTTP-mocking crate in the
/// dependency stack — a real local listener stands in instead, same as the
/// coordinator's own integration tests do for its REST surface).
async fn start_fake_token_endpoint() -> String {
    use axum::routing::post;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().route(
        "/token",
        post(|| async {
            axum::Json(serde_json::json!({
                "access_token": "fake-access-token",
                "refresh_token": "fake-refresh-token",
                "expires_in": 3600,
            }))
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    format!("http://{}/token", addr)
}

#[tokio::test]
async fn login_records_a_user_session() {
    let token_endpoint = start_fake_token_endpoint().await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let config = AuthConfig::default();
    let verifier = verifier_for(&config);
    let sessions = Arc::new(SessionStore::new(Duration::from_secs(60)));
    let state = AuthRoutesState::new(config, token_endpoint, verifier, sessions.clone());
    let app = auth_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(sessions.len().await, 0);

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .post(format!("{base_url}/auth/login"))
        .json(&serde_json::json!({"username": "alice", "password": "secret"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["access_token"], "fake-access-token");
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert_eq!(sessions.len().await, 1);
    assert!(sessions.get(&session_id).await.is_some());

    client
        .post(format!("{base_url}/auth/logout"))
        .json(&serde_json::json!({"session_id": session_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(sessions.len().await, 0);
}
