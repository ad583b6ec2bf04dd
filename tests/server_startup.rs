//! Server Startup Tests
//!
//! Tests for router wiring and startup behavior: the health endpoint, the
//! authenticated telephony WebSocket route, and session store bookkeeping.

use std::sync::Arc;
use std::time::SystemTime;

use axum::{body::Body, http::Request};
use serde_json::Value;
use tower::util::ServiceExt;

use callbridge_gateway::store::SessionRecord;
use callbridge_gateway::{ServerConfig, routes::create_router, state::AppState};

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        telephony_api_key: "test-secret".to_string(),
        openai_api_key: Some("test-openai-key".to_string()),
        ..Default::default()
    }
}

fn upgrade_request(api_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/audiohook")
        .header("upgrade", "websocket")
        .header("connection", "upgrade")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .header("sec-websocket-version", "13")
        .header("audiohook-organization-id", "org-1")
        .header("audiohook-correlation-id", "corr-1")
        .header("audiohook-session-id", "sess-1");
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint_reports_status() {
    let state = Arc::new(AppState::new(test_config()));
    let app = create_router(state);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["tracked_sessions"], 0);
}

#[tokio::test]
async fn test_telephony_route_rejects_missing_key() {
    let state = Arc::new(AppState::new(test_config()));
    let app = create_router(state);

    let response = app.oneshot(upgrade_request(None)).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_telephony_route_accepts_valid_upgrade() {
    let state = Arc::new(AppState::new(test_config()));
    let app = create_router(state);

    let response = app
        .oneshot(upgrade_request(Some("test-secret")))
        .await
        .unwrap();
    // The upgrade itself cannot complete under oneshot, but the route must
    // exist and pass authentication
    assert_ne!(response.status(), axum::http::StatusCode::NOT_FOUND);
    assert_ne!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_custom_telephony_path() {
    let config = ServerConfig {
        telephony_path: "/voice/stream".to_string(),
        ..test_config()
    };
    let state = Arc::new(AppState::new(config));
    let app = create_router(state);

    // The default path is gone
    let response = app
        .clone()
        .oneshot(upgrade_request(Some("test-secret")))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_store_tracks_health_count() {
    let state = Arc::new(AppState::new(test_config()));
    state
        .sessions
        .insert(SessionRecord {
            session_id: "sess-1".to_string(),
            conversation_id: "conv-1".to_string(),
            state: "active".to_string(),
            backend: "openai".to_string(),
            started_at: SystemTime::now(),
            outcome: None,
        })
        .await;
    state.sessions.run_pending_tasks().await;

    let app = create_router(state.clone());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["tracked_sessions"], 1);
}
