//! Telephony connection authentication.
//!
//! The platform authenticates with a shared secret in the `x-api-key`
//! header and identifies the connection with `audiohook-*` headers. The
//! secret comparison is constant time.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::errors::AuthError;
use crate::state::AppState;

/// Headers the platform must send on the telephony WebSocket upgrade.
const REQUIRED_HEADERS: [&str; 3] = [
    "audiohook-organization-id",
    "audiohook-correlation-id",
    "audiohook-session-id",
];

/// Validate the shared secret and protocol headers before the WebSocket
/// upgrade.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let expected = state.config.telephony_api_key.as_bytes();
    if expected.is_empty() {
        return Err(AuthError::ConfigError(
            "telephony API key not configured".to_string(),
        ));
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingApiKey)?;

    if !bool::from(provided.as_bytes().ct_eq(expected)) {
        tracing::warn!("Telephony connection rejected: API key mismatch");
        return Err(AuthError::InvalidApiKey);
    }

    for header in REQUIRED_HEADERS {
        if !request.headers().contains_key(header) {
            tracing::warn!(header, "Telephony connection missing protocol header");
            return Err(AuthError::MissingRequiredHeader(header.to_string()));
        }
    }

    tracing::debug!("Telephony connection authenticated");
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    fn app(api_key: &str) -> Router {
        let state = Arc::new(AppState::new(ServerConfig {
            telephony_api_key: api_key.to_string(),
            ..Default::default()
        }));
        Router::new()
            .route("/audiohook", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state)
    }

    fn request(key: Option<&str>, with_protocol_headers: bool) -> Request<Body> {
        let mut builder = Request::builder().uri("/audiohook");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        if with_protocol_headers {
            builder = builder
                .header("audiohook-organization-id", "org-1")
                .header("audiohook-correlation-id", "corr-1")
                .header("audiohook-session-id", "sess-1");
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_valid_key_accepted() {
        let response = app("secret")
            .oneshot(request(Some("secret"), true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let response = app("secret").oneshot(request(None, true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let response = app("secret")
            .oneshot(request(Some("wrong"), true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_protocol_headers_rejected() {
        let response = app("secret")
            .oneshot(request(Some("secret"), false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
