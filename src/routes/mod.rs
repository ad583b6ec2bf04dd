//! Route configuration.
//!
//! The telephony WebSocket endpoint sits behind the shared-secret auth
//! middleware; the health endpoint is open.

use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{audiohook_handler, health_check};
use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let telephony = Router::new()
        .route(&state.config.telephony_path, get(audiohook_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(telephony)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_open() {
        let state = Arc::new(AppState::new(ServerConfig {
            telephony_api_key: "secret".to_string(),
            ..Default::default()
        }));
        let router = create_router(state);
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_telephony_requires_auth() {
        let state = Arc::new(AppState::new(ServerConfig {
            telephony_api_key: "secret".to_string(),
            ..Default::default()
        }));
        let router = create_router(state);
        let response = router
            .oneshot(Request::get("/audiohook").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
