//! Error types shared across the gateway.
//!
//! Component-local failures (vendor transport, tool execution) live next to
//! their components; this module holds the errors that cross the HTTP/WebSocket
//! boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised while authenticating an incoming telephony connection.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The shared-secret header is absent
    #[error("Missing 'x-api-key' header")]
    MissingApiKey,

    /// The shared-secret header does not match the configured secret
    #[error("Invalid API key")]
    InvalidApiKey,

    /// A required telephony protocol header is absent
    #[error("Missing required header: {0}")]
    MissingRequiredHeader(String),

    /// Authentication is required but no secret is configured
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingApiKey | AuthError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            AuthError::MissingRequiredHeader(_) => StatusCode::BAD_REQUEST,
            AuthError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
