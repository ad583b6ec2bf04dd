//! Client for the external data-action service.
//!
//! Covers the fixed contract this gateway relies on: OAuth client-credentials
//! token acquisition (cached, single-flight refresh), input-schema fetch for
//! catalog registration, and action execution. Transient failures retry with
//! backoff; rate-limit responses honor `Retry-After`.

use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ActionServiceConfig;

/// Token expiry slack so a token is never used right at its deadline.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Errors from the action service.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action service is not configured")]
    NotConfigured,

    #[error("OAuth token acquisition failed: {0}")]
    TokenAcquisition(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Action service returned status {0}")]
    Status(u16),

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// HTTP client for the action service, shared across sessions.
pub struct ActionClient {
    config: ActionServiceConfig,
    http: reqwest::Client,
    /// Cached OAuth token; the Mutex doubles as single-flight for refresh
    token: Mutex<Option<CachedToken>>,
}

impl ActionClient {
    pub fn new(config: ActionServiceConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            token: Mutex::new(None),
        }
    }

    /// Whether credentials are configured at all.
    pub fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty()
            && self.config.client_id.is_some()
            && self.config.client_secret.is_some()
    }

    /// Dot-paths redacted from action results.
    pub fn redaction_fields(&self) -> &[String] {
        &self.config.redaction_fields
    }

    /// Get a valid access token, refreshing under the cache lock so
    /// concurrent sessions never issue duplicate refreshes.
    async fn get_token(&self) -> Result<String, ActionError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > Instant::now() + TOKEN_EXPIRY_SLACK
        {
            return Ok(cached.access_token.clone());
        }

        let client_id = self
            .config
            .client_id
            .as_ref()
            .ok_or(ActionError::NotConfigured)?;
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .ok_or(ActionError::NotConfigured)?;

        let response = self
            .http
            .post(format!("{}/oauth/token", self.config.login_url))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ActionError::TokenAcquisition(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ActionError::TokenAcquisition(format!(
                "status {}",
                response.status().as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ActionError::TokenAcquisition(e.to_string()))?;

        // Token lifetime is capped by the configured TTL ceiling
        let lifetime = body
            .expires_in
            .unwrap_or(self.config.token_ttl_secs)
            .min(self.config.token_ttl_secs);
        let token = body.access_token.clone();
        *guard = Some(CachedToken {
            access_token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        tracing::info!("Action service access token obtained");
        Ok(token)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ActionError> {
        if !self.is_configured() {
            return Err(ActionError::NotConfigured);
        }

        let url = format!("{}{path}", self.config.base_url);
        let mut last_error = ActionError::Http("no attempts made".to_string());

        for attempt in 0..=self.config.retry_max {
            if attempt > 0 {
                let backoff =
                    Duration::from_millis(self.config.retry_backoff_ms * (1 << (attempt - 1)));
                tokio::time::sleep(backoff).await;
            }

            let token = self.get_token().await?;
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header("Content-Type", "application/json");
            if let Some(body) = payload {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(attempt, %url, "Action request failed: {e}");
                    last_error = ActionError::Http(e.to_string());
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(1.0);
                tracing::warn!(%url, retry_after, "Action service rate limited");
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                last_error = ActionError::Status(429);
                continue;
            }

            if status.is_server_error() {
                tracing::warn!(status = status.as_u16(), %url, "Action service error");
                last_error = ActionError::Status(status.as_u16());
                continue;
            }

            if !status.is_success() {
                return Err(ActionError::Status(status.as_u16()));
            }

            return response
                .json()
                .await
                .map_err(|e| ActionError::InvalidResponse(e.to_string()));
        }

        Err(last_error)
    }

    /// Fetch the input schema for an action.
    pub async fn get_input_schema(
        &self,
        action_id: &str,
    ) -> Result<serde_json::Value, ActionError> {
        self.request(
            reqwest::Method::GET,
            &format!("/api/v2/integrations/actions/{action_id}/schemas/inputschema.json"),
            None,
        )
        .await
    }

    /// Execute an action with validated arguments.
    pub async fn execute(
        &self,
        action_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        self.request(
            reqwest::Method::POST,
            &format!("/api/v2/integrations/actions/{action_id}/test"),
            Some(payload),
        )
        .await
    }
}

/// Replace the configured dot-path fields in `payload` with `"[REDACTED]"`.
///
/// Missing paths are skipped; only object traversal is supported, matching
/// the shape of action results.
pub fn redact_payload(payload: &mut serde_json::Value, fields: &[String]) {
    for path in fields {
        let mut segments = path.split('.').peekable();
        let mut cursor = &mut *payload;
        loop {
            let Some(segment) = segments.next() else { break };
            if segments.peek().is_none() {
                if let Some(obj) = cursor.as_object_mut()
                    && obj.contains_key(segment)
                {
                    obj[segment] = serde_json::Value::String("[REDACTED]".to_string());
                }
                break;
            }
            match cursor.get_mut(segment) {
                Some(next) => cursor = next,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_top_level_field() {
        let mut payload = json!({"ssn": "123-45-6789", "name": "Jordan"});
        redact_payload(&mut payload, &["ssn".to_string()]);
        assert_eq!(payload["ssn"], "[REDACTED]");
        assert_eq!(payload["name"], "Jordan");
    }

    #[test]
    fn test_redact_nested_path() {
        let mut payload = json!({"customer": {"card": {"number": "4111"}}});
        redact_payload(&mut payload, &["customer.card.number".to_string()]);
        assert_eq!(payload["customer"]["card"]["number"], "[REDACTED]");
    }

    #[test]
    fn test_redact_missing_path_is_noop() {
        let mut payload = json!({"a": 1});
        redact_payload(&mut payload, &["b.c".to_string()]);
        assert_eq!(payload, json!({"a": 1}));
    }

    #[test]
    fn test_unconfigured_client() {
        let client = ActionClient::new(ActionServiceConfig::default());
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn test_execute_unconfigured_fails_fast() {
        let client = ActionClient::new(ActionServiceConfig::default());
        let result = client.execute("action-1", &json!({})).await;
        assert!(matches!(result, Err(ActionError::NotConfigured)));
    }
}
