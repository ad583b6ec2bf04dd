//! Configuration module for the Callbridge gateway.
//!
//! Configuration is loaded from environment variables (with `.env` support via
//! `dotenvy` in `main`). Every tunable has a default so a development instance
//! only needs the shared secret and one vendor API key.
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;

mod prompt;

pub use prompt::{MASTER_SYSTEM_PROMPT, assemble_instructions};

/// Default telephony playout interval between outbound audio frames.
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 150;

/// Default playback buffer capacity in seconds of audio.
pub const DEFAULT_BUFFER_SECONDS: u64 = 180;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVariable(&'static str),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Policy for reconnecting a dropped vendor connection.
///
/// Exponential backoff: `initial_delay * multiplier^(attempt-1)`, capped at
/// `max_delay`, with optional jitter of up to 25%.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts before giving up.
    pub max_attempts: u32,
    /// Initial delay between reconnection attempts (milliseconds).
    pub initial_delay_ms: u64,
    /// Maximum delay between reconnection attempts (milliseconds).
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to the delay to prevent thundering herd.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Check if another reconnection attempt is allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculate the delay before a given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay_ms as f64);
        let delay = if self.jitter {
            capped + jitter_offset(capped * 0.25)
        } else {
            capped
        };
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// Pseudo-random jitter via a simple LCG seeded from the clock.
/// Avoids pulling in the rand crate for this one use.
fn jitter_offset(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

/// Limits applied to model tool calls within one session.
#[derive(Debug, Clone)]
pub struct ToolLimits {
    /// Maximum data-action tools registered per session.
    pub max_tools_per_session: usize,
    /// Maximum data-action invocations across the whole session.
    pub max_calls_per_session: u32,
    /// Maximum serialized argument payload, in bytes.
    pub max_argument_bytes: usize,
    /// Sliding-window rate limit: calls allowed per window.
    pub rate_limit_per_window: u32,
    /// Sliding-window length in seconds.
    pub rate_window_secs: u64,
    /// Maximum sequential tool hops within one model turn.
    pub hop_limit: u32,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_tools_per_session: 10,
            max_calls_per_session: 20,
            max_argument_bytes: 8 * 1024,
            rate_limit_per_window: 6,
            rate_window_secs: 60,
            hop_limit: 3,
        }
    }
}

/// Connection settings for the external data-action service.
#[derive(Debug, Clone, Default)]
pub struct ActionServiceConfig {
    /// Base API URL, e.g. `https://api.example.com`.
    pub base_url: String,
    /// OAuth token endpoint base URL.
    pub login_url: String,
    /// OAuth client-credentials id.
    pub client_id: Option<String>,
    /// OAuth client-credentials secret.
    pub client_secret: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum HTTP retries for transient failures.
    pub retry_max: u32,
    /// Base backoff between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Ceiling on cached OAuth token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Dot-paths redacted from action results before they reach the model.
    pub redaction_fields: Vec<String>,
}

/// Server configuration.
///
/// Covers the telephony endpoint (listen address, shared secret, playout
/// pacing), vendor API keys and defaults, tool limits, and the data-action
/// service connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// WebSocket path the telephony platform connects to.
    pub telephony_path: String,
    /// Shared secret expected in the `x-api-key` header.
    pub telephony_api_key: String,

    // Vendor API keys
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,

    // Vendor defaults (overridable per call via input variables)
    pub default_backend: String,
    pub default_model: Option<String>,
    pub default_voice: Option<String>,
    pub default_agent_name: String,
    pub default_company_name: String,

    // Audio pacing
    /// Interval between outbound telephony frames (milliseconds).
    pub frame_interval_ms: u64,
    /// Playback buffer capacity in seconds of audio.
    pub buffer_seconds: u64,
    /// Outbound control messages per second.
    pub message_rate_limit: u32,
    /// Outbound binary frames per second.
    pub binary_rate_limit: u32,
    /// Burst allowance for both outbound limiters.
    pub rate_burst_limit: u32,

    // Policies
    pub reconnect: ReconnectPolicy,
    pub tool_limits: ToolLimits,
    pub action_service: ActionServiceConfig,

    /// TTL for session store entries, in seconds.
    pub session_store_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            telephony_path: "/audiohook".to_string(),
            telephony_api_key: String::new(),
            openai_api_key: None,
            gemini_api_key: None,
            default_backend: "openai".to_string(),
            default_model: None,
            default_voice: None,
            default_agent_name: "AI Assistant".to_string(),
            default_company_name: "Our Company".to_string(),
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            message_rate_limit: 5,
            binary_rate_limit: 10,
            rate_burst_limit: 25,
            reconnect: ReconnectPolicy::default(),
            tool_limits: ToolLimits::default(),
            action_service: ActionServiceConfig {
                timeout_secs: 10,
                retry_max: 2,
                retry_backoff_ms: 500,
                token_ttl_secs: 900,
                ..Default::default()
            },
            session_store_ttl_secs: 3_600,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// `TELEPHONY_API_KEY` is mandatory; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.port = parse_var("PORT", &port)?;
        }
        if let Ok(path) = std::env::var("TELEPHONY_PATH") {
            config.telephony_path = path;
        }

        config.telephony_api_key = std::env::var("TELEPHONY_API_KEY")
            .map_err(|_| ConfigError::MissingVariable("TELEPHONY_API_KEY"))?;
        if config.telephony_api_key.is_empty() {
            return Err(ConfigError::MissingVariable("TELEPHONY_API_KEY"));
        }

        config.openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty());
        config.gemini_api_key = std::env::var("GEMINI_API_KEY").ok().filter(|v| !v.is_empty());

        if let Ok(backend) = std::env::var("DEFAULT_BACKEND") {
            config.default_backend = backend;
        }
        config.default_model = std::env::var("DEFAULT_MODEL").ok().filter(|v| !v.is_empty());
        config.default_voice = std::env::var("DEFAULT_VOICE").ok().filter(|v| !v.is_empty());
        if let Ok(name) = std::env::var("AGENT_NAME") {
            config.default_agent_name = name;
        }
        if let Ok(name) = std::env::var("COMPANY_NAME") {
            config.default_company_name = name;
        }

        if let Ok(value) = std::env::var("FRAME_INTERVAL_MS") {
            config.frame_interval_ms = parse_var("FRAME_INTERVAL_MS", &value)?;
        }
        if let Ok(value) = std::env::var("BUFFER_SECONDS") {
            config.buffer_seconds = parse_var("BUFFER_SECONDS", &value)?;
        }
        if let Ok(value) = std::env::var("MESSAGE_RATE_LIMIT") {
            config.message_rate_limit = parse_var("MESSAGE_RATE_LIMIT", &value)?;
        }
        if let Ok(value) = std::env::var("BINARY_RATE_LIMIT") {
            config.binary_rate_limit = parse_var("BINARY_RATE_LIMIT", &value)?;
        }
        if let Ok(value) = std::env::var("RATE_BURST_LIMIT") {
            config.rate_burst_limit = parse_var("RATE_BURST_LIMIT", &value)?;
        }

        if let Ok(value) = std::env::var("VENDOR_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = parse_var("VENDOR_RECONNECT_MAX_ATTEMPTS", &value)?;
        }
        if let Ok(value) = std::env::var("VENDOR_RECONNECT_INITIAL_DELAY_MS") {
            config.reconnect.initial_delay_ms =
                parse_var("VENDOR_RECONNECT_INITIAL_DELAY_MS", &value)?;
        }
        if let Ok(value) = std::env::var("VENDOR_RECONNECT_MAX_DELAY_MS") {
            config.reconnect.max_delay_ms = parse_var("VENDOR_RECONNECT_MAX_DELAY_MS", &value)?;
        }

        if let Ok(value) = std::env::var("TOOL_MAX_CALLS_PER_SESSION") {
            config.tool_limits.max_calls_per_session =
                parse_var("TOOL_MAX_CALLS_PER_SESSION", &value)?;
        }
        if let Ok(value) = std::env::var("TOOL_MAX_ARGUMENT_BYTES") {
            config.tool_limits.max_argument_bytes = parse_var("TOOL_MAX_ARGUMENT_BYTES", &value)?;
        }
        if let Ok(value) = std::env::var("TOOL_HOP_LIMIT") {
            config.tool_limits.hop_limit = parse_var("TOOL_HOP_LIMIT", &value)?;
        }
        if let Ok(value) = std::env::var("TOOL_RATE_LIMIT_PER_WINDOW") {
            config.tool_limits.rate_limit_per_window =
                parse_var("TOOL_RATE_LIMIT_PER_WINDOW", &value)?;
        }

        if let Ok(url) = std::env::var("ACTION_SERVICE_BASE_URL") {
            config.action_service.base_url = url;
        }
        if let Ok(url) = std::env::var("ACTION_SERVICE_LOGIN_URL") {
            config.action_service.login_url = url;
        }
        config.action_service.client_id = std::env::var("ACTION_SERVICE_CLIENT_ID")
            .ok()
            .filter(|v| !v.is_empty());
        config.action_service.client_secret = std::env::var("ACTION_SERVICE_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.is_empty());
        if let Ok(value) = std::env::var("ACTION_SERVICE_TIMEOUT_SECS") {
            config.action_service.timeout_secs = parse_var("ACTION_SERVICE_TIMEOUT_SECS", &value)?;
        }
        if let Ok(fields) = std::env::var("TOOL_REDACTION_FIELDS") {
            config.action_service.redaction_fields = fields
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }

        if let Ok(value) = std::env::var("SESSION_STORE_TTL_SECS") {
            config.session_store_ttl_secs = parse_var("SESSION_STORE_TTL_SECS", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FRAME_INTERVAL_MS",
                value: "0".to_string(),
            });
        }
        if self.buffer_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                name: "BUFFER_SECONDS",
                value: "0".to_string(),
            });
        }
        if self.openai_api_key.is_none() && self.gemini_api_key.is_none() {
            tracing::warn!(
                "No vendor API key configured; sessions will fail at vendor handshake"
            );
        }
        Ok(())
    }

    /// Listen address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Playback buffer capacity in frames, derived from the configured
    /// buffer length and frame interval.
    pub fn buffer_capacity_frames(&self) -> usize {
        ((self.buffer_seconds * 1_000) / self.frame_interval_ms).max(1) as usize
    }

    /// Interval between outbound telephony frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.telephony_path, "/audiohook");
        assert_eq!(config.frame_interval_ms, 150);
        assert_eq!(config.buffer_seconds, 180);
    }

    #[test]
    fn test_buffer_capacity_frames() {
        let config = ServerConfig::default();
        // 180s at 150ms per frame
        assert_eq!(config.buffer_capacity_frames(), 1200);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = ServerConfig {
            frame_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_delay_no_jitter() {
        let policy = ReconnectPolicy {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        // Capped at max_delay_ms
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(30_000));
    }

    #[test]
    fn test_reconnect_delay_with_jitter() {
        let policy = ReconnectPolicy::default();
        let delay = policy.delay_for_attempt(1).as_millis() as i64;
        assert!((750..=1_250).contains(&delay), "delay {delay} out of range");
    }

    #[test]
    fn test_reconnect_should_retry() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn test_tool_limits_defaults() {
        let limits = ToolLimits::default();
        assert_eq!(limits.hop_limit, 3);
        assert_eq!(limits.max_calls_per_session, 20);
        assert_eq!(limits.max_argument_bytes, 8 * 1024);
    }
}
