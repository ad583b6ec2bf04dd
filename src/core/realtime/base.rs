//! Base trait and event types for streaming speech-to-speech backends.
//!
//! A backend adapter normalizes its wire protocol into the [`VendorEvent`]
//! stream; the session controller consumes that stream without knowing which
//! backend produced it. Ordering is guaranteed only by the underlying
//! transport; consumers must not assume strict interleaving across event
//! kinds.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ReconnectPolicy;
use crate::core::audio::AudioSpec;
use crate::core::tools::ToolDefinition;

/// Errors that can occur on the vendor leg.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection or handshake to the backend failed
    #[error("Vendor unavailable: {0}")]
    VendorUnavailable(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Backend-reported error
    #[error("Vendor error: {0}")]
    VendorError(String),
}

/// Result type for vendor operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Configuration handed to a backend adapter at open time.
#[derive(Debug, Clone, Default)]
pub struct VendorConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Voice for audio output
    pub voice: Option<String>,

    /// Layered system instructions
    pub instructions: Option<String>,

    /// Temperature; backends that do not support it ignore it
    pub temperature: Option<f32>,

    /// Tools registered for the session (call-control and data actions)
    pub tools: Vec<ToolDefinition>,

    /// Reconnection policy for mid-session connection loss
    pub reconnect: ReconnectPolicy,
}

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A model request to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Backend-assigned call id, echoed in the tool result
    pub call_id: String,
    /// Tool name
    pub name: String,
    /// Raw JSON arguments
    pub arguments: String,
    /// Id of the response that carried the call, when the backend reports
    /// one. Lets consumers tell that turn's completion apart from the turn
    /// generated by the tool result.
    pub response_id: Option<String>,
}

/// Per-turn token usage reported by the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageReport {
    pub input_text_tokens: u64,
    pub input_audio_tokens: u64,
    pub input_cached_text_tokens: u64,
    pub input_cached_audio_tokens: u64,
    pub output_text_tokens: u64,
    pub output_audio_tokens: u64,
}

/// Normalized events produced by a backend adapter.
///
/// The receiver returned by [`RealtimeClient::open`] yields these until the
/// connection ends; `Closed` is always the final event.
#[derive(Debug, Clone)]
pub enum VendorEvent {
    /// Chunk of synthesized audio in the backend's native output format
    AudioDelta { data: Bytes },

    /// Transcript text for either side of the conversation
    TranscriptDelta {
        role: TranscriptRole,
        text: String,
        is_final: bool,
    },

    /// The backend detected the caller starting to speak (barge-in)
    SpeechStarted { audio_start_ms: u64 },

    /// The model requested a tool invocation
    ToolCallRequested(ToolCallRequest),

    /// One model turn finished
    TurnCompleted { response_id: Option<String> },

    /// Token usage for the completed turn
    UsageReported(UsageReport),

    /// Backend-reported error; `fatal` means the connection is gone and the
    /// reconnect budget is exhausted
    VendorError { message: String, fatal: bool },

    /// The event stream has ended; no further events will arrive
    Closed,
}

/// Common contract for streaming speech-to-speech backends.
///
/// `open` returns the event stream for the connection. Adapters queue
/// outbound audio internally so `send_audio` never blocks on the socket.
/// Backend-specific quirks (such as a text-turn fallback for tool triggers)
/// stay inside the adapter.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    /// The backend's native audio representation. Format conversion happens
    /// in `core::audio`, never inside an adapter.
    fn audio_spec(&self) -> AudioSpec;

    /// Establish the connection, register tools and instructions, and return
    /// the event stream. Fails with `VendorUnavailable` on handshake failure.
    async fn open(&mut self) -> RealtimeResult<mpsc::Receiver<VendorEvent>>;

    /// Forward caller audio (already converted to the backend's input
    /// format). Non-blocking; internally queued if momentarily saturated.
    async fn send_audio(&mut self, data: Bytes) -> RealtimeResult<()>;

    /// Inject a user text turn.
    async fn send_text(&mut self, text: &str) -> RealtimeResult<()>;

    /// Return a tool result to the model and resume the turn.
    async fn send_tool_result(&mut self, call_id: &str, payload: &str) -> RealtimeResult<()>;

    /// Tear down the connection. Idempotent.
    async fn close(&mut self) -> RealtimeResult<()>;

    /// Whether the connection is currently usable.
    fn is_ready(&self) -> bool;
}

/// Boxed trait object for backend adapters.
pub type BoxedRealtimeClient = Box<dyn RealtimeClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_role_display() {
        assert_eq!(TranscriptRole::User.to_string(), "user");
        assert_eq!(TranscriptRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::VendorUnavailable("handshake refused".to_string());
        assert!(err.to_string().contains("Vendor unavailable"));
        assert_eq!(RealtimeError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_usage_report_default_is_zero() {
        let usage = UsageReport::default();
        assert_eq!(usage.input_text_tokens, 0);
        assert_eq!(usage.output_audio_tokens, 0);
    }
}
