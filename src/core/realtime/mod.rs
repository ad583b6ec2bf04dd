//! Vendor realtime client module.
//!
//! Adapters for streaming speech-to-speech backends, normalized behind the
//! [`RealtimeClient`] trait and the [`VendorEvent`] stream.
//!
//! # Supported Backends
//!
//! - **OpenAI Realtime API** - full duplex audio over WebSocket, G.711 μ-law
//!   end to end, server-side VAD
//! - **Gemini Live API** - PCM16 16 kHz in / 24 kHz out, with a text-turn
//!   fallback for tool triggering confined to the adapter

mod base;
pub mod gemini;
pub mod openai;

pub use base::{
    BoxedRealtimeClient, RealtimeClient, RealtimeError, RealtimeResult, ToolCallRequest,
    TranscriptRole, UsageReport, VendorConfig, VendorEvent,
};
pub use gemini::GeminiLive;
pub use openai::OpenAIRealtime;

/// Supported realtime backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeBackend {
    OpenAI,
    Gemini,
}

impl RealtimeBackend {
    /// Parse backend from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(RealtimeBackend::OpenAI),
            "gemini" | "google" => Some(RealtimeBackend::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for RealtimeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeBackend::OpenAI => write!(f, "openai"),
            RealtimeBackend::Gemini => write!(f, "gemini"),
        }
    }
}

/// Create a backend adapter from configuration.
pub fn create_realtime_client(
    backend: RealtimeBackend,
    config: VendorConfig,
) -> RealtimeResult<BoxedRealtimeClient> {
    match backend {
        RealtimeBackend::OpenAI => Ok(Box::new(OpenAIRealtime::new(config)?)),
        RealtimeBackend::Gemini => Ok(Box::new(GeminiLive::new(config)?)),
    }
}
