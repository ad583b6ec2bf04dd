//! OpenAI Realtime API backend adapter.

mod client;
mod messages;

pub use client::OpenAIRealtime;
pub use messages::{ClientEvent, ServerEvent};

/// OpenAI Realtime WebSocket endpoint (model appended as a query parameter).
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Wire name for the telephony audio format.
pub const AUDIO_FORMAT: &str = "g711_ulaw";
