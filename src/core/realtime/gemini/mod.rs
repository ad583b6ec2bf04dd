//! Gemini Live API backend adapter.

mod client;
mod messages;

pub use client::GeminiLive;
pub use messages::{ClientMessage, ServerMessage};

/// Gemini Live WebSocket endpoint (API key appended as a query parameter).
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-live-001";

/// Sample rate Gemini expects on its input.
pub const GEMINI_INPUT_RATE: u32 = 16_000;

/// Sample rate Gemini produces on its output.
pub const GEMINI_OUTPUT_RATE: u32 = 24_000;
