//! HTTP and WebSocket request handlers
//!
//! - `audiohook` - the telephony WebSocket endpoint carrying live calls
//! - `health` - liveness and session-count endpoint

pub mod audiohook;
pub mod health;

pub use audiohook::audiohook_handler;
pub use health::health_check;
