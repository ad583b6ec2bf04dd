//! Telephony WebSocket protocol endpoint.

mod handler;
mod messages;

pub use handler::audiohook_handler;
pub use messages::{ClientMessage, MediaFormat, OpenParameters, ServerMessage};
