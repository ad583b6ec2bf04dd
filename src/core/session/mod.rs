//! Session lifecycle: one telephony call bridged to one vendor connection.
//!
//! The [`SessionController`] owns the vendor leg, the playback buffer, the
//! tool orchestrator, transcripts, and usage counters. The telephony handler
//! owns the WebSocket and drives the controller: inbound audio goes in,
//! paced playback frames and session events come out, and the final
//! [`SessionOutcome`] is read at disconnect.

mod config;
mod controller;
mod outcome;

pub use config::SessionConfig;
pub use controller::{SessionController, SessionError, SessionEvent, SessionState};
pub use outcome::{SessionOutcome, TerminationOutcome, TranscriptEntry, UsageCounters};
