//! AudioHook protocol messages.
//!
//! Text frames carry a JSON envelope with a `type` field, monotonic `seq`
//! numbers per direction, and a `parameters` object whose shape depends on
//! the type. Binary frames carry raw audio in the negotiated format. The
//! protocol version spoken here is "2".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol version sent in every server message.
pub const PROTOCOL_VERSION: &str = "2";

/// Placeholder id the platform uses on connection probes.
pub const PROBE_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Envelope of a message received from the telephony platform.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ClientMessage {
    pub fn open_parameters(&self) -> Result<OpenParameters, serde_json::Error> {
        serde_json::from_value(self.parameters.clone())
    }

    pub fn error_parameters(&self) -> ErrorParameters {
        serde_json::from_value(self.parameters.clone()).unwrap_or_default()
    }

    pub fn close_reason(&self) -> Option<String> {
        self.parameters
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Parameters of an `open` message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenParameters {
    pub conversation_id: String,
    pub participant: Participant,
    pub media: Vec<MediaFormat>,
    pub input_variables: HashMap<String, String>,
}

impl OpenParameters {
    /// Health probes open with the all-zero conversation and participant.
    pub fn is_probe(&self) -> bool {
        self.conversation_id == PROBE_ID && self.participant.id == PROBE_ID
    }

    /// Pick the offered media format this gateway supports.
    pub fn choose_media(&self) -> Option<&MediaFormat> {
        self.media
            .iter()
            .find(|m| m.format.eq_ignore_ascii_case("PCMU") && m.rate == 8_000)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Participant {
    pub id: String,
    pub ani: Option<String>,
    pub ani_name: Option<String>,
    pub dnis: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub channels: Vec<String>,
    pub rate: u32,
}

/// Parameters of an `error` message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorParameters {
    pub code: Option<i64>,
    pub message: Option<String>,
    /// ISO 8601 duration to wait before resuming, on 429
    pub retry_after: Option<String>,
}

/// A message sent to the telephony platform.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    pub version: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub seq: u64,
    pub clientseq: u64,
    pub id: String,
    pub parameters: Value,
}

impl ServerMessage {
    fn new(kind: &'static str, seq: u64, clientseq: u64, id: &str, parameters: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            seq,
            clientseq,
            id: id.to_string(),
            parameters,
        }
    }

    /// Accept the open with the negotiated media. An empty media list
    /// answers a probe.
    pub fn opened(seq: u64, clientseq: u64, id: &str, media: Vec<MediaFormat>) -> Self {
        Self::new(
            "opened",
            seq,
            clientseq,
            id,
            json!({
                "startPaused": false,
                "media": media,
            }),
        )
    }

    pub fn pong(seq: u64, clientseq: u64, id: &str) -> Self {
        Self::new("pong", seq, clientseq, id, json!({}))
    }

    pub fn closed(seq: u64, clientseq: u64, id: &str) -> Self {
        Self::new("closed", seq, clientseq, id, json!({}))
    }

    /// Server-initiated hangup, with the session's output variables.
    pub fn disconnect(
        seq: u64,
        clientseq: u64,
        id: &str,
        reason: &str,
        info: &str,
        output_variables: HashMap<String, String>,
    ) -> Self {
        Self::new(
            "disconnect",
            seq,
            clientseq,
            id,
            json!({
                "reason": reason,
                "info": info,
                "outputVariables": output_variables,
            }),
        )
    }

    /// Tell the platform to discard its queued playback after a barge-in.
    pub fn barge_in_event(seq: u64, clientseq: u64, id: &str) -> Self {
        Self::new(
            "event",
            seq,
            clientseq,
            id,
            json!({
                "entities": [{"type": "barge_in", "data": {}}],
            }),
        )
    }
}
