//! Gemini Live API (BidiGenerateContent) WebSocket message types.
//!
//! Unlike the OpenAI protocol there is no `type` discriminator; each message
//! is an object with exactly one top-level field naming its kind. Field names
//! are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Messages sent to the Live API.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Setup {
        setup: Setup,
    },
    RealtimeInput {
        #[serde(rename = "realtimeInput")]
        realtime_input: RealtimeInput,
    },
    ClientContent {
        #[serde(rename = "clientContent")]
        client_content: ClientContent,
    },
    ToolResponse {
        #[serde(rename = "toolResponse")]
        tool_response: ToolResponse,
    },
}

/// Session setup, sent once after connect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name, e.g. `models/gemini-2.0-flash-live-001`
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Presence enables transcription of caller audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<serde_json::Value>,
    /// Presence enables transcription of model audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Streaming media input.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

/// A discrete client turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientContent {
    /// A complete user text turn.
    pub fn user_text(text: &str) -> Self {
        Self {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

/// Tool results returned to the model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: serde_json::Value,
}

/// Messages received from the Live API. At most one field is populated per
/// message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
    pub usage_metadata: Option<UsageMetadata>,
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Transcription {
    pub text: String,
    pub finished: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCall {
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageMetadata {
    pub prompt_token_count: u64,
    pub response_token_count: u64,
    pub cached_content_token_count: u64,
    pub prompt_tokens_details: Vec<ModalityTokenCount>,
    pub response_tokens_details: Vec<ModalityTokenCount>,
    pub cache_tokens_details: Vec<ModalityTokenCount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModalityTokenCount {
    pub modality: String,
    pub token_count: u64,
}

impl UsageMetadata {
    fn count_for(details: &[ModalityTokenCount], modality: &str) -> u64 {
        details
            .iter()
            .filter(|d| d.modality.eq_ignore_ascii_case(modality))
            .map(|d| d.token_count)
            .sum()
    }

    pub fn prompt_tokens(&self, modality: &str) -> u64 {
        Self::count_for(&self.prompt_tokens_details, modality)
    }

    pub fn response_tokens(&self, modality: &str) -> u64 {
        Self::count_for(&self.response_tokens_details, modality)
    }

    pub fn cached_tokens(&self, modality: &str) -> u64 {
        Self::count_for(&self.cache_tokens_details, modality)
    }
}

/// Server-initiated shutdown notice.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::Setup {
            setup: Setup {
                model: "models/gemini-2.0-flash-live-001".to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: Some(SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: "Puck".to_string(),
                            },
                        },
                    }),
                },
                system_instruction: None,
                tools: None,
                input_audio_transcription: Some(serde_json::json!({})),
                output_audio_transcription: Some(serde_json::json!({})),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"setup\""));
        assert!(json.contains("responseModalities"));
        assert!(json.contains("Puck"));
    }

    #[test]
    fn test_realtime_input_serialization() {
        let msg = ClientMessage::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: "audio/pcm;rate=16000".to_string(),
                    data: "AAAA".to_string(),
                }],
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("realtimeInput"));
        assert!(json.contains("mimeType"));
    }

    #[test]
    fn test_server_content_deserialization() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}]
                }
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let content = msg.server_content.unwrap();
        let turn = content.model_turn.unwrap();
        assert_eq!(
            turn.parts[0].inline_data.as_ref().unwrap().mime_type,
            "audio/pcm;rate=24000"
        );
    }

    #[test]
    fn test_tool_call_deserialization() {
        let json = r#"{
            "toolCall": {
                "functionCalls": [
                    {"id": "fc-1", "name": "lookup_order", "args": {"order_id": "42"}}
                ]
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let calls = msg.tool_call.unwrap().function_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "lookup_order");
    }

    #[test]
    fn test_usage_metadata_modality_split() {
        let json = r#"{
            "usageMetadata": {
                "promptTokenCount": 30,
                "responseTokenCount": 12,
                "promptTokensDetails": [
                    {"modality": "TEXT", "tokenCount": 10},
                    {"modality": "AUDIO", "tokenCount": 20}
                ],
                "responseTokensDetails": [
                    {"modality": "AUDIO", "tokenCount": 12}
                ]
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let usage = msg.usage_metadata.unwrap();
        assert_eq!(usage.prompt_tokens("TEXT"), 10);
        assert_eq!(usage.prompt_tokens("AUDIO"), 20);
        assert_eq!(usage.response_tokens("AUDIO"), 12);
        assert_eq!(usage.cached_tokens("TEXT"), 0);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"somethingNew": {"x": 1}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.server_content.is_none());
        assert!(msg.tool_call.is_none());
    }
}
