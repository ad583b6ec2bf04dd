//! Gemini Live API client.
//!
//! Gemini takes PCM16 at 16 kHz and produces PCM16 at 24 kHz; format
//! conversion happens outside this adapter. Two Gemini-specific behaviors are
//! confined here and invisible to the rest of the engine:
//!
//! - Audio-only input does not reliably trigger function calls, so the
//!   adapter accumulates the caller's transcribed speech and resubmits it as
//!   a discrete text turn once speech pauses.
//! - `FunctionResponse` requires the function name, which the common
//!   `send_tool_result` contract does not carry, so the adapter remembers the
//!   name per call id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::messages::{
    Blob, ClientContent, ClientMessage, Content, FunctionDeclaration, FunctionResponse,
    GenerationConfig, Part, PrebuiltVoiceConfig, RealtimeInput, ServerMessage, Setup, SpeechConfig,
    Tool, ToolResponse, UsageMetadata, VoiceConfig,
};
use super::{DEFAULT_MODEL, GEMINI_INPUT_RATE, GEMINI_LIVE_URL, GEMINI_OUTPUT_RATE};
use crate::core::audio::{AudioEncoding, AudioSpec};
use crate::core::realtime::base::{
    RealtimeClient, RealtimeError, RealtimeResult, ToolCallRequest, TranscriptRole, UsageReport,
    VendorConfig, VendorEvent,
};

const CHANNEL_CAPACITY: usize = 256;

/// Silence gap after which accumulated caller text is resubmitted as a turn.
const TEXT_RESUBMIT_PAUSE: Duration = Duration::from_millis(1_200);

const DEFAULT_VOICE: &str = "Puck";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Gemini Live backend adapter.
pub struct GeminiLive {
    config: VendorConfig,
    model: String,
    connected: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
    ws_sender: Option<mpsc::Sender<ClientMessage>>,
    connection_handle: Option<JoinHandle<()>>,
    /// call id → function name, populated by the read loop
    call_names: Arc<Mutex<HashMap<String, String>>>,
}

impl GeminiLive {
    pub fn new(config: VendorConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = if config.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.clone()
        };

        Ok(Self {
            config,
            model,
            connected: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            ws_sender: None,
            connection_handle: None,
            call_names: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn build_ws_url(&self) -> RealtimeResult<String> {
        let mut url = url::Url::parse(GEMINI_LIVE_URL)
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url.to_string())
    }

    fn build_setup(&self) -> Setup {
        let voice = self
            .config
            .voice
            .clone()
            .unwrap_or_else(|| DEFAULT_VOICE.to_string());

        let tools = if self.config.tools.is_empty() {
            None
        } else {
            Some(vec![Tool {
                function_declarations: self
                    .config
                    .tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    })
                    .collect(),
            }])
        };

        Setup {
            model: format!("models/{}", self.model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
                    },
                }),
            },
            system_instruction: self.config.instructions.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
            tools,
            input_audio_transcription: Some(serde_json::json!({})),
            output_audio_transcription: Some(serde_json::json!({})),
        }
    }

    fn send_message(&self, message: ClientMessage) -> RealtimeResult<()> {
        let sender = self.ws_sender.as_ref().ok_or(RealtimeError::NotConnected)?;
        sender
            .try_send(message)
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    async fn connect_ws(url: &str) -> RealtimeResult<(WsSink, WsStream)> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RealtimeError::VendorUnavailable(e.to_string()))?;
        Ok(ws_stream.split())
    }

    async fn send_setup(sink: &mut WsSink, setup: Setup) -> RealtimeResult<()> {
        let json = serde_json::to_string(&ClientMessage::Setup { setup })
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| RealtimeError::VendorUnavailable(e.to_string()))
    }
}

/// Per-connection read-loop state.
#[derive(Default)]
struct ReadState {
    /// Caller speech accumulated for the text-turn resubmission
    pending_user_text: String,
    /// Previous cumulative usage, for delta reporting
    last_usage: UsageReport,
}

impl ReadState {
    /// Gemini reports cumulative session usage; the normalized contract is
    /// per-turn, so emit the difference since the last report.
    fn usage_delta(&mut self, usage: &UsageMetadata) -> UsageReport {
        let current = UsageReport {
            input_text_tokens: usage.prompt_tokens("TEXT"),
            input_audio_tokens: usage.prompt_tokens("AUDIO"),
            input_cached_text_tokens: usage.cached_tokens("TEXT"),
            input_cached_audio_tokens: usage.cached_tokens("AUDIO"),
            output_text_tokens: usage.response_tokens("TEXT"),
            output_audio_tokens: usage.response_tokens("AUDIO"),
        };
        let delta = UsageReport {
            input_text_tokens: current
                .input_text_tokens
                .saturating_sub(self.last_usage.input_text_tokens),
            input_audio_tokens: current
                .input_audio_tokens
                .saturating_sub(self.last_usage.input_audio_tokens),
            input_cached_text_tokens: current
                .input_cached_text_tokens
                .saturating_sub(self.last_usage.input_cached_text_tokens),
            input_cached_audio_tokens: current
                .input_cached_audio_tokens
                .saturating_sub(self.last_usage.input_cached_audio_tokens),
            output_text_tokens: current
                .output_text_tokens
                .saturating_sub(self.last_usage.output_text_tokens),
            output_audio_tokens: current
                .output_audio_tokens
                .saturating_sub(self.last_usage.output_audio_tokens),
        };
        self.last_usage = current;
        delta
    }
}

impl GeminiLive {
    /// Translate one server message into vendor events. Returns `false` when
    /// the event receiver is gone.
    async fn handle_server_message(
        message: ServerMessage,
        events: &mpsc::Sender<VendorEvent>,
        state: &mut ReadState,
        call_names: &Mutex<HashMap<String, String>>,
    ) -> bool {
        if message.setup_complete.is_some() {
            tracing::info!("Gemini Live setup complete");
            return true;
        }

        if let Some(usage) = &message.usage_metadata {
            let delta = state.usage_delta(usage);
            if events
                .send(VendorEvent::UsageReported(delta))
                .await
                .is_err()
            {
                return false;
            }
        }

        if let Some(tool_call) = message.tool_call {
            for call in tool_call.function_calls {
                tracing::info!(call_id = %call.id, name = %call.name, "Gemini function call");
                call_names.lock().insert(call.id.clone(), call.name.clone());
                let request = ToolCallRequest {
                    call_id: call.id,
                    name: call.name,
                    arguments: call.args.to_string(),
                    response_id: None,
                };
                if events
                    .send(VendorEvent::ToolCallRequested(request))
                    .await
                    .is_err()
                {
                    return false;
                }
            }
        }

        if let Some(content) = message.server_content {
            if content.interrupted == Some(true) {
                tracing::debug!("Gemini generation interrupted by caller speech");
                // Text accumulated before the barge-in belongs to a turn the
                // model already acted on; resubmitting it would replay it
                state.pending_user_text.clear();
                if events
                    .send(VendorEvent::SpeechStarted { audio_start_ms: 0 })
                    .await
                    .is_err()
                {
                    return false;
                }
            }

            if let Some(transcription) = content.input_transcription
                && !transcription.text.is_empty()
            {
                state.pending_user_text.push_str(&transcription.text);
                if events
                    .send(VendorEvent::TranscriptDelta {
                        role: TranscriptRole::User,
                        text: transcription.text,
                        is_final: transcription.finished.unwrap_or(false),
                    })
                    .await
                    .is_err()
                {
                    return false;
                }
            }

            if let Some(transcription) = content.output_transcription
                && !transcription.text.is_empty()
                && events
                    .send(VendorEvent::TranscriptDelta {
                        role: TranscriptRole::Assistant,
                        text: transcription.text,
                        is_final: transcription.finished.unwrap_or(false),
                    })
                    .await
                    .is_err()
            {
                return false;
            }

            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(inline) = part.inline_data {
                        match BASE64_STANDARD.decode(&inline.data) {
                            Ok(audio) => {
                                if events
                                    .send(VendorEvent::AudioDelta {
                                        data: Bytes::from(audio),
                                    })
                                    .await
                                    .is_err()
                                {
                                    return false;
                                }
                            }
                            Err(e) => tracing::error!("Failed to decode Gemini audio: {e}"),
                        }
                    }
                }
            }

            if content.turn_complete == Some(true)
                && events
                    .send(VendorEvent::TurnCompleted { response_id: None })
                    .await
                    .is_err()
            {
                return false;
            }
        }

        if let Some(go_away) = message.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "Gemini connection going away");
            return events
                .send(VendorEvent::VendorError {
                    message: "Server requested connection shutdown".to_string(),
                    fatal: false,
                })
                .await
                .is_ok();
        }

        true
    }
}

#[async_trait]
impl RealtimeClient for GeminiLive {
    fn audio_spec(&self) -> AudioSpec {
        AudioSpec {
            encoding: AudioEncoding::Pcm16,
            input_rate: GEMINI_INPUT_RATE,
            output_rate: GEMINI_OUTPUT_RATE,
        }
    }

    async fn open(&mut self) -> RealtimeResult<mpsc::Receiver<VendorEvent>> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(RealtimeError::InvalidConfiguration(
                "Client already open".to_string(),
            ));
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);

        let url = self.build_ws_url()?;
        let (mut ws_sink, ws_stream) = Self::connect_ws(&url).await?;
        Self::send_setup(&mut ws_sink, self.build_setup()).await?;
        tracing::info!(model = %self.model, "Connected to Gemini Live API");

        let (tx, mut rx) = mpsc::channel::<ClientMessage>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<VendorEvent>(CHANNEL_CAPACITY);
        self.ws_sender = Some(tx);

        let setup = self.build_setup();
        let reconnect = self.config.reconnect.clone();
        let connected = self.connected.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();
        let call_names = self.call_names.clone();

        connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut current_sink = ws_sink;
            let mut current_stream = ws_stream;
            let mut state = ReadState::default();
            let mut reconnect_attempt: u32 = 0;

            let pause = tokio::time::sleep(TEXT_RESUBMIT_PAUSE);
            tokio::pin!(pause);

            'outer: loop {
                loop {
                    tokio::select! {
                        Some(message) = rx.recv() => {
                            let json = match serde_json::to_string(&message) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize client message: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = current_sink.send(Message::Text(json.into())).await {
                                tracing::error!("Failed to send WebSocket message: {e}");
                                break;
                            }
                        }

                        Some(msg) = current_stream.next() => {
                            // Live API frames arrive as either text or binary JSON
                            let payload = match msg {
                                Ok(Message::Text(text)) => text.to_string(),
                                Ok(Message::Binary(data)) => {
                                    match String::from_utf8(data.to_vec()) {
                                        Ok(s) => s,
                                        Err(_) => {
                                            tracing::warn!("Non-UTF8 binary frame from Gemini");
                                            continue;
                                        }
                                    }
                                }
                                Ok(Message::Close(_)) => {
                                    tracing::info!("WebSocket closed by Gemini");
                                    break;
                                }
                                Ok(Message::Ping(data)) => {
                                    if let Err(e) = current_sink.send(Message::Pong(data)).await {
                                        tracing::error!("Failed to send pong: {e}");
                                    }
                                    continue;
                                }
                                Err(e) => {
                                    tracing::error!("WebSocket error: {e}");
                                    break;
                                }
                                _ => continue,
                            };

                            reconnect_attempt = 0;
                            match serde_json::from_str::<ServerMessage>(&payload) {
                                Ok(message) => {
                                    let had_input = message
                                        .server_content
                                        .as_ref()
                                        .and_then(|c| c.input_transcription.as_ref())
                                        .is_some();
                                    if !Self::handle_server_message(
                                        message,
                                        &event_tx,
                                        &mut state,
                                        &call_names,
                                    ).await {
                                        break 'outer;
                                    }
                                    if had_input {
                                        pause.as_mut().reset(
                                            tokio::time::Instant::now() + TEXT_RESUBMIT_PAUSE,
                                        );
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Failed to parse server message: {e}");
                                }
                            }
                        }

                        // Caller stopped talking: resubmit the accumulated
                        // transcript as a text turn so tool triggers fire.
                        () = &mut pause, if !state.pending_user_text.is_empty() => {
                            let text = std::mem::take(&mut state.pending_user_text);
                            tracing::debug!(chars = text.len(), "Resubmitting caller text turn");
                            let message = ClientMessage::ClientContent {
                                client_content: ClientContent::user_text(&text),
                            };
                            match serde_json::to_string(&message) {
                                Ok(json) => {
                                    if let Err(e) = current_sink.send(Message::Text(json.into())).await {
                                        tracing::error!("Failed to resubmit text turn: {e}");
                                        break;
                                    }
                                }
                                Err(e) => tracing::error!("Failed to serialize text turn: {e}"),
                            }
                        }

                        else => break,
                    }
                }

                connected.store(false, Ordering::SeqCst);

                if intentional_disconnect.load(Ordering::SeqCst) {
                    break 'outer;
                }

                if !reconnect.should_retry(reconnect_attempt) {
                    tracing::warn!(
                        attempts = reconnect_attempt,
                        "Gemini reconnect budget exhausted"
                    );
                    let _ = event_tx
                        .send(VendorEvent::VendorError {
                            message: format!(
                                "Connection lost after {reconnect_attempt} reconnection attempts"
                            ),
                            fatal: true,
                        })
                        .await;
                    break 'outer;
                }

                reconnect_attempt += 1;
                let delay = reconnect.delay_for_attempt(reconnect_attempt);
                tracing::info!(
                    attempt = reconnect_attempt,
                    max_attempts = reconnect.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Attempting Gemini reconnection"
                );
                tokio::time::sleep(delay).await;

                if intentional_disconnect.load(Ordering::SeqCst) {
                    break 'outer;
                }

                match Self::connect_ws(&url).await {
                    Ok((mut new_sink, new_stream)) => {
                        if let Err(e) = Self::send_setup(&mut new_sink, setup.clone()).await {
                            tracing::error!("Failed to re-send setup: {e}");
                            continue;
                        }
                        tracing::info!("Reconnected to Gemini Live API");
                        current_sink = new_sink;
                        current_stream = new_stream;
                        connected.store(true, Ordering::SeqCst);
                        call_names.lock().clear();
                        state.pending_user_text.clear();
                    }
                    Err(e) => {
                        tracing::error!(attempt = reconnect_attempt, "Reconnection failed: {e}");
                        continue;
                    }
                }
            }

            let _ = event_tx.send(VendorEvent::Closed).await;
            tracing::info!("Gemini Live connection task ended");
        });
        self.connection_handle = Some(handle);

        Ok(event_rx)
    }

    async fn send_audio(&mut self, data: Bytes) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_message(ClientMessage::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type: format!("audio/pcm;rate={GEMINI_INPUT_RATE}"),
                    data: BASE64_STANDARD.encode(&data),
                }],
            },
        })
    }

    async fn send_text(&mut self, text: &str) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_message(ClientMessage::ClientContent {
            client_content: ClientContent::user_text(text),
        })
    }

    async fn send_tool_result(&mut self, call_id: &str, payload: &str) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }

        let name = self
            .call_names
            .lock()
            .remove(call_id)
            .unwrap_or_else(|| "unknown".to_string());

        let response: serde_json::Value = serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::json!({ "result": payload }));

        self.send_message(ClientMessage::ToolResponse {
            tool_response: ToolResponse {
                function_responses: vec![FunctionResponse {
                    id: call_id.to_string(),
                    name,
                    response,
                }],
            },
        })
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.ws_sender = None;
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from Gemini Live API");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
