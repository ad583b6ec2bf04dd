//! OpenAI Realtime API client.
//!
//! Speaks G.711 μ-law at 8 kHz on both directions of the vendor socket, so
//! telephony audio passes through without format conversion. Server-side VAD
//! handles turn taking and barge-in interruption.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::messages::{
    ClientEvent, InputAudioTranscription, ServerEvent, SessionConfig, ToolDef, TurnDetection,
};
use super::{AUDIO_FORMAT, DEFAULT_MODEL, OPENAI_REALTIME_URL};
use crate::core::audio::AudioSpec;
use crate::core::realtime::base::{
    RealtimeClient, RealtimeError, RealtimeResult, ToolCallRequest, TranscriptRole, UsageReport,
    VendorConfig, VendorEvent,
};

/// Capacity for both the outbound message queue and the event stream.
const CHANNEL_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// OpenAI Realtime API backend adapter.
pub struct OpenAIRealtime {
    config: VendorConfig,
    model: String,
    connected: Arc<AtomicBool>,
    intentional_disconnect: Arc<AtomicBool>,
    ws_sender: Option<mpsc::Sender<ClientEvent>>,
    connection_handle: Option<JoinHandle<()>>,
}

impl OpenAIRealtime {
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
        })
    }

    fn build_ws_url(&self) -> String {
        format!("{OPENAI_REALTIME_URL}?model={}", self.model)
    }

    fn build_request(url: &str, api_key: &str) -> RealtimeResult<http::Request<()>> {
        http::Request::builder()
            .uri(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", "api.openai.com")
            .body(())
            .map_err(|e| RealtimeError::VendorUnavailable(e.to_string()))
    }

    fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.config.instructions.clone(),
            voice: self.config.voice.clone(),
            input_audio_format: Some(AUDIO_FORMAT.to_string()),
            output_audio_format: Some(AUDIO_FORMAT.to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: "whisper-1".to_string(),
            }),
            turn_detection: Some(TurnDetection::default()),
            tools: Some(
                self.config
                    .tools
                    .iter()
                    .map(|t| ToolDef {
                        tool_type: "function".to_string(),
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    })
                    .collect(),
            ),
            tool_choice: Some("auto".to_string()),
            temperature: self.config.temperature,
        }
    }

    fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        let sender = self.ws_sender.as_ref().ok_or(RealtimeError::NotConnected)?;
        sender
            .try_send(event)
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    /// Translate one server event into vendor events. Returns `false` when
    /// the event receiver is gone and the connection task should stop.
    async fn handle_server_event(
        event: ServerEvent,
        events: &mpsc::Sender<VendorEvent>,
        pending_calls: &mut HashMap<String, String>,
    ) -> bool {
        let forwarded = match event {
            ServerEvent::SessionCreated { session } => {
                tracing::info!(session_id = %session.id, "OpenAI Realtime session created");
                return true;
            }
            ServerEvent::SessionUpdated { session } => {
                tracing::debug!(session_id = %session.id, "OpenAI Realtime session updated");
                return true;
            }

            ServerEvent::Error { error } => {
                tracing::error!(
                    error_type = %error.error_type,
                    "OpenAI Realtime error: {}",
                    error.message
                );
                events
                    .send(VendorEvent::VendorError {
                        message: format!("{}: {}", error.error_type, error.message),
                        fatal: false,
                    })
                    .await
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                tracing::debug!(audio_start_ms, "Caller speech started");
                events
                    .send(VendorEvent::SpeechStarted { audio_start_ms })
                    .await
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                tracing::debug!(audio_end_ms, "Caller speech stopped");
                return true;
            }

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                events
                    .send(VendorEvent::TranscriptDelta {
                        role: TranscriptRole::User,
                        text: transcript,
                        is_final: true,
                    })
                    .await
            }

            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                events
                    .send(VendorEvent::TranscriptDelta {
                        role: TranscriptRole::Assistant,
                        text: delta,
                        is_final: false,
                    })
                    .await
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                events
                    .send(VendorEvent::TranscriptDelta {
                        role: TranscriptRole::Assistant,
                        text: transcript,
                        is_final: true,
                    })
                    .await
            }

            ServerEvent::AudioDelta { delta, .. } => match BASE64_STANDARD.decode(&delta) {
                Ok(audio) => {
                    events
                        .send(VendorEvent::AudioDelta {
                            data: Bytes::from(audio),
                        })
                        .await
                }
                Err(e) => {
                    tracing::error!("Failed to decode audio delta: {e}");
                    return true;
                }
            },

            // The arguments.done event carries no function name, so capture it
            // from the output item first.
            ServerEvent::OutputItemAdded { item, .. } => {
                if item.item_type.as_deref() == Some("function_call")
                    && let (Some(call_id), Some(name)) = (&item.call_id, &item.name)
                {
                    pending_calls.insert(call_id.clone(), name.clone());
                }
                return true;
            }

            ServerEvent::FunctionCallArgumentsDone {
                response_id,
                call_id,
                arguments,
            } => {
                let name = match pending_calls.remove(&call_id) {
                    Some(name) => name,
                    None => {
                        tracing::warn!(%call_id, "Function name missing for call");
                        String::new()
                    }
                };
                events
                    .send(VendorEvent::ToolCallRequested(ToolCallRequest {
                        call_id,
                        name,
                        arguments,
                        response_id: Some(response_id),
                    }))
                    .await
            }

            ServerEvent::ResponseDone { response } => {
                tracing::debug!(response_id = %response.id, status = %response.status, "Response done");
                if let Some(usage) = response.usage {
                    let input = usage.input_token_details.unwrap_or(
                        super::messages::InputTokenDetails {
                            text_tokens: usage.input_tokens,
                            audio_tokens: 0,
                            cached_tokens_details: None,
                        },
                    );
                    let cached = input.cached_tokens_details.unwrap_or(
                        super::messages::CachedTokenDetails {
                            text_tokens: 0,
                            audio_tokens: 0,
                        },
                    );
                    let output = usage.output_token_details.unwrap_or(
                        super::messages::OutputTokenDetails {
                            text_tokens: usage.output_tokens,
                            audio_tokens: 0,
                        },
                    );
                    let report = UsageReport {
                        input_text_tokens: input.text_tokens,
                        input_audio_tokens: input.audio_tokens,
                        input_cached_text_tokens: cached.text_tokens,
                        input_cached_audio_tokens: cached.audio_tokens,
                        output_text_tokens: output.text_tokens,
                        output_audio_tokens: output.audio_tokens,
                    };
                    if events.send(VendorEvent::UsageReported(report)).await.is_err() {
                        return false;
                    }
                }
                events
                    .send(VendorEvent::TurnCompleted {
                        response_id: Some(response.id),
                    })
                    .await
            }

            ServerEvent::Unhandled => return true,
        };

        forwarded.is_ok()
    }

    async fn connect_ws(url: &str, api_key: &str) -> RealtimeResult<(WsSink, WsStream)> {
        let request = Self::build_request(url, api_key)?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::VendorUnavailable(e.to_string()))?;
        Ok(ws_stream.split())
    }
}

#[async_trait]
impl RealtimeClient for OpenAIRealtime {
    fn audio_spec(&self) -> AudioSpec {
        // g711_ulaw in and out; telephony frames pass through unchanged
        AudioSpec::telephony()
    }

    async fn open(&mut self) -> RealtimeResult<mpsc::Receiver<VendorEvent>> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(RealtimeError::InvalidConfiguration(
                "Client already open".to_string(),
            ));
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);

        let url = self.build_ws_url();
        let (ws_sink, ws_stream) = Self::connect_ws(&url, &self.config.api_key).await?;
        tracing::info!(model = %self.model, "Connected to OpenAI Realtime API");

        let (tx, mut rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<VendorEvent>(CHANNEL_CAPACITY);
        self.ws_sender = Some(tx.clone());

        let session_config = self.build_session_config();
        let reconnect = self.config.reconnect.clone();
        let connected = self.connected.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();
        let api_key = self.config.api_key.clone();

        connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut current_sink = ws_sink;
            let mut current_stream = ws_stream;
            let mut pending_calls: HashMap<String, String> = HashMap::new();
            let mut reconnect_attempt: u32 = 0;

            'outer: loop {
                loop {
                    tokio::select! {
                        Some(event) = rx.recv() => {
                            let json = match serde_json::to_string(&event) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize client event: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = current_sink.send(Message::Text(json.into())).await {
                                tracing::error!("Failed to send WebSocket message: {e}");
                                break;
                            }
                        }

                        Some(msg) = current_stream.next() => {
                            match msg {
                                Ok(Message::Text(text)) => {
                                    reconnect_attempt = 0;
                                    match serde_json::from_str::<ServerEvent>(&text) {
                                        Ok(event) => {
                                            if !Self::handle_server_event(
                                                event,
                                                &event_tx,
                                                &mut pending_calls,
                                            ).await {
                                                break 'outer;
                                            }
                                        }
                                        Err(e) => {
                                            tracing::warn!("Failed to parse server event: {e}");
                                        }
                                    }
                                }
                                Ok(Message::Close(_)) => {
                                    tracing::info!("WebSocket closed by OpenAI");
                                    break;
                                }
                                Ok(Message::Ping(data)) => {
                                    if let Err(e) = current_sink.send(Message::Pong(data)).await {
                                        tracing::error!("Failed to send pong: {e}");
                                    }
                                }
                                Err(e) => {
                                    tracing::error!("WebSocket error: {e}");
                                    break;
                                }
                                _ => {}
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
                        "OpenAI reconnect budget exhausted"
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
                    "Attempting OpenAI reconnection"
                );
                tokio::time::sleep(delay).await;

                if intentional_disconnect.load(Ordering::SeqCst) {
                    break 'outer;
                }

                match Self::connect_ws(&url, &api_key).await {
                    Ok((new_sink, new_stream)) => {
                        tracing::info!("Reconnected to OpenAI Realtime API");
                        current_sink = new_sink;
                        current_stream = new_stream;
                        connected.store(true, Ordering::SeqCst);
                        // Pending calls belong to the dead connection
                        pending_calls.clear();

                        // Restore session configuration on the new connection
                        let event = ClientEvent::SessionUpdate {
                            session: session_config.clone(),
                        };
                        if let Ok(json) = serde_json::to_string(&event)
                            && let Err(e) = current_sink.send(Message::Text(json.into())).await
                        {
                            tracing::error!("Failed to restore session config: {e}");
                        }
                    }
                    Err(e) => {
                        tracing::error!(attempt = reconnect_attempt, "Reconnection failed: {e}");
                        continue;
                    }
                }
            }

            let _ = event_tx.send(VendorEvent::Closed).await;
            tracing::info!("OpenAI Realtime connection task ended");
        });
        self.connection_handle = Some(handle);

        // Initial session configuration
        self.send_event(ClientEvent::SessionUpdate {
            session: self.build_session_config(),
        })?;

        Ok(event_rx)
    }

    async fn send_audio(&mut self, data: Bytes) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_event(ClientEvent::audio_append(&data))
    }

    async fn send_text(&mut self, text: &str) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_event(ClientEvent::user_text(text))?;
        self.send_event(ClientEvent::ResponseCreate)
    }

    async fn send_tool_result(&mut self, call_id: &str, payload: &str) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.send_event(ClientEvent::function_output(call_id, payload))?;
        // The model speaks its follow-up (including the farewell after a
        // call-control tool) in response to this.
        self.send_event(ClientEvent::ResponseCreate)
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.ws_sender = None;
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from OpenAI Realtime API");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> VendorConfig {
        VendorConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = OpenAIRealtime::new(VendorConfig::default());
        assert!(matches!(
            result,
            Err(RealtimeError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_default_model_applied() {
        let client = OpenAIRealtime::new(test_config()).unwrap();
        assert!(client.build_ws_url().contains(DEFAULT_MODEL));
    }

    #[test]
    fn test_audio_spec_is_telephony_passthrough() {
        let client = OpenAIRealtime::new(test_config()).unwrap();
        assert_eq!(client.audio_spec(), AudioSpec::telephony());
    }

    #[test]
    fn test_session_config_uses_mulaw() {
        let client = OpenAIRealtime::new(test_config()).unwrap();
        let session = client.build_session_config();
        assert_eq!(session.input_audio_format.as_deref(), Some("g711_ulaw"));
        assert_eq!(session.output_audio_format.as_deref(), Some("g711_ulaw"));
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let mut client = OpenAIRealtime::new(test_config()).unwrap();
        assert!(matches!(
            client.send_audio(Bytes::from_static(b"xx")).await,
            Err(RealtimeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut client = OpenAIRealtime::new(test_config()).unwrap();
        assert!(client.close().await.is_ok());
        assert!(client.close().await.is_ok());
    }
}
