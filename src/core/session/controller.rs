//! The session controller.
//!
//! Owns the vendor leg for one call: converts and forwards caller audio,
//! buffers synthesized audio for paced playout, runs tool calls through the
//! orchestrator on a separate task so they never stall the audio path, and
//! tracks the termination state machine through to the final outcome.
//!
//! State machine: `Active` until a call-control tool is honored, then
//! `Draining` while the farewell plays out of the buffer, `Disconnecting`
//! once the buffer is empty, and `Closed` after shutdown. `Failed` is
//! entered when the vendor leg dies beyond the reconnect budget.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::core::audio::{self, AudioSpec, TELEPHONY_SAMPLE_RATE};
use crate::core::buffer::PlaybackBuffer;
use crate::core::realtime::{
    BoxedRealtimeClient, RealtimeError, ToolCallRequest, VendorConfig, VendorEvent,
    create_realtime_client,
};
use crate::core::tools::{
    ActionClient, ToolDisposition, ToolOrchestrator, ToolTermination, build_data_action_tools,
    call_control_tools, data_action_instructions,
};

use super::config::SessionConfig;
use super::outcome::{SessionOutcome, TerminationOutcome, TranscriptEntry, UsageCounters};

/// Admin prompt used when the call supplies none.
const DEFAULT_ADMIN_PROMPT: &str =
    "You are [AGENT_NAME], a voice assistant for [COMPANY_NAME]. Help the caller with \
     their request, keeping responses short and conversational.";

const TOOL_CHANNEL_CAPACITY: usize = 32;

/// Errors raised by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Vendor(#[from] RealtimeError),
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Bridging audio both ways.
    Active,
    /// Termination honored; farewell audio is draining from the buffer.
    Draining,
    /// Playback drained; waiting for the disconnect handshake.
    Disconnecting,
    /// Vendor leg lost beyond recovery.
    Failed,
    /// Torn down.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Active => "active",
            SessionState::Draining => "draining",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Events the telephony handler must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The caller started speaking over playback; queued audio was
    /// discarded and the platform should be told to do the same.
    BargeIn,
    /// The session is over; send the disconnect message and read the
    /// outcome.
    Disconnect,
}

enum ToolCommand {
    Call(ToolCallRequest),
    ResetTurn,
}

struct ToolCallDone {
    call_id: String,
    name: String,
    response_id: Option<String>,
    disposition: ToolDisposition,
}

/// Controller for one bridged call.
pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    client: BoxedRealtimeClient,
    spec: AudioSpec,
    vendor_rx: Option<mpsc::Receiver<VendorEvent>>,

    buffer: PlaybackBuffer,
    pending_out: BytesMut,
    frame_bytes: usize,

    tool_tx: mpsc::Sender<ToolCommand>,
    tool_done_rx: mpsc::Receiver<ToolCallDone>,
    pending_termination: Option<ToolTermination>,
    /// Response that carried the honored call-control tool. Its own
    /// completion can still be queued behind the tool result; it must not
    /// start the drain, or the farewell would be cut off.
    tool_call_response_id: Option<String>,

    termination: Option<TerminationOutcome>,
    usage: UsageCounters,
    transcript: Vec<TranscriptEntry>,
    started_at: Instant,
}

impl SessionController {
    /// Build the tool catalog and instructions, connect the vendor leg, and
    /// return a running controller.
    pub async fn start(
        config: SessionConfig,
        server: &ServerConfig,
        actions: Arc<ActionClient>,
    ) -> Result<Self, SessionError> {
        let mut tools = call_control_tools();
        tools.extend(config.passthrough_tools.iter().cloned());
        if !config.action_ids.is_empty() {
            if actions.is_configured() {
                tools.extend(
                    build_data_action_tools(
                        &actions,
                        &config.action_ids,
                        &config.tool_descriptions,
                        &server.tool_limits,
                    )
                    .await,
                );
            } else {
                tracing::warn!(
                    session_id = config.session_id,
                    "Call requested data actions but the action service is not configured"
                );
            }
        }

        let mut instructions = crate::config::assemble_instructions(
            config.admin_prompt.as_deref().unwrap_or(DEFAULT_ADMIN_PROMPT),
            config.language.as_deref(),
            config.customer_data.as_deref(),
            &config.agent_name,
            &config.company_name,
        );
        instructions.push_str(&data_action_instructions(&tools));

        let orchestrator =
            ToolOrchestrator::new(tools, actions.clone(), server.tool_limits.clone());
        // Register only the tools whose schemas compiled
        let registered = orchestrator.definitions();

        let vendor_config = VendorConfig {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            instructions: Some(instructions),
            temperature: config.temperature,
            tools: registered,
            reconnect: server.reconnect.clone(),
        };

        let mut client = create_realtime_client(config.backend, vendor_config)?;
        tracing::info!(
            session_id = config.session_id,
            conversation_id = config.conversation_id,
            backend = %config.backend,
            model = config.model,
            "Opening vendor session"
        );
        let vendor_rx = client.open().await?;
        let spec = client.audio_spec();

        let (tool_tx, tool_done_rx) = spawn_tool_worker(orchestrator);
        let frame_bytes =
            (TELEPHONY_SAMPLE_RATE as u64 * server.frame_interval_ms / 1_000).max(1) as usize;

        Ok(Self {
            config,
            state: SessionState::Active,
            client,
            spec,
            vendor_rx: Some(vendor_rx),
            buffer: PlaybackBuffer::new(server.buffer_capacity_frames()),
            pending_out: BytesMut::new(),
            frame_bytes,
            tool_tx,
            tool_done_rx,
            pending_termination: None,
            tool_call_response_id: None,
            termination: None,
            usage: UsageCounters::default(),
            transcript: Vec::new(),
            started_at: Instant::now(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    /// Forward one caller audio frame to the vendor. Frames arriving after
    /// termination was honored are dropped.
    pub async fn on_inbound_audio(&mut self, frame: Bytes) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Ok(());
        }
        let converted = audio::to_vendor(&frame, &self.spec);
        self.client.send_audio(converted).await?;
        Ok(())
    }

    /// Next paced playback frame, in the telephony format.
    pub fn next_playback_frame(&mut self) -> Option<Bytes> {
        self.buffer.pop()
    }

    /// Whether all queued playback has been delivered.
    pub fn playback_idle(&self) -> bool {
        self.buffer.is_empty() && self.pending_out.is_empty()
    }

    /// Checked on the playout tick: once the farewell has fully drained,
    /// move to `Disconnecting` and tell the handler to hang up.
    pub fn ready_to_disconnect(&mut self) -> bool {
        if self.state == SessionState::Draining && self.playback_idle() {
            tracing::info!(session_id = self.config.session_id, "Farewell drained");
            self.state = SessionState::Disconnecting;
            true
        } else {
            false
        }
    }

    /// Record a termination decided outside the model, such as the caller
    /// hanging up. The first recorded termination wins.
    pub fn record_termination(&mut self, outcome: TerminationOutcome) {
        if self.termination.is_none() {
            self.termination = Some(outcome);
        }
        if self.state != SessionState::Closed {
            self.state = SessionState::Disconnecting;
        }
    }

    /// Pump vendor events and tool results until one requires handler
    /// action. Intended to be polled from the handler's select loop.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            tokio::select! {
                event = recv_vendor(&mut self.vendor_rx) => {
                    match event {
                        Some(event) => {
                            if let Some(out) = self.on_vendor_event(event).await {
                                return out;
                            }
                        }
                        None => {
                            self.vendor_rx = None;
                            if let Some(out) = self.on_vendor_gone() {
                                return out;
                            }
                        }
                    }
                }
                done = self.tool_done_rx.recv() => {
                    if let Some(done) = done {
                        self.on_tool_done(done).await;
                    }
                }
            }
        }
    }

    async fn on_vendor_event(&mut self, event: VendorEvent) -> Option<SessionEvent> {
        match event {
            VendorEvent::AudioDelta { data } => {
                let converted = audio::from_vendor(&data, &self.spec);
                self.pending_out.extend_from_slice(&converted);
                while self.pending_out.len() >= self.frame_bytes {
                    let frame = self.pending_out.split_to(self.frame_bytes).freeze();
                    self.buffer.push(frame);
                }
                None
            }
            VendorEvent::TranscriptDelta { role, text, is_final } => {
                if is_final && !text.trim().is_empty() {
                    self.transcript.push(TranscriptEntry { role, text });
                }
                None
            }
            VendorEvent::SpeechStarted { audio_start_ms } => {
                if self.state == SessionState::Active {
                    tracing::debug!(
                        session_id = self.config.session_id,
                        audio_start_ms,
                        "Caller barge-in"
                    );
                    self.buffer.clear();
                    self.pending_out.clear();
                    Some(SessionEvent::BargeIn)
                } else {
                    None
                }
            }
            VendorEvent::ToolCallRequested(request) => {
                if self.state == SessionState::Active {
                    if self.tool_tx.try_send(ToolCommand::Call(request)).is_err() {
                        tracing::warn!(
                            session_id = self.config.session_id,
                            "Tool worker queue full; dropping tool call"
                        );
                    }
                } else {
                    tracing::debug!(
                        session_id = self.config.session_id,
                        tool = request.name,
                        "Ignoring tool call after termination"
                    );
                }
                None
            }
            VendorEvent::TurnCompleted { response_id } => {
                let _ = self.tool_tx.try_send(ToolCommand::ResetTurn);
                // Flush the sub-frame remainder of the finished turn
                if !self.pending_out.is_empty() {
                    let rest = self.pending_out.split().freeze();
                    self.buffer.push(rest);
                }
                if self.pending_termination.is_some()
                    && self.tool_call_response_id.is_some()
                    && self.tool_call_response_id == response_id
                {
                    // This is the turn that carried the call-control tool;
                    // the farewell turn is still coming.
                    self.tool_call_response_id = None;
                } else if let Some(termination) = self.pending_termination.take() {
                    self.termination = Some(match termination {
                        ToolTermination::Success { summary } => {
                            TerminationOutcome::Success { summary }
                        }
                        ToolTermination::Escalation { reason, department } => {
                            TerminationOutcome::Escalation { reason, department }
                        }
                    });
                    self.tool_call_response_id = None;
                    self.state = SessionState::Draining;
                    tracing::info!(
                        session_id = self.config.session_id,
                        "Termination honored; draining farewell"
                    );
                }
                None
            }
            VendorEvent::UsageReported(report) => {
                self.usage.add(&report);
                None
            }
            VendorEvent::VendorError { message, fatal } => {
                if fatal {
                    tracing::error!(
                        session_id = self.config.session_id,
                        "Vendor leg failed: {message}"
                    );
                    self.fail(message)
                } else {
                    tracing::warn!(
                        session_id = self.config.session_id,
                        "Vendor error: {message}"
                    );
                    None
                }
            }
            VendorEvent::Closed => {
                self.vendor_rx = None;
                self.on_vendor_gone()
            }
        }
    }

    /// The vendor stream ended. Mid-call this is a failure; during a drain
    /// or disconnect it is expected.
    fn on_vendor_gone(&mut self) -> Option<SessionEvent> {
        match self.state {
            SessionState::Active => self.fail("vendor stream ended unexpectedly".to_string()),
            _ => None,
        }
    }

    fn fail(&mut self, message: String) -> Option<SessionEvent> {
        if self.termination.is_none() {
            self.termination = Some(TerminationOutcome::Error { message });
        }
        self.state = SessionState::Failed;
        Some(SessionEvent::Disconnect)
    }

    async fn on_tool_done(&mut self, done: ToolCallDone) {
        if let Some(termination) = &done.disposition.termination {
            tracing::info!(
                session_id = self.config.session_id,
                tool = done.name,
                "Call-control termination pending farewell"
            );
            if self.pending_termination.is_none() {
                self.pending_termination = Some(termination.clone());
                self.tool_call_response_id = done.response_id.clone();
            }
        }
        if let Err(e) = self
            .client
            .send_tool_result(&done.call_id, &done.disposition.payload)
            .await
        {
            tracing::warn!(
                session_id = self.config.session_id,
                tool = done.name,
                "Failed to deliver tool result: {e}"
            );
        }
    }

    /// Tear down the vendor leg. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Err(e) = self.client.close().await {
            tracing::debug!(
                session_id = self.config.session_id,
                "Vendor close error during shutdown: {e}"
            );
        }
        self.state = SessionState::Closed;
        tracing::info!(
            session_id = self.config.session_id,
            dropped_frames = self.buffer.dropped_count(),
            "Session closed"
        );
    }

    /// The reconciled outcome for the disconnect message.
    pub fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            termination: self
                .termination
                .clone()
                .unwrap_or(TerminationOutcome::ClientDisconnect),
            usage: self.usage,
            transcript: self.transcript.clone(),
            duration: self.started_at.elapsed(),
        }
    }
}

async fn recv_vendor(rx: &mut Option<mpsc::Receiver<VendorEvent>>) -> Option<VendorEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn spawn_tool_worker(
    mut orchestrator: ToolOrchestrator,
) -> (mpsc::Sender<ToolCommand>, mpsc::Receiver<ToolCallDone>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel(TOOL_CHANNEL_CAPACITY);
    let (done_tx, done_rx) = mpsc::channel(TOOL_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while let Some(command) = cmd_rx.recv().await {
            match command {
                ToolCommand::Call(request) => {
                    let call_id = request.call_id.clone();
                    let name = request.name.clone();
                    let response_id = request.response_id.clone();
                    let disposition = orchestrator.handle(request).await;
                    if done_tx
                        .send(ToolCallDone {
                            call_id,
                            name,
                            response_id,
                            disposition,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                ToolCommand::ResetTurn => orchestrator.reset_turn(),
            }
        }
    });

    (cmd_tx, done_rx)
}
