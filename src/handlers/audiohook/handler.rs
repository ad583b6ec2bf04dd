//! Telephony WebSocket handler.
//!
//! One socket carries one call. Text frames are protocol messages, binary
//! frames are caller audio in the negotiated format. The handler negotiates
//! media at open, drives the session controller's playout cadence, relays
//! barge-in events, and reports the session outcome in the disconnect
//! message. Outbound traffic is rate limited per the platform's contract.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use governor::{Quota, RateLimiter};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::session::{
    SessionConfig, SessionController, SessionEvent, SessionOutcome, TerminationOutcome,
};
use crate::state::AppState;
use crate::store::SessionRecord;
use crate::utils::parse_iso8601_duration;

use super::messages::{ClientMessage, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum 429 backoff cycles before giving up on the connection.
const RATE_LIMIT_MAX_RETRIES: u32 = 3;

/// Fallback backoff schedule when the platform omits `retryAfter`:
/// (session age ceiling in seconds, delay in seconds).
const RATE_LIMIT_PHASES: [(u64, u64); 3] = [(300, 3), (600, 9), (u64::MAX, 27)];

/// Upgrade handler for the telephony WebSocket endpoint. Authentication has
/// already happened in middleware.
pub async fn audiohook_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Telephony WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum Outbound {
    Protocol(ServerMessage),
    Audio(Bytes),
    Close,
}

struct HandlerSession {
    session_id: String,
    server_seq: u64,
    client_seq: u64,
    controller: Option<SessionController>,
    disconnect_sent: bool,
    retry_count: u32,
    started: Instant,
    frames_received: u64,
    frames_sent: u64,
}

impl HandlerSession {
    fn next_seq(&mut self) -> u64 {
        self.server_seq += 1;
        self.server_seq
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(CHANNEL_BUFFER_SIZE);

    // Outbound writer task; enforces the platform's per-second limits for
    // protocol messages and binary frames separately
    let message_limit =
        NonZeroU32::new(state.config.message_rate_limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let binary_limit =
        NonZeroU32::new(state.config.binary_rate_limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(state.config.rate_burst_limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let sender_task = tokio::spawn(async move {
        let message_limiter = RateLimiter::direct(Quota::per_second(message_limit).allow_burst(burst));
        let binary_limiter = RateLimiter::direct(Quota::per_second(binary_limit).allow_burst(burst));

        while let Some(outbound) = out_rx.recv().await {
            let result = match outbound {
                Outbound::Protocol(msg) => {
                    message_limiter.until_ready().await;
                    match serde_json::to_string(&msg) {
                        Ok(text) => sender.send(Message::Text(text.into())).await,
                        Err(e) => {
                            error!("Failed to serialize protocol message: {e}");
                            continue;
                        }
                    }
                }
                Outbound::Audio(frame) => {
                    binary_limiter.until_ready().await;
                    sender.send(Message::Binary(frame)).await
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                debug!("Telephony socket closed while writing");
                break;
            }
        }
    });

    let mut session = HandlerSession {
        session_id: String::new(),
        server_seq: 0,
        client_seq: 0,
        controller: None,
        disconnect_sent: false,
        retry_count: 0,
        started: Instant::now(),
        frames_received: 0,
        frames_sent: 0,
    };

    let mut playout = tokio::time::interval(state.config.frame_interval());
    playout.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_text_frame(&text, &mut session, &out_tx, &state).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        session.frames_received += 1;
                        if let Some(controller) = session.controller.as_mut()
                            && let Err(e) = controller.on_inbound_audio(data).await
                        {
                            warn!(
                                session_id = session.session_id,
                                "Failed to forward caller audio: {e}"
                            );
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session_id = session.session_id, "Telephony socket closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id = session.session_id, "Telephony socket error: {e}");
                        break;
                    }
                }
            }
            _ = playout.tick() => {
                if let Some(controller) = session.controller.as_mut() {
                    if let Some(frame) = controller.next_playback_frame() {
                        session.frames_sent += 1;
                        if out_tx.send(Outbound::Audio(frame)).await.is_err() {
                            break;
                        }
                    }
                    if !session.disconnect_sent && controller.ready_to_disconnect() {
                        send_disconnect(&mut session, &out_tx, &state).await;
                    }
                }
            }
            event = next_session_event(&mut session.controller) => {
                match event {
                    SessionEvent::BargeIn => {
                        let msg = ServerMessage::barge_in_event(
                            session.server_seq + 1,
                            session.client_seq,
                            &session.session_id,
                        );
                        session.next_seq();
                        let _ = out_tx.send(Outbound::Protocol(msg)).await;
                    }
                    SessionEvent::Disconnect => {
                        if !session.disconnect_sent {
                            send_disconnect(&mut session, &out_tx, &state).await;
                        }
                    }
                }
            }
        }
    }

    // Teardown: close the vendor leg, record the outcome, stop the writer
    if let Some(mut controller) = session.controller.take() {
        controller.shutdown().await;
        let outcome = controller.outcome();
        state.sessions.finish(&session.session_id, &outcome).await;
    }
    let _ = out_tx.send(Outbound::Close).await;
    drop(out_tx);
    let _ = sender_task.await;

    info!(
        session_id = session.session_id,
        duration_secs = session.started.elapsed().as_secs(),
        frames_received = session.frames_received,
        frames_sent = session.frames_sent,
        "Telephony session ended"
    );
}

async fn next_session_event(controller: &mut Option<SessionController>) -> SessionEvent {
    match controller {
        Some(controller) => controller.next_event().await,
        None => std::future::pending().await,
    }
}

/// Dispatch one protocol message. Returns false to end the connection.
async fn handle_text_frame(
    text: &str,
    session: &mut HandlerSession,
    out_tx: &mpsc::Sender<Outbound>,
    state: &Arc<AppState>,
) -> bool {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(session_id = session.session_id, "Unparseable protocol message: {e}");
            return true;
        }
    };
    session.client_seq = msg.seq;

    match msg.kind.as_str() {
        "open" => handle_open(&msg, session, out_tx, state).await,
        "ping" => {
            let pong = ServerMessage::pong(
                session.server_seq + 1,
                session.client_seq,
                &session.session_id,
            );
            session.next_seq();
            let _ = out_tx.send(Outbound::Protocol(pong)).await;
            true
        }
        "close" => {
            info!(
                session_id = session.session_id,
                reason = msg.close_reason().unwrap_or_default(),
                "Close received"
            );
            if let Some(controller) = session.controller.as_mut()
                && !session.disconnect_sent
            {
                controller.record_termination(TerminationOutcome::ClientDisconnect);
            }
            let closed = ServerMessage::closed(
                session.server_seq + 1,
                session.client_seq,
                &session.session_id,
            );
            session.next_seq();
            let _ = out_tx.send(Outbound::Protocol(closed)).await;
            false
        }
        "error" => handle_platform_error(&msg, session, out_tx, state).await,
        "update" | "pause" | "resume" => {
            debug!(session_id = session.session_id, kind = msg.kind, "Ignoring message");
            true
        }
        other => {
            debug!(session_id = session.session_id, kind = other, "Unknown message type");
            true
        }
    }
}

async fn handle_open(
    msg: &ClientMessage,
    session: &mut HandlerSession,
    out_tx: &mpsc::Sender<Outbound>,
    state: &Arc<AppState>,
) -> bool {
    session.session_id = msg.id.clone();

    let params = match msg.open_parameters() {
        Ok(params) => params,
        Err(e) => {
            warn!(session_id = session.session_id, "Malformed open parameters: {e}");
            send_error_disconnect(session, out_tx, "invalid open parameters").await;
            return false;
        }
    };

    // Health probes get an empty media answer and no vendor session
    if params.is_probe() {
        info!(session_id = session.session_id, "Probe connection");
        let opened = ServerMessage::opened(
            session.server_seq + 1,
            session.client_seq,
            &session.session_id,
            Vec::new(),
        );
        session.next_seq();
        let _ = out_tx.send(Outbound::Protocol(opened)).await;
        return true;
    }

    let Some(media) = params.choose_media().cloned() else {
        warn!(session_id = session.session_id, "No supported media format offered");
        send_error_disconnect(session, out_tx, "no supported media format").await;
        return false;
    };

    let config = match SessionConfig::from_input_variables(
        &params.conversation_id,
        &session.session_id,
        &params.input_variables,
        &state.config,
    ) {
        Ok(config) => config,
        Err(e) => {
            error!(session_id = session.session_id, "Session configuration rejected: {e}");
            send_error_disconnect(session, out_tx, &e.to_string()).await;
            return false;
        }
    };

    let backend = config.backend;
    let controller = match SessionController::start(config, &state.config, state.actions.clone()).await
    {
        Ok(controller) => controller,
        Err(e) => {
            error!(session_id = session.session_id, "Vendor session failed to open: {e}");
            send_error_disconnect(session, out_tx, &e.to_string()).await;
            return false;
        }
    };

    state
        .sessions
        .insert(SessionRecord {
            session_id: session.session_id.clone(),
            conversation_id: params.conversation_id.clone(),
            state: "active".to_string(),
            backend: backend.to_string(),
            started_at: SystemTime::now(),
            outcome: None,
        })
        .await;
    session.controller = Some(controller);

    let opened = ServerMessage::opened(
        session.server_seq + 1,
        session.client_seq,
        &session.session_id,
        vec![media.clone()],
    );
    session.next_seq();
    let _ = out_tx.send(Outbound::Protocol(opened)).await;
    info!(
        session_id = session.session_id,
        conversation_id = params.conversation_id,
        format = media.format,
        rate = media.rate,
        "Session opened"
    );
    true
}

/// 429 backoff. The platform tells us to slow down; pause the session for
/// the indicated (or phased) delay, give up after too many cycles.
async fn handle_platform_error(
    msg: &ClientMessage,
    session: &mut HandlerSession,
    out_tx: &mpsc::Sender<Outbound>,
    state: &Arc<AppState>,
) -> bool {
    let params = msg.error_parameters();
    if params.code != Some(429) {
        warn!(
            session_id = session.session_id,
            code = params.code,
            message = params.message.as_deref().unwrap_or(""),
            "Platform error"
        );
        return true;
    }

    session.retry_count += 1;
    if session.retry_count > RATE_LIMIT_MAX_RETRIES {
        error!(
            session_id = session.session_id,
            retries = session.retry_count,
            "Rate limit retries exhausted"
        );
        if let Some(controller) = session.controller.as_mut() {
            controller.record_termination(TerminationOutcome::Error {
                message: "platform rate limit retries exhausted".to_string(),
            });
        }
        send_disconnect(session, out_tx, state).await;
        return false;
    }

    let delay = params
        .retry_after
        .as_deref()
        .and_then(parse_iso8601_duration)
        .unwrap_or_else(|| {
            let age = session.started.elapsed().as_secs();
            let secs = RATE_LIMIT_PHASES
                .iter()
                .find(|(window, _)| age <= *window)
                .map(|(_, delay)| *delay)
                .unwrap_or(RATE_LIMIT_PHASES[RATE_LIMIT_PHASES.len() - 1].1);
            Duration::from_secs(secs)
        });

    warn!(
        session_id = session.session_id,
        attempt = session.retry_count,
        delay_secs = delay.as_secs_f64(),
        "Rate limited by platform, backing off"
    );
    tokio::time::sleep(delay).await;
    info!(session_id = session.session_id, "Backoff complete, resuming");
    true
}

/// Send the outcome-bearing disconnect for the session's recorded
/// termination.
async fn send_disconnect(
    session: &mut HandlerSession,
    out_tx: &mpsc::Sender<Outbound>,
    state: &Arc<AppState>,
) {
    let outcome = match session.controller.as_ref() {
        Some(controller) => controller.outcome(),
        None => return,
    };
    let (reason, info) = disconnect_reason(&outcome);

    let msg = ServerMessage::disconnect(
        session.server_seq + 1,
        session.client_seq,
        &session.session_id,
        reason,
        &info,
        outcome.output_variables(),
    );
    session.next_seq();
    session.disconnect_sent = true;
    state.sessions.set_state(&session.session_id, "disconnecting").await;
    info!(session_id = session.session_id, reason, "Disconnecting session");
    let _ = out_tx.send(Outbound::Protocol(msg)).await;
}

async fn send_error_disconnect(
    session: &mut HandlerSession,
    out_tx: &mpsc::Sender<Outbound>,
    info: &str,
) {
    let msg = ServerMessage::disconnect(
        session.server_seq + 1,
        session.client_seq,
        &session.session_id,
        "error",
        info,
        Default::default(),
    );
    session.next_seq();
    session.disconnect_sent = true;
    let _ = out_tx.send(Outbound::Protocol(msg)).await;
}

fn disconnect_reason(outcome: &SessionOutcome) -> (&'static str, String) {
    match &outcome.termination {
        TerminationOutcome::Success { summary } => ("completed", summary.clone()),
        TerminationOutcome::Escalation { reason, .. } => ("transfer", reason.clone()),
        TerminationOutcome::Error { message } => ("error", message.clone()),
        TerminationOutcome::ClientDisconnect => ("completed", String::new()),
    }
}
