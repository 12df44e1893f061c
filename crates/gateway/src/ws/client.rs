//! Client WebSocket endpoint.
//!
//! Flow per connection:
//! 1. upgrade, authenticate via `x-api-key` / `x-app-id` headers
//! 2. allocate an initial session and send `server_connected`
//! 3. loop: parse frames, locate/create the session, dispatch by type
//! 4. on close: stop recognition for every session this connection drove
//!
//! This module is the single translation layer from domain errors to
//! client-visible `server_error` frames: every failed frame produces
//! exactly one, and no frame is dropped silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use vg_domain::error::{Error, Result};
use vg_domain::stream::AudioEncoding;
use vg_providers::resolver;
use vg_providers::vad::{bytes_to_i16, VadEvent};
use vg_sessions::Session;

use crate::protocol::{parse_client_message, ClientMessage, FrameLimits, ServerMessage};
use crate::runtime::agent::{self, AgentContext};
use crate::runtime::recognition::{AudioRecognition, RecognitionCallbacks};
use crate::state::AppState;

/// Keepalive cadence while an agent turn is running.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upgrade handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn client_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let api_key = header_value(&headers, "x-api-key");
    let app_id = header_value(&headers, "x-app-id");
    ws.on_upgrade(move |socket| handle_socket(socket, state, api_key, app_id))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// Outbound half of the socket, shared by the message loop, keepalive
/// tasks, and recognition callbacks.
#[derive(Clone)]
pub(crate) struct Outbound {
    tx: mpsc::Sender<Message>,
}

impl Outbound {
    pub(crate) async fn send_msg(&self, msg: &ServerMessage) -> bool {
        self.tx.send(Message::Text(msg.to_json())).await.is_ok()
    }

    async fn ping(&self) -> bool {
        self.tx.send(Message::Ping(Vec::new())).await.is_ok()
    }
}

/// Per-connection bookkeeping: every session this connection has touched
/// and the recognition coordinators it started.
struct ConnState {
    sessions: HashMap<String, Arc<Session>>,
    recognitions: HashMap<String, Arc<AudioRecognition>>,
    current_session_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    api_key: Option<String>,
    app_id: Option<String>,
) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();

    // ── Authenticate ────────────────────────────────────────────────
    let auth_failure = match (&api_key, &app_id) {
        (None, _) => Some("Invalid API key"),
        (Some(key), _) if !(state.api_key_validator)(key) => Some("Invalid API key"),
        (_, None) => Some("Missing x-app-id header"),
        _ => None,
    };
    if let Some(reason) = auth_failure {
        tracing::warn!(connection_id = %connection_id, reason, "authentication failed");
        let _ = ws_sink
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: reason.into(),
            })))
            .await;
        return;
    }
    let app_id = app_id.unwrap_or_default();

    // ── Writer task ─────────────────────────────────────────────────
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });
    let outbound = Outbound { tx: out_tx };

    state.metrics.increment_connection();

    // ── Initial session ─────────────────────────────────────────────
    let initial_id = uuid::Uuid::new_v4().to_string();
    let (initial_session, _) = state
        .sessions
        .get_or_create(&initial_id, state.turn_detector.clone());
    state.metrics.create_session(&initial_id);

    tracing::info!(
        connection_id = %connection_id,
        session_id = %initial_id,
        app_id = %app_id,
        "client authenticated"
    );

    outbound
        .send_msg(&ServerMessage::connected(
            &initial_id,
            json!({ "app_id": app_id, "connection_id": connection_id }),
        ))
        .await;

    let mut conn = ConnState {
        sessions: HashMap::from([(initial_id.clone(), initial_session)]),
        recognitions: HashMap::new(),
        current_session_id: initial_id,
    };

    // ── Message loop ────────────────────────────────────────────────
    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_frame(&state, &outbound, &mut conn, &text).await {
                    report_error(&state, &outbound, &conn.current_session_id, &e).await;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    for (session_id, recognition) in conn.recognitions.drain() {
        tracing::debug!(session_id = %session_id, "stopping recognition on disconnect");
        recognition.stop().await;
    }
    for session in conn.sessions.values() {
        session.take_recognition();
        if session.audio_active() {
            session.end_audio_stream();
        }
    }
    state.metrics.decrement_connection();
    writer.abort();
    tracing::info!(connection_id = %connection_id, "connection closed");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_frame(
    state: &AppState,
    outbound: &Outbound,
    conn: &mut ConnState,
    raw: &str,
) -> Result<()> {
    let limits = FrameLimits {
        max_text_bytes: state.config.server.max_text_size_bytes,
        max_audio_chunk_bytes: state.config.server.max_audio_chunk_size_bytes,
    };
    let message = parse_client_message(raw, limits)?;
    let session_id = message.session_id().to_string();

    // Locate or create the session.
    let session = match conn.sessions.get(&session_id) {
        Some(session) => session.clone(),
        None => {
            let (session, is_new) = state
                .sessions
                .get_or_create(&session_id, state.turn_detector.clone());
            if is_new {
                state.metrics.create_session(&session_id);
                state
                    .events
                    .publish(
                        "session_created",
                        Some(session_id.as_str()),
                        json!({
                            "session_id": session_id,
                            "created_at": session.created_at.to_rfc3339(),
                        }),
                    )
                    .await;
            }
            conn.sessions.insert(session_id.clone(), session.clone());
            session
        }
    };
    session.touch();
    conn.current_session_id = session_id.clone();

    tracing::debug!(kind = message.kind(), session_id = %session_id, "client frame");

    match message {
        ClientMessage::Text { text, metadata, .. } => {
            handle_text(state, outbound, &session, text, metadata).await
        }
        ClientMessage::AudioStart {
            sample_rate,
            encoding,
            ..
        } => handle_audio_start(state, outbound, conn, &session, sample_rate, encoding).await,
        ClientMessage::AudioChunk { chunk, .. } => {
            handle_audio_chunk(state, conn, &session, chunk).await
        }
        ClientMessage::AudioEnd { final_chunk, .. } => {
            handle_audio_end(conn, &session, final_chunk).await
        }
    }
}

// ── Text ────────────────────────────────────────────────────────────

async fn handle_text(
    state: &AppState,
    outbound: &Outbound,
    session: &Arc<Session>,
    text: String,
    metadata: Option<Value>,
) -> Result<()> {
    state.metrics.record_message(&session.session_id);
    state
        .events
        .publish(
            "message_received",
            Some(session.session_id.as_str()),
            json!({
                "text": text.clone(),
                "metadata": metadata.clone().unwrap_or_else(|| json!({})),
                "message_length": text.len(),
            }),
        )
        .await;

    run_agent_turn(state, outbound, session, text, metadata).await;
    Ok(())
}

/// Drive one agent turn, forwarding every yielded message to the socket.
/// A keepalive ping goes out whenever the turn runs long.
async fn run_agent_turn(
    state: &AppState,
    outbound: &Outbound,
    session: &Arc<Session>,
    text: String,
    metadata: Option<Value>,
) {
    let ctx = AgentContext {
        llm: state.llm.clone(),
        tools: state.tools.clone(),
        events: state.events.clone(),
        metrics: state.metrics.clone(),
        instructions: state.config.agent.instructions.clone(),
        tool_call_limit: state.config.agent.tool_call_limit,
    };
    let mut rx = agent::process_text(ctx, session.clone(), text, metadata);

    // Keepalive: a protocol-level ping each interval. If the ping frame
    // cannot be queued, fall back to the heartbeat JSON once before
    // giving up (clients accept both).
    let keepalive = {
        let outbound = outbound.clone();
        let session_id = session.session_id.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if outbound.ping().await {
                    continue;
                }
                let heartbeat = ServerMessage::Heartbeat {
                    session_id: session_id.clone(),
                };
                if !outbound.send_msg(&heartbeat).await {
                    break;
                }
            }
        })
    };

    while let Some(msg) = rx.recv().await {
        if !outbound.send_msg(&msg).await {
            tracing::warn!(
                session_id = %session.session_id,
                kind = msg.kind(),
                "failed to forward agent message, client gone"
            );
            break;
        }
    }
    keepalive.abort();

    let snapshot = state.metrics.snapshot();
    state
        .events
        .publish(
            "metrics_updated",
            None,
            json!({
                "total_messages": snapshot.total_messages,
                "total_tool_calls": snapshot.total_tool_calls,
                "total_errors": snapshot.total_errors,
                "average_latency_ms": snapshot.average_latency_ms,
            }),
        )
        .await;
}

// ── Audio ───────────────────────────────────────────────────────────

async fn handle_audio_start(
    state: &AppState,
    outbound: &Outbound,
    conn: &mut ConnState,
    session: &Arc<Session>,
    sample_rate: u32,
    encoding: AudioEncoding,
) -> Result<()> {
    session.start_audio_stream(sample_rate, encoding)?;

    let Some(stt) = state.stt.clone() else {
        tracing::info!(
            session_id = %session.session_id,
            "audio stream started with STT disabled; chunks will not be transcribed"
        );
        return Ok(());
    };

    // Per-stream VAD processor: needs the stream's sample rate.
    if state.config.vad.enabled {
        let mut vad_config = state.config.vad.clone();
        vad_config.sample_rate = sample_rate;
        match resolver::resolve_vad(&state.plugins, &vad_config.spec, &vad_config) {
            Ok(vad) => session.set_vad(vad),
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "VAD unavailable for this stream, continuing without it"
                );
            }
        }
    }

    let recognition = build_recognition(state, outbound, session, stt);
    recognition
        .start(sample_rate, encoding, Some(state.config.stt.language.clone()))
        .await;

    session.set_recognition(recognition.clone());
    conn.recognitions
        .insert(session.session_id.clone(), recognition);

    tracing::info!(
        session_id = %session.session_id,
        sample_rate,
        encoding = encoding.as_str(),
        vad = state.config.vad.enabled,
        turn_detector = session.turn_detector().is_some(),
        "audio stream started"
    );
    Ok(())
}

/// Wire the coordinator's callbacks to this connection. Each closure
/// captures only what it needs: the outbound sender, the session handle,
/// and the application state for the agent entry point.
fn build_recognition(
    state: &AppState,
    outbound: &Outbound,
    session: &Arc<Session>,
    stt: Arc<dyn vg_providers::traits::SttHandler>,
) -> Arc<AudioRecognition> {
    let session_id = session.session_id.clone();

    let on_transcript = {
        let outbound = outbound.clone();
        let state = state.clone();
        let session_id = session_id.clone();
        Arc::new(move |transcript: vg_domain::stream::Transcript| {
            let outbound = outbound.clone();
            let state = state.clone();
            let session_id = session_id.clone();
            Box::pin(async move {
                if transcript.is_final {
                    state.metrics.record_stt_transcription(&session_id, None);
                }
                outbound
                    .send_msg(&ServerMessage::stt(
                        &session_id,
                        &transcript.text,
                        transcript.is_final,
                        transcript.confidence,
                    ))
                    .await;
            }) as futures_util::future::BoxFuture<'static, ()>
        })
    };

    let on_turn_end = {
        let state = state.clone();
        let outbound = outbound.clone();
        let session = session.clone();
        Arc::new(move |transcript: String| {
            let state = state.clone();
            let outbound = outbound.clone();
            let session = session.clone();
            Box::pin(async move {
                tracing::info!(
                    session_id = %session.session_id,
                    "user turn committed, running agent"
                );
                session.touch();
                state.metrics.record_message(&session.session_id);
                state
                    .events
                    .publish(
                        "message_received",
                        Some(session.session_id.as_str()),
                        json!({
                            "text": transcript.clone(),
                            "metadata": { "source": "audio", "transcription": true },
                            "message_length": transcript.len(),
                        }),
                    )
                    .await;

                // Detached so a barge-in (which cancels the commit task)
                // does not tear down the in-flight response.
                tokio::spawn(async move {
                    run_agent_turn(&state, &outbound, &session, transcript, None).await;
                });
            }) as futures_util::future::BoxFuture<'static, ()>
        })
    };

    let on_error = {
        let state = state.clone();
        let outbound = outbound.clone();
        let session_id = session_id.clone();
        Arc::new(move |error: Error| {
            let state = state.clone();
            let outbound = outbound.clone();
            let session_id = session_id.clone();
            Box::pin(async move {
                report_error(&state, &outbound, &session_id, &error).await;
            }) as futures_util::future::BoxFuture<'static, ()>
        })
    };

    let history = {
        let session = session.clone();
        Arc::new(move || session.history_for_turn_detector())
    };

    Arc::new(AudioRecognition::new(
        stt,
        session.turn_detector(),
        Duration::from_secs_f64(state.config.endpointing.min_delay_secs),
        Duration::from_secs_f64(state.config.endpointing.max_delay_secs),
        state.config.audio.queue_capacity,
        RecognitionCallbacks {
            on_transcript,
            on_turn_end,
            on_error,
            history,
        },
    ))
}

async fn handle_audio_chunk(
    state: &AppState,
    conn: &mut ConnState,
    session: &Arc<Session>,
    chunk: Vec<u8>,
) -> Result<()> {
    let Some(recognition) = conn.recognitions.get(&session.session_id).cloned() else {
        return Err(Error::AudioProcessing {
            message: "audio stream not active; send client_audio_start first".into(),
            retriable: true,
        });
    };

    recognition.push_audio_frame(chunk.clone()).await;

    // Slide the VAD over the chunk window-by-window on a blocking worker;
    // inference is compute-bound.
    if session.audio_active() {
        let vad_session = session.clone();
        let vad_chunk = chunk;
        let events = tokio::task::spawn_blocking(move || {
            vad_session
                .with_vad(|vad| {
                    let samples = bytes_to_i16(&vad_chunk);
                    let window = vad.window_size_samples();
                    let mut out = Vec::new();
                    for frame in samples.chunks_exact(window) {
                        match vad.process_frame(frame) {
                            Ok(result) if result.event != VadEvent::Continuing => {
                                out.push((result.event, result.probability));
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "VAD frame processing failed");
                            }
                        }
                    }
                    out
                })
                .unwrap_or_default()
        })
        .await
        .unwrap_or_default();

        for (event, probability) in events {
            recognition.handle_vad_event(event, probability).await;
        }
    }

    state.metrics.record_audio_chunk(&session.session_id);
    Ok(())
}

async fn handle_audio_end(
    conn: &mut ConnState,
    session: &Arc<Session>,
    final_chunk: Option<Vec<u8>>,
) -> Result<()> {
    if let Some(recognition) = conn.recognitions.remove(&session.session_id) {
        if let Some(chunk) = final_chunk {
            recognition.push_audio_frame(chunk).await;
        }
        recognition.stop().await;
    }
    session.take_recognition();
    session.clear_vad();
    session.end_audio_stream();
    tracing::info!(session_id = %session.session_id, "audio stream ended");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exactly one `server_error` per surfaced failure, plus the bus event
/// and the error counter.
async fn report_error(state: &AppState, outbound: &Outbound, session_id: &str, error: &Error) {
    tracing::error!(
        session_id = %session_id,
        code = error.code(),
        retriable = error.retriable(),
        error = %error,
        "client-visible error"
    );
    state.metrics.record_error(session_id);
    state
        .events
        .publish(
            "error",
            Some(session_id),
            json!({
                "error_code": error.code(),
                "message": error.to_string(),
                "retriable": error.retriable(),
            }),
        )
        .await;
    outbound
        .send_msg(&ServerMessage::error(session_id, error))
        .await;
}
