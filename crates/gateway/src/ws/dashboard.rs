//! Dashboard WebSocket endpoint.
//!
//! Dashboard clients subscribe to the event bus. On connect they receive
//! an `initial_state` snapshot (sessions, metrics, agent config) and then
//! every bus event as `{type:"event", ...}`. Incoming `ping` frames are
//! answered with `pong`; `subscribe` frames are accepted (filters are
//! reserved for later).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use vg_domain::error::Error;

use crate::api::sessions::{agent_config_view, sessions_view};
use crate::api::ui_metrics;
use crate::state::AppState;

pub async fn dashboard_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(socket, state, api_key))
}

async fn handle_socket(socket: WebSocket, state: AppState, api_key: Option<String>) {
    let dashboard_id = uuid::Uuid::new_v4().to_string();

    // A supplied key must validate; a missing key is allowed (local
    // dashboards during development).
    if let Some(key) = &api_key {
        if !(state.api_key_validator)(key) {
            tracing::warn!(dashboard_id = %dashboard_id, "dashboard auth failed");
            return;
        }
    } else {
        tracing::info!(dashboard_id = %dashboard_id, "dashboard connected without API key");
    }

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // ── Subscribe to the event bus ──────────────────────────────────
    let active = Arc::new(AtomicBool::new(true));
    let subscriber_id = {
        let out_tx = out_tx.clone();
        let active = active.clone();
        state.events.subscribe(Arc::new(move |event| {
            let out_tx = out_tx.clone();
            let active = active.clone();
            Box::pin(async move {
                if !active.load(Ordering::Acquire) {
                    return Ok(());
                }
                out_tx
                    .send(event.to_dashboard_json())
                    .await
                    .map_err(|_| {
                        active.store(false, Ordering::Release);
                        Error::Connection("dashboard channel closed".into())
                    })
            })
        }))
    };
    tracing::info!(
        dashboard_id = %dashboard_id,
        subscribers = state.events.subscriber_count(),
        "dashboard subscribed"
    );

    // ── Initial state snapshot ──────────────────────────────────────
    let initial_state = json!({
        "type": "initial_state",
        "sessions": sessions_view(&state),
        "metrics": ui_metrics(&state),
        "config": agent_config_view(&state),
    });
    let _ = out_tx.send(initial_state.to_string()).await;

    // ── Incoming messages ───────────────────────────────────────────
    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    let _ = out_tx
                        .send(json!({"type":"error","error":"Invalid JSON"}).to_string())
                        .await;
                    continue;
                };
                match value.get("type").and_then(Value::as_str) {
                    Some("ping") => {
                        let _ = out_tx.send(json!({"type":"pong"}).to_string()).await;
                    }
                    Some("subscribe") => {
                        tracing::info!(
                            dashboard_id = %dashboard_id,
                            filters = %value.get("filters").unwrap_or(&json!({})),
                            "dashboard subscription filters updated"
                        );
                    }
                    other => {
                        tracing::warn!(
                            dashboard_id = %dashboard_id,
                            message_type = ?other,
                            "unknown dashboard message type"
                        );
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // ── Unsubscribe and shut down ───────────────────────────────────
    active.store(false, Ordering::Release);
    state.events.unsubscribe(subscriber_id);
    writer.abort();
    tracing::info!(
        dashboard_id = %dashboard_id,
        remaining = state.events.subscriber_count(),
        "dashboard disconnected"
    );
}
