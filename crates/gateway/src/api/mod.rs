//! HTTP control surface and router.

pub mod sessions;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};

use crate::state::AppState;
use crate::ws;

/// Build the application router: the two WebSocket endpoints plus the
/// HTTP read-model.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::client::client_ws))
        .route("/ws/dashboard", get(ws::dashboard::dashboard_ws))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/:id", get(sessions::get_session))
        .route("/api/sessions/:id/history", get(sessions::get_session_history))
        .route("/api/dashboard/metrics", get(dashboard_metrics))
        .route("/api/config", get(agent_config))
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        "active_connections": state.metrics.active_connections(),
    }))
}

/// GET /metrics
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    if !state.config.metrics.enabled {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Metrics disabled" })),
        )
            .into_response();
    }
    Json(state.metrics.snapshot()).into_response()
}

/// GET /api/dashboard/metrics
async fn dashboard_metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "metrics": ui_metrics(&state),
        "server_metrics": state.metrics.snapshot(),
    }))
}

/// GET /api/config
async fn agent_config(State(state): State<AppState>) -> Json<Value> {
    Json(sessions::agent_config_view(&state))
}

/// The dashboard's flat metrics shape.
pub fn ui_metrics(state: &AppState) -> Value {
    let snapshot = state.metrics.snapshot();
    json!({
        "total_messages": snapshot.total_messages,
        "total_tool_calls": snapshot.total_tool_calls,
        "total_errors": snapshot.total_errors,
        "average_latency_ms": snapshot.average_latency_ms,
        "active_connections": snapshot.active_connections,
        "uptime_seconds": snapshot.uptime_seconds,
    })
}
