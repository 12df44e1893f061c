//! Session read-model for the dashboard and HTTP API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};

use vg_domain::message::{Message, Role, ToolCall};
use vg_sessions::Session;

use crate::state::AppState;

const TITLE_MAX: usize = 50;
const PREVIEW_MAX: usize = 100;

/// GET /api/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = sessions_view(&state);
    let count = sessions.as_array().map(Vec::len).unwrap_or(0);
    Json(json!({ "sessions": sessions, "count": count }))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.get(&id) {
        Some(session) => Json(conversation_view(&session)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )
            .into_response(),
    }
}

/// GET /api/sessions/:id/history
pub async fn get_session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.get(&id) {
        Some(session) => {
            let items = timeline_items(&session.conversation_snapshot());
            let count = items.len();
            Json(json!({
                "session_id": id,
                "history": items,
                "count": count,
            }))
            .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// View builders (shared with the dashboard channel)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Summaries of every live session.
pub fn sessions_view(state: &AppState) -> Value {
    let mut sessions = state.sessions.list();
    sessions.sort_by_key(|s| std::cmp::Reverse(s.last_activity()));
    Value::Array(sessions.iter().map(|s| session_summary(s)).collect())
}

fn session_summary(session: &Session) -> Value {
    let conversation = session.conversation_snapshot();
    json!({
        "session_id": session.session_id,
        "title": session_title(&conversation),
        "preview": session_preview(&conversation),
        "message_count": conversation.len(),
        "audio_active": session.audio_active(),
        "created_at": session.created_at.to_rfc3339(),
        "last_activity": session.last_activity().to_rfc3339(),
    })
}

/// Title derived from the first user message.
fn session_title(conversation: &[Message]) -> String {
    conversation
        .iter()
        .find(|m| m.role == Role::User && !m.content.is_empty())
        .map(|m| truncate(&m.content, TITLE_MAX))
        .unwrap_or_else(|| "New conversation".to_string())
}

fn session_preview(conversation: &[Message]) -> String {
    conversation
        .iter()
        .rev()
        .find(|m| !m.content.is_empty())
        .map(|m| truncate(&m.content, PREVIEW_MAX))
        .unwrap_or_default()
}

fn conversation_view(session: &Session) -> Value {
    let conversation = session.conversation_snapshot();
    json!({
        "session_id": session.session_id,
        "title": session_title(&conversation),
        "created_at": session.created_at.to_rfc3339(),
        "last_activity": session.last_activity().to_rfc3339(),
        "items": timeline_items(&conversation),
    })
}

/// The conversation as dashboard timeline items.
fn timeline_items(conversation: &[Message]) -> Vec<Value> {
    conversation
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut item = json!({ "role": role, "content": m.content });
            if !m.tool_calls.is_empty() {
                item["tool_calls"] = Value::Array(
                    m.tool_calls
                        .iter()
                        .map(|call| match call {
                            ToolCall::Invocation {
                                id,
                                name,
                                arguments,
                            } => json!({
                                "id": id,
                                "name": name,
                                "arguments": arguments,
                            }),
                            ToolCall::Result { tool_name, content } => json!({
                                "tool_name": tool_name,
                                "content": content,
                            }),
                        })
                        .collect(),
                );
            }
            item
        })
        .collect()
}

/// The agent configuration view served at /api/config and in the
/// dashboard initial state.
pub fn agent_config_view(state: &AppState) -> Value {
    json!({
        "agent_name": state.config.agent.name,
        "model": state.llm.model_id(),
        "instructions_preview": truncate(&state.config.agent.instructions, 200),
        "tools": state.tools.names(),
        "stt_enabled": state.stt.is_some(),
        "vad_enabled": state.config.vad.enabled,
        "turn_detector_enabled": state.turn_detector.is_some(),
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end < s.len() && !s.is_char_boundary(end) {
            end += 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_comes_from_first_user_message() {
        let conversation = vec![
            Message::system("instructions"),
            Message::user("what's the weather like in Lisbon today?"),
            Message::assistant("Sunny."),
        ];
        assert_eq!(
            session_title(&conversation),
            "what's the weather like in Lisbon today?"
        );
    }

    #[test]
    fn long_titles_truncate() {
        let conversation = vec![Message::user("x".repeat(80))];
        let title = session_title(&conversation);
        assert!(title.ends_with("..."));
        assert!(title.len() <= TITLE_MAX + 3);
    }

    #[test]
    fn empty_conversation_gets_placeholder_title() {
        assert_eq!(session_title(&[]), "New conversation");
    }

    #[test]
    fn preview_is_the_latest_nonempty_message() {
        let conversation = vec![
            Message::user("question"),
            Message::assistant("answer"),
            Message::assistant(""),
        ];
        assert_eq!(session_preview(&conversation), "answer");
    }

    #[test]
    fn timeline_carries_tool_calls() {
        let conversation = vec![Message::assistant_with_calls(
            "",
            vec![ToolCall::Invocation {
                id: Some("c1".into()),
                name: "echo".into(),
                arguments: "{}".into(),
            }],
        )];
        let items = timeline_items(&conversation);
        assert_eq!(items[0]["tool_calls"][0]["name"], "echo");
    }
}
