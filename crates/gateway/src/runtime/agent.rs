//! Agent turn driver.
//!
//! [`process_text`] spawns the tool-call loop for one user input and
//! returns a channel of wire messages: `server_partial` chunks while the
//! model streams, `server_tool_call` / `server_tool_result` around each
//! tool execution, and exactly one terminating `server_text`.
//!
//! Tool calls execute off the event loop with a 30-second timeout; their
//! results are appended to the conversation in causal order and the model
//! is re-invoked until it answers without requesting tools.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use vg_domain::error::Error;
use vg_domain::message::{Message, Role, ToolCall};
use vg_domain::stream::StreamEvent;
use vg_providers::traits::{ChatRequest, LlmModel};
use vg_sessions::Session;
use vg_tools::ToolRegistry;

use crate::events::EventBus;
use crate::metrics::MetricsCollector;
use crate::protocol::ServerMessage;

/// Appended to the system instructions when tool results are present in
/// the conversation, steering the model back to natural language.
const TOOL_RESULT_REMINDER: &str = "\n\nREMINDER: You have just received tool results. \
    Convert them into natural, conversational language. Never output raw JSON, code \
    blocks, or technical data structures; extract the meaningful information and \
    present it plainly.";

/// Everything the turn driver needs from the application state.
#[derive(Clone)]
pub struct AgentContext {
    pub llm: Arc<dyn LlmModel>,
    pub tools: Arc<ToolRegistry>,
    pub events: Arc<EventBus>,
    pub metrics: Arc<MetricsCollector>,
    pub instructions: String,
    pub tool_call_limit: usize,
}

/// A tool call assembled from the model's streamed deltas.
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments_json: String,
}

/// Drive one agent turn. The returned channel completes after exactly one
/// `server_text` message.
pub fn process_text(
    ctx: AgentContext,
    session: Arc<Session>,
    text: String,
    metadata: Option<Value>,
) -> mpsc::Receiver<ServerMessage> {
    let (tx, rx) = mpsc::channel::<ServerMessage>(64);

    tokio::spawn(async move {
        if let Err(e) = run_turn(&ctx, &session, text, metadata.clone(), &tx).await {
            tracing::error!(session_id = %session.session_id, error = %e, "agent turn failed");
            ctx.metrics.record_error(&session.session_id);
            let _ = tx
                .send(ServerMessage::error(&session.session_id, &e))
                .await;
            // The turn contract: always terminate with a server_text.
            let _ = tx
                .send(ServerMessage::text(&session.session_id, "", metadata))
                .await;
        }
    });

    rx
}

/// Prepend system instructions when the history has none; with tool
/// results present, also append the conversion reminder.
fn prepare_messages(instructions: &str, toolkit_instructions: Option<&str>, history: Vec<Message>) -> Vec<Message> {
    let has_system = history.iter().any(|m| m.role == Role::System);
    if has_system || instructions.is_empty() {
        return history;
    }

    let mut system_text = instructions.to_string();
    if let Some(extra) = toolkit_instructions {
        system_text.push_str("\n\n");
        system_text.push_str(extra);
    }
    if history.iter().any(|m| m.role == Role::Tool) {
        system_text.push_str(TOOL_RESULT_REMINDER);
    }

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_text));
    messages.extend(history);
    messages
}

/// Normalize a tool result to a string for the conversation and client:
/// JSON strings are re-serialized to canonical form, structured values
/// are serialized, anything else is stringified.
fn normalize_tool_result(value: &Value) -> String {
    match value {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => serde_json::to_string(&parsed).unwrap_or_else(|_| s.clone()),
            Err(_) => s.clone(),
        },
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

async fn run_turn(
    ctx: &AgentContext,
    session: &Arc<Session>,
    text: String,
    metadata: Option<Value>,
    tx: &mpsc::Sender<ServerMessage>,
) -> vg_domain::error::Result<()> {
    let session_id = session.session_id.clone();
    let turn_start = std::time::Instant::now();

    session.add_message(Message::user(text.as_str()));

    ctx.events
        .publish(
            "agent_response_start",
            Some(session_id.as_str()),
            json!({ "user_message": text }),
        )
        .await;

    let tool_defs = ctx.tools.definitions();
    let toolkit_instructions = ctx.tools.instructions();
    let mut accumulated = String::new();
    let mut chunk_count: u64 = 0;

    for loop_idx in 0..ctx.tool_call_limit.max(1) {
        tracing::debug!(loop_idx, session_id = %session_id, "tool loop iteration");

        let messages = prepare_messages(
            &ctx.instructions,
            toolkit_instructions.as_deref(),
            session.conversation_snapshot(),
        );
        let req = ChatRequest {
            messages,
            tools: tool_defs.clone(),
            ..Default::default()
        };

        let mut stream = match ctx.llm.invoke_stream(req).await {
            Ok(stream) => stream,
            Err(e) => {
                return finish_after_stream_error(ctx, session, &accumulated, metadata, tx, e)
                    .await;
            }
        };

        // ── Consume the model stream ────────────────────────────────
        accumulated.clear();
        let mut pending: Vec<PendingCall> = Vec::new();
        // call_id → (tool_name, argument buffer), for providers that
        // never emit ToolCallFinished.
        let mut assembly: Vec<(String, String, String)> = Vec::new();
        let mut stream_failed: Option<Error> = None;

        use futures_util::StreamExt;
        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Token { text }) => {
                    accumulated.push_str(&text);
                    chunk_count += 1;
                    let _ = tx
                        .send(ServerMessage::partial(&session_id, &text))
                        .await;
                    // Throttled streaming event for the dashboard.
                    if chunk_count % 5 == 0 {
                        ctx.events
                            .publish(
                                "agent_response_chunk",
                                Some(session_id.as_str()),
                                json!({
                                    "chunk_index": chunk_count,
                                    "text_so_far": accumulated.clone(),
                                }),
                            )
                            .await;
                    }
                }
                Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                    assembly.push((call_id, tool_name, String::new()));
                }
                Ok(StreamEvent::ToolCallDelta { call_id, delta }) => {
                    if let Some((_, _, args)) =
                        assembly.iter_mut().find(|(id, _, _)| *id == call_id)
                    {
                        args.push_str(&delta);
                    }
                }
                Ok(StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                }) => {
                    assembly.retain(|(id, _, _)| *id != call_id);
                    pending.push(PendingCall {
                        id: (!call_id.is_empty()).then_some(call_id),
                        name: tool_name,
                        arguments_json: arguments,
                    });
                }
                Ok(StreamEvent::Done { .. }) => {}
                Ok(StreamEvent::Error { message }) => {
                    stream_failed = Some(Error::Agent {
                        message,
                        retriable: true,
                    });
                    break;
                }
                Err(e) => {
                    stream_failed = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = stream_failed {
            return finish_after_stream_error(ctx, session, &accumulated, metadata, tx, e).await;
        }

        // Calls that streamed start/delta but no finish.
        for (call_id, tool_name, arguments_json) in assembly.drain(..) {
            pending.push(PendingCall {
                id: (!call_id.is_empty()).then_some(call_id),
                name: tool_name,
                arguments_json,
            });
        }

        // ── No tool calls: this is the final answer ────────────────
        if pending.is_empty() {
            return finish_turn(ctx, session, &accumulated, metadata, tx, turn_start).await;
        }

        // ── Dispatch tool calls in order ───────────────────────────
        let invocations: Vec<ToolCall> = pending
            .iter()
            .map(|call| ToolCall::Invocation {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments_json.clone(),
            })
            .collect();
        session.add_message(Message::assistant_with_calls(accumulated.as_str(), invocations));

        for call in &pending {
            let (args, parse_note) = parse_arguments(&call.arguments_json);

            let _ = tx
                .send(ServerMessage::tool_call(
                    &session_id,
                    &call.name,
                    args.clone(),
                    call.id.clone(),
                ))
                .await;
            ctx.events
                .publish(
                    "tool_call_start",
                    Some(session_id.as_str()),
                    json!({
                        "tool_name": call.name,
                        "tool_arguments": args.clone(),
                        "tool_call_id": call.id,
                    }),
                )
                .await;
            ctx.metrics.record_tool_call(&session_id);

            tracing::info!(tool = %call.name, session_id = %session_id, "executing tool");
            match ctx.tools.invoke(&call.name, args).await {
                Ok(result) => {
                    let mut content = normalize_tool_result(&result);
                    if let Some(note) = &parse_note {
                        content = format!("{note}\n{content}");
                    }

                    let _ = tx
                        .send(ServerMessage::tool_result_ok(
                            &session_id,
                            &call.name,
                            Value::String(content.clone()),
                            call.id.clone(),
                        ))
                        .await;
                    ctx.events
                        .publish(
                            "tool_call_complete",
                            Some(session_id.as_str()),
                            json!({
                                "tool_name": call.name,
                                "tool_call_id": call.id,
                                "result_preview": truncate(&content, 500),
                                "success": true,
                            }),
                        )
                        .await;

                    session.add_message(Message::tool_result(call.name.as_str(), content));
                }
                Err(e) => {
                    let error_type = match &e {
                        Error::Timeout(_) => "timeout",
                        _ => "execution_error",
                    };
                    tracing::error!(tool = %call.name, error = %e, "tool execution failed");

                    let _ = tx
                        .send(ServerMessage::tool_result_err(
                            &session_id,
                            &call.name,
                            &e.to_string(),
                            call.id.clone(),
                        ))
                        .await;
                    ctx.events
                        .publish(
                            "tool_call_error",
                            Some(session_id.as_str()),
                            json!({
                                "tool_name": call.name,
                                "tool_call_id": call.id,
                                "error": e.to_string(),
                                "error_type": error_type,
                            }),
                        )
                        .await;

                    session.add_message(Message::tool_result(
                        call.name.as_str(),
                        format!("Error: {e}"),
                    ));
                }
            }
        }
        // Loop back with tool results in the conversation.
    }

    // Loop bound hit: surface it and close the turn with what we have.
    let limit_error = Error::Agent {
        message: format!("tool call limit reached ({} iterations)", ctx.tool_call_limit),
        retriable: false,
    };
    let _ = tx
        .send(ServerMessage::error(&session_id, &limit_error))
        .await;
    finish_turn(ctx, session, &accumulated, metadata, tx, turn_start).await
}

fn parse_arguments(raw: &str) -> (Value, Option<String>) {
    if raw.trim().is_empty() {
        return (Value::Object(Default::default()), None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => (Value::Object(map), None),
        Ok(other) => (
            Value::Object(Default::default()),
            Some(format!(
                "Note: tool arguments were not a JSON object ({other}); an empty object was used."
            )),
        ),
        Err(e) => (
            Value::Object(Default::default()),
            Some(format!(
                "Note: tool arguments were not valid JSON ({e}); an empty object was used."
            )),
        ),
    }
}

async fn finish_turn(
    ctx: &AgentContext,
    session: &Arc<Session>,
    accumulated: &str,
    metadata: Option<Value>,
    tx: &mpsc::Sender<ServerMessage>,
    turn_start: std::time::Instant,
) -> vg_domain::error::Result<()> {
    let session_id = &session.session_id;

    if !accumulated.is_empty() {
        session.add_message(Message::assistant(accumulated));
    }

    let latency_ms = turn_start.elapsed().as_secs_f64() * 1000.0;
    ctx.metrics.record_agent_response(session_id, latency_ms);

    let _ = tx
        .send(ServerMessage::text(session_id, accumulated, metadata))
        .await;

    ctx.events
        .publish(
            "agent_response_complete",
            Some(session_id.as_str()),
            json!({
                "total_time_ms": latency_ms,
                "final_text": accumulated,
            }),
        )
        .await;

    Ok(())
}

/// Model stream failure: surface the error, then close the turn with the
/// partial text. The connection stays open.
async fn finish_after_stream_error(
    ctx: &AgentContext,
    session: &Arc<Session>,
    accumulated: &str,
    metadata: Option<Value>,
    tx: &mpsc::Sender<ServerMessage>,
    error: Error,
) -> vg_domain::error::Result<()> {
    let session_id = &session.session_id;
    tracing::error!(session_id = %session_id, error = %error, "model stream failed");
    ctx.metrics.record_error(session_id);

    let _ = tx.send(ServerMessage::error(session_id, &error)).await;
    ctx.events
        .publish(
            "error",
            Some(session_id.as_str()),
            json!({
                "error_code": error.code(),
                "message": error.to_string(),
                "retriable": error.retriable(),
            }),
        )
        .await;

    if !accumulated.is_empty() {
        session.add_message(Message::assistant(accumulated));
    }
    let _ = tx
        .send(ServerMessage::text(session_id, accumulated, metadata))
        .await;
    Ok(())
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use vg_domain::error::Result;
    use vg_domain::stream::BoxStream;
    use vg_tools::FunctionTool;

    /// Replays one scripted event stream per invocation and records the
    /// requests it received.
    struct ScriptedLlm {
        scripts: Mutex<Vec<Vec<Result<StreamEvent>>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLlm {
        fn new(scripts: Vec<Vec<Result<StreamEvent>>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmModel for ScriptedLlm {
        async fn invoke_stream(
            &self,
            req: ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            self.requests.lock().push(req);
            let mut scripts = self.scripts.lock();
            if scripts.is_empty() {
                return Err(Error::Agent {
                    message: "no scripted response".into(),
                    retriable: false,
                });
            }
            let script = scripts.remove(0);
            Ok(Box::pin(futures_util::stream::iter(script)))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    fn token(text: &str) -> Result<StreamEvent> {
        Ok(StreamEvent::Token { text: text.into() })
    }

    fn done() -> Result<StreamEvent> {
        Ok(StreamEvent::Done {
            finish_reason: Some("stop".into()),
        })
    }

    fn tool_call(id: &str, name: &str, args: &str) -> Vec<Result<StreamEvent>> {
        vec![
            Ok(StreamEvent::ToolCallStarted {
                call_id: id.into(),
                tool_name: name.into(),
            }),
            Ok(StreamEvent::ToolCallDelta {
                call_id: id.into(),
                delta: args.into(),
            }),
            Ok(StreamEvent::ToolCallFinished {
                call_id: id.into(),
                tool_name: name.into(),
                arguments: args.into(),
            }),
            Ok(StreamEvent::Done {
                finish_reason: Some("tool_calls".into()),
            }),
        ]
    }

    fn context(llm: Arc<ScriptedLlm>, tools: Arc<ToolRegistry>) -> AgentContext {
        AgentContext {
            llm,
            tools,
            events: Arc::new(EventBus::new()),
            metrics: Arc::new(MetricsCollector::new()),
            instructions: "Be helpful.".into(),
            tool_call_limit: 8,
        }
    }

    fn echo_tools() -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FunctionTool::new(
            "echo",
            "Echo back the x argument",
            json!({"type":"object","properties":{"x":{"type":"string"}},"required":["x"]}),
            |args| async move { Ok(args.get("x").cloned().unwrap_or(Value::Null)) },
        )));
        Arc::new(registry)
    }

    async fn drain(mut rx: mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn partials_concatenate_to_the_final_text() {
        let llm = ScriptedLlm::new(vec![vec![token("Hel"), token("lo"), done()]]);
        let ctx = context(llm.clone(), Arc::new(ToolRegistry::new()));
        let session = Arc::new(Session::new("s1", None));
        ctx.metrics.create_session("s1");

        let messages = drain(process_text(ctx, session.clone(), "hi".into(), None)).await;

        let partials: String = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Partial { data, .. } => Some(data.text.clone()),
                _ => None,
            })
            .collect();
        let final_text = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::Text { data, .. } => Some(data.text.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(partials, "Hello");
        assert_eq!(final_text, "Hello");

        // Conversation: [user, assistant].
        let conversation = session.conversation_snapshot();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].role, Role::User);
        assert_eq!(conversation[1].role, Role::Assistant);
        assert_eq!(conversation[1].content, "Hello");
    }

    #[tokio::test]
    async fn system_instructions_are_prepended_once() {
        let llm = ScriptedLlm::new(vec![vec![token("ok"), done()]]);
        let ctx = context(llm.clone(), Arc::new(ToolRegistry::new()));
        let session = Arc::new(Session::new("s1", None));

        drain(process_text(ctx, session, "hi".into(), None)).await;

        let requests = llm.requests.lock();
        let first = &requests[0].messages;
        assert_eq!(first[0].role, Role::System);
        assert!(first[0].content.contains("Be helpful."));
        assert_eq!(
            first.iter().filter(|m| m.role == Role::System).count(),
            1
        );
    }

    #[tokio::test]
    async fn tool_loop_executes_and_reinvokes_the_model() {
        let llm = ScriptedLlm::new(vec![
            tool_call("c1", "echo", r#"{"x":"ok"}"#),
            vec![token("It said ok"), done()],
        ]);
        let ctx = context(llm.clone(), echo_tools());
        let session = Arc::new(Session::new("s1", None));
        ctx.metrics.create_session("s1");

        let messages = drain(process_text(
            ctx.clone(),
            session.clone(),
            "call echo with x='ok'".into(),
            None,
        ))
        .await;

        // Order: tool_call → tool_result(completed) → partial(s) → text.
        let kinds: Vec<&str> = messages.iter().map(|m| m.kind()).collect();
        let call_pos = kinds.iter().position(|k| *k == "server_tool_call").unwrap();
        let result_pos = kinds
            .iter()
            .position(|k| *k == "server_tool_result")
            .unwrap();
        let text_pos = kinds.iter().position(|k| *k == "server_text").unwrap();
        assert!(call_pos < result_pos && result_pos < text_pos);

        match &messages[result_pos] {
            ServerMessage::ToolResult { data, .. } => {
                assert_eq!(data.status, "completed");
                assert_eq!(data.result.as_ref().unwrap(), &json!("ok"));
            }
            other => panic!("unexpected {other:?}"),
        }

        // Conversation causal order: user, assistant(with calls),
        // tool("ok"), assistant(final).
        let conversation = session.conversation_snapshot();
        assert_eq!(conversation.len(), 4);
        assert_eq!(conversation[0].role, Role::User);
        assert_eq!(conversation[1].role, Role::Assistant);
        assert_eq!(conversation[1].tool_calls.len(), 1);
        assert_eq!(conversation[2].role, Role::Tool);
        assert_eq!(conversation[2].content, "ok");
        assert_eq!(conversation[3].role, Role::Assistant);
        assert_eq!(conversation[3].content, "It said ok");

        assert_eq!(ctx.metrics.session_snapshot("s1").unwrap().tool_calls, 1);
    }

    #[tokio::test]
    async fn reminder_is_added_when_tool_results_are_present() {
        let llm = ScriptedLlm::new(vec![
            tool_call("c1", "echo", r#"{"x":"ok"}"#),
            vec![token("done"), done()],
        ]);
        let ctx = context(llm.clone(), echo_tools());
        let session = Arc::new(Session::new("s1", None));

        drain(process_text(ctx, session, "go".into(), None)).await;

        let requests = llm.requests.lock();
        assert!(!requests[0].messages[0].content.contains("REMINDER"));
        // Second round sees the tool result and gets the reminder.
        assert!(requests[1].messages[0].content.contains("REMINDER"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_and_the_turn_recovers() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FunctionTool::new(
            "slow",
            "Sleeps for a minute",
            json!({"type":"object"}),
            |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!("never"))
            },
        )));

        let llm = ScriptedLlm::new(vec![
            tool_call("c1", "slow", "{}"),
            vec![token("The tool timed out, sorry."), done()],
        ]);
        let ctx = context(llm, Arc::new(registry));
        let session = Arc::new(Session::new("s1", None));

        let messages = drain(process_text(ctx, session.clone(), "run slow".into(), None)).await;

        let result = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::ToolResult { data, .. } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result.status, "failed");
        assert!(result.error.as_ref().unwrap().contains("timed out"));

        // The loop continued to a final text.
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::Text { .. })));

        // The conversation records the error content for the model.
        let conversation = session.conversation_snapshot();
        assert!(conversation
            .iter()
            .any(|m| m.role == Role::Tool && m.content.starts_with("Error:")));
    }

    #[tokio::test]
    async fn unparseable_arguments_fall_back_to_empty_object() {
        let llm = ScriptedLlm::new(vec![
            tool_call("c1", "echo", "not json at all"),
            vec![token("handled"), done()],
        ]);
        let ctx = context(llm, echo_tools());
        let session = Arc::new(Session::new("s1", None));

        let messages = drain(process_text(ctx, session.clone(), "go".into(), None)).await;

        // The tool saw {} so echo returned null; the parse failure is
        // noted in the conversation content.
        match messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::ToolCall { data, .. } => Some(data.clone()),
                _ => None,
            }) {
            Some(data) => assert_eq!(data.arguments, json!({})),
            None => panic!("missing server_tool_call"),
        }
        let conversation = session.conversation_snapshot();
        let tool_msg = conversation.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn stream_error_surfaces_and_keeps_partial_text() {
        let llm = ScriptedLlm::new(vec![vec![
            token("Partial answer"),
            Err(Error::Agent {
                message: "upstream hiccup".into(),
                retriable: true,
            }),
        ]]);
        let ctx = context(llm, Arc::new(ToolRegistry::new()));
        let session = Arc::new(Session::new("s1", None));
        ctx.metrics.create_session("s1");

        let messages = drain(process_text(ctx, session.clone(), "hi".into(), None)).await;

        let error = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::Error { data, .. } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(error.error_code, "AGENT_ERROR");
        assert!(error.retriable);

        // The turn still ends with the accumulated text.
        let final_text = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::Text { data, .. } => Some(data.text.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(final_text, "Partial answer");
        assert_eq!(session.conversation_snapshot().last().unwrap().content, "Partial answer");
    }

    #[tokio::test]
    async fn empty_model_response_still_emits_final_text() {
        let llm = ScriptedLlm::new(vec![vec![done()]]);
        let ctx = context(llm, Arc::new(ToolRegistry::new()));
        let session = Arc::new(Session::new("s1", None));

        let messages = drain(process_text(ctx, session.clone(), "hi".into(), None)).await;

        let finals: Vec<_> = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::Text { .. }))
            .collect();
        assert_eq!(finals.len(), 1);
        // Empty assistant content is not appended to the conversation.
        assert_eq!(session.conversation_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn tool_call_limit_bounds_the_loop() {
        // Every round requests another tool call.
        let scripts: Vec<Vec<Result<StreamEvent>>> = (0..3)
            .map(|i| tool_call(&format!("c{i}"), "echo", r#"{"x":"again"}"#))
            .collect();
        let llm = ScriptedLlm::new(scripts);
        let mut ctx = context(llm, echo_tools());
        ctx.tool_call_limit = 2;
        let session = Arc::new(Session::new("s1", None));

        let messages = drain(process_text(ctx, session, "loop".into(), None)).await;

        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMessage::Error { data, .. } if data.message.contains("tool call limit")
        )));
        // Exactly one terminating server_text regardless.
        assert_eq!(
            messages
                .iter()
                .filter(|m| matches!(m, ServerMessage::Text { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn leftover_deltas_without_finish_are_assembled() {
        let llm = ScriptedLlm::new(vec![
            vec![
                Ok(StreamEvent::ToolCallStarted {
                    call_id: "c1".into(),
                    tool_name: "echo".into(),
                }),
                Ok(StreamEvent::ToolCallDelta {
                    call_id: "c1".into(),
                    delta: r#"{"x":"leftover"}"#.into(),
                }),
                done(),
            ],
            vec![token("ok"), done()],
        ]);
        let ctx = context(llm, echo_tools());
        let session = Arc::new(Session::new("s1", None));

        let messages = drain(process_text(ctx, session, "go".into(), None)).await;

        let result = messages
            .iter()
            .find_map(|m| match m {
                ServerMessage::ToolResult { data, .. } => Some(data.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result.status, "completed");
        assert_eq!(result.result.unwrap(), json!("leftover"));
    }

    #[test]
    fn tool_results_normalize_to_canonical_strings() {
        // JSON string: re-serialized canonically (whitespace dropped,
        // keys in map order).
        assert_eq!(
            normalize_tool_result(&json!("{ \"a\": 2,\n \"b\": 1 }")),
            "{\"a\":2,\"b\":1}"
        );
        // Plain text passes through.
        assert_eq!(normalize_tool_result(&json!("just text")), "just text");
        // Structured values serialize.
        assert_eq!(normalize_tool_result(&json!({"k": [1, 2]})), r#"{"k":[1,2]}"#);
        assert_eq!(normalize_tool_result(&json!(42)), "42");
    }
}
