//! OpenAI-compatible chat adapter.
//!
//! Works with any endpoint following the OpenAI chat-completions
//! contract (OpenAI, Azure-style gateways, Ollama, vLLM, Together, …).
//! Streaming only; the agent loop consumes the event stream directly.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use vg_domain::config::LlmConfig;
use vg_domain::error::{Error, Result};
use vg_domain::message::{Message, Role, ToolCall};
use vg_domain::stream::{BoxStream, StreamEvent};
use vg_domain::tool::ToolDefinition;

use crate::registry::LlmPlugin;
use crate::sse::sse_event_stream;
use crate::traits::{ChatRequest, LlmModel};
use crate::util::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatModel {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone().unwrap_or_else(|| "gpt-4o-mini".into()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.model.clone());
        let mut body = json!({
            "model": model,
            "messages": messages_to_openai(&req.messages),
            "stream": true,
        });

        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_openai).collect());
            body["tool_choice"] = Value::String("auto".into());
        }
        if let Some(temp) = req.temperature.or(self.temperature) {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = req.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(max);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmModel for OpenAiCompatModel {
    async fn invoke_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.json(&body).send().await.map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Agent {
                message: format!("LLM request failed with {status}: {detail}"),
                retriable: status.is_server_error(),
            });
        }

        let mut state = StreamState::default();
        Ok(sse_event_stream(response, move |data| {
            state.parse_payload(data)
        }))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Serialize the conversation, pairing each `tool` message with the id of
/// its originating assistant call. The conversation's causal ordering
/// (k calls followed by k results, in order) makes the pairing positional.
fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    let mut pending_ids: std::collections::VecDeque<Option<String>> = Default::default();

    for msg in messages {
        match msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                pending_ids.clear();
                let mut calls = Vec::new();
                for (i, call) in msg.tool_calls.iter().enumerate() {
                    if let ToolCall::Invocation {
                        id,
                        name,
                        arguments,
                    } = call
                    {
                        let call_id = id.clone().unwrap_or_else(|| format!("call_{i}"));
                        pending_ids.push_back(Some(call_id.clone()));
                        calls.push(json!({
                            "id": call_id,
                            "type": "function",
                            "function": { "name": name, "arguments": arguments },
                        }));
                    }
                }
                let mut obj = json!({ "role": "assistant", "tool_calls": calls });
                if !msg.content.is_empty() {
                    obj["content"] = Value::String(msg.content.clone());
                }
                out.push(obj);
            }
            Role::Tool => {
                let mut obj = json!({ "role": "tool", "content": msg.content });
                if let Some(Some(id)) = pending_ids.pop_front() {
                    obj["tool_call_id"] = Value::String(id);
                }
                out.push(obj);
            }
            _ => {
                out.push(json!({
                    "role": role_to_str(msg.role),
                    "content": msg.content,
                }));
            }
        }
    }

    out
}

fn tool_to_openai(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct ToolCallBuf {
    id: String,
    name: String,
    arguments: String,
    started: bool,
}

/// Mutable state across SSE payloads: tool-call deltas arrive keyed by
/// index and must be assembled before a `ToolCallFinished` can be emitted.
#[derive(Default)]
struct StreamState {
    calls: HashMap<u64, ToolCallBuf>,
    order: Vec<u64>,
    calls_finished: bool,
}

impl StreamState {
    fn parse_payload(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data == "[DONE]" {
            let mut events = self.finish_calls();
            events.push(Ok(StreamEvent::Done {
                finish_reason: None,
            }));
            return events;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable SSE payload");
                return Vec::new();
            }
        };

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown LLM error")
                .to_string();
            return vec![Ok(StreamEvent::Error { message })];
        }

        let Some(choice) = value.get("choices").and_then(|c| c.get(0)) else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    events.push(Ok(StreamEvent::Token { text: text.into() }));
                }
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tc in tool_calls {
                    let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let buf = self.calls.entry(index).or_default();
                    if !self.order.contains(&index) {
                        self.order.push(index);
                    }

                    if let Some(id) = tc.get("id").and_then(Value::as_str) {
                        buf.id = id.to_string();
                    }
                    if let Some(function) = tc.get("function") {
                        if let Some(name) = function.get("name").and_then(Value::as_str) {
                            buf.name = name.to_string();
                        }
                        if !buf.started && !buf.name.is_empty() {
                            buf.started = true;
                            events.push(Ok(StreamEvent::ToolCallStarted {
                                call_id: buf.id.clone(),
                                tool_name: buf.name.clone(),
                            }));
                        }
                        if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                            buf.arguments.push_str(args);
                            events.push(Ok(StreamEvent::ToolCallDelta {
                                call_id: buf.id.clone(),
                                delta: args.to_string(),
                            }));
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            if reason == "tool_calls" {
                events.extend(self.finish_calls());
            }
            events.push(Ok(StreamEvent::Done {
                finish_reason: Some(reason.to_string()),
            }));
        }

        events
    }

    fn finish_calls(&mut self) -> Vec<Result<StreamEvent>> {
        if self.calls_finished {
            return Vec::new();
        }
        self.calls_finished = true;

        let mut events = Vec::new();
        for index in std::mem::take(&mut self.order) {
            if let Some(buf) = self.calls.remove(&index) {
                if buf.name.is_empty() {
                    continue;
                }
                events.push(Ok(StreamEvent::ToolCallFinished {
                    call_id: buf.id,
                    tool_name: buf.name,
                    arguments: buf.arguments,
                }));
            }
        }
        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatPlugin;

impl LlmPlugin for OpenAiCompatPlugin {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn required_env_vars(&self) -> &[&str] {
        &["OPENAI_API_KEY"]
    }

    fn validate(&self, config: &LlmConfig) -> Result<()> {
        // Local/self-hosted endpoints commonly run keyless; only the
        // hosted default requires a key.
        if config.api_key.is_none() && config.base_url.contains("api.openai.com") {
            return Err(Error::Config(
                "LLM API key required (set VG_LLM_API_KEY or OPENAI_API_KEY)".into(),
            ));
        }
        Ok(())
    }

    fn create_model(&self, config: &LlmConfig) -> Result<Arc<dyn LlmModel>> {
        Ok(Arc::new(OpenAiCompatModel::from_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(state: &mut StreamState, data: &str) -> Vec<StreamEvent> {
        state
            .parse_payload(data)
            .into_iter()
            .map(|e| e.unwrap())
            .collect()
    }

    #[test]
    fn content_delta_becomes_token() {
        let mut state = StreamState::default();
        let out = events(
            &mut state,
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
        );
        assert!(matches!(&out[0], StreamEvent::Token { text } if text == "Hello"));
    }

    #[test]
    fn tool_call_deltas_assemble_in_order() {
        let mut state = StreamState::default();

        let out = events(
            &mut state,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"echo","arguments":"{\"x\""}}]}}]}"#,
        );
        assert!(matches!(&out[0], StreamEvent::ToolCallStarted { tool_name, .. } if tool_name == "echo"));
        assert!(matches!(&out[1], StreamEvent::ToolCallDelta { .. }));

        let out = events(
            &mut state,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"ok\"}"}}]}}]}"#,
        );
        assert!(matches!(&out[0], StreamEvent::ToolCallDelta { .. }));

        let out = events(&mut state, r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        match &out[0] {
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                assert_eq!(call_id, "c1");
                assert_eq!(tool_name, "echo");
                assert_eq!(arguments, r#"{"x":"ok"}"#);
            }
            other => panic!("expected ToolCallFinished, got {other:?}"),
        }
        assert!(matches!(&out[1], StreamEvent::Done { finish_reason: Some(r) } if r == "tool_calls"));
    }

    #[test]
    fn done_sentinel_does_not_duplicate_finished_calls() {
        let mut state = StreamState::default();
        events(
            &mut state,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"echo","arguments":"{}"}}]}}]}"#,
        );
        let first = events(&mut state, r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        assert!(first
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCallFinished { .. })));

        let second = events(&mut state, "[DONE]");
        assert!(!second
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCallFinished { .. })));
    }

    #[test]
    fn error_payload_becomes_error_event() {
        let mut state = StreamState::default();
        let out = events(&mut state, r#"{"error":{"message":"rate limited"}}"#);
        assert!(matches!(&out[0], StreamEvent::Error { message } if message == "rate limited"));
    }

    #[test]
    fn tool_messages_recover_originating_call_ids() {
        let messages = vec![
            Message::user("call echo"),
            Message::assistant_with_calls(
                "",
                vec![
                    ToolCall::Invocation {
                        id: Some("c1".into()),
                        name: "echo".into(),
                        arguments: r#"{"x":"a"}"#.into(),
                    },
                    ToolCall::Invocation {
                        id: Some("c2".into()),
                        name: "echo".into(),
                        arguments: r#"{"x":"b"}"#.into(),
                    },
                ],
            ),
            Message::tool_result("echo", "a"),
            Message::tool_result("echo", "b"),
        ];

        let wire = messages_to_openai(&messages);
        assert_eq!(wire[2]["tool_call_id"], "c1");
        assert_eq!(wire[3]["tool_call_id"], "c2");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "echo");
    }

    #[test]
    fn assistant_without_calls_serializes_plain() {
        let wire = messages_to_openai(&[Message::assistant("hi")]);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["content"], "hi");
        assert!(wire[0].get("tool_calls").is_none());
    }
}
