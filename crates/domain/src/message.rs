use serde::{Deserialize, Serialize};

/// A message in the conversation history.
///
/// For `role = assistant` with tool calls, `tool_calls` carries the
/// model-produced invocations; for `role = tool` it carries exactly one
/// result record referencing the originating call by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call entry attached to a message.
///
/// Two shapes share the field: the invocation the model produced, and the
/// result record appended once the call completed. `serde(untagged)`
/// distinguishes them by field set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCall {
    /// A model-requested invocation. `arguments` holds the raw JSON
    /// argument string as produced by the model.
    Invocation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        arguments: String,
    },
    /// A completed call's result, referencing the call by tool name.
    Result { tool_name: String, content: String },
}

impl ToolCall {
    /// The tool name, regardless of shape.
    pub fn tool_name(&self) -> &str {
        match self {
            ToolCall::Invocation { name, .. } => name,
            ToolCall::Result { tool_name, .. } => tool_name,
        }
    }
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// An assistant message that requested tool calls.
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: calls,
        }
    }

    /// A tool-result message. The result content is duplicated into the
    /// single `ToolCall::Result` entry so downstream adapters can address
    /// the originating call by name.
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        let tool_name = tool_name.into();
        let content = content.into();
        Self {
            role: Role::Tool,
            content: content.clone(),
            tool_calls: vec![ToolCall::Result { tool_name, content }],
        }
    }
}

/// A minimal `{role, content}` pair, the shape the turn detector consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_references_call_by_name() {
        let msg = Message::tool_result("echo", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "ok");
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].tool_name(), "echo");
    }

    #[test]
    fn invocation_and_result_deserialize_by_field_set() {
        let inv: ToolCall =
            serde_json::from_str(r#"{"id":"c1","name":"echo","arguments":"{\"x\":1}"}"#).unwrap();
        assert!(matches!(inv, ToolCall::Invocation { .. }));

        let res: ToolCall =
            serde_json::from_str(r#"{"tool_name":"echo","content":"ok"}"#).unwrap();
        assert!(matches!(res, ToolCall::Result { .. }));
    }

    #[test]
    fn plain_message_omits_tool_calls_when_serialized() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
    }
}
