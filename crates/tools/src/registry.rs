//! Tool registry: the uniform invocation surface the agent loop uses.
//!
//! Registration normalizes tool names to identifiers; duplicate names are
//! allowed with last-registration-wins semantics and a warning. Every
//! invocation runs under the 30-second timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use vg_domain::error::{Error, Result};
use vg_domain::tool::ToolDefinition;

use crate::function::Tool;
use crate::toolkit::Toolkit;

/// Per-call execution timeout.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_NAME_LEN: usize = 64;

/// Normalize a tool name into a valid identifier: lowercase, runs of
/// non-alphanumerics collapsed to `_`, capped at 64 characters.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(MAX_NAME_LEN));
    let mut last_was_sep = true;
    for c in name.chars() {
        if out.len() >= MAX_NAME_LEN {
            break;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Insertion order of normalized names, for stable definitions.
    order: RwLock<Vec<String>>,
    instructions: RwLock<Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single tool under its normalized name. Returns the name
    /// the tool is callable as.
    pub fn register(&self, tool: Arc<dyn Tool>) -> String {
        let name = normalize_name(tool.name());
        let mut tools = self.tools.write();
        if tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "replacing previously registered tool");
        } else {
            self.order.write().push(name.clone());
        }
        name
    }

    /// Register every tool in a toolkit and record its instructions.
    pub fn register_toolkit(&self, toolkit: Toolkit) {
        if let Some(instructions) = toolkit.instructions {
            self.instructions.write().push(instructions);
        }
        for tool in toolkit.tools {
            self.register(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Tool schemas for the LLM request, in registration order. The
    /// advertised name is the normalized registry key, so the model's
    /// calls resolve back through `invoke`.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        self.order
            .read()
            .iter()
            .filter_map(|name| tools.get(name).map(|tool| (name, tool)))
            .map(|(name, tool)| {
                let mut def = tool.definition();
                def.name = name.clone();
                def
            })
            .collect()
    }

    /// Concatenated toolkit instruction strings.
    pub fn instructions(&self) -> Option<String> {
        let instructions = self.instructions.read();
        if instructions.is_empty() {
            None
        } else {
            Some(instructions.join("\n\n"))
        }
    }

    /// Invoke a tool with the 30-second timeout.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::Agent {
                message: format!("unknown tool: {name}"),
                retriable: false,
            })?;

        match tokio::time::timeout(TOOL_TIMEOUT, tool.invoke(args)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "tool '{name}' execution timed out after {} seconds",
                TOOL_TIMEOUT.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionTool;
    use serde_json::json;

    fn constant_tool(name: &str, value: Value) -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            name,
            "returns a constant",
            json!({"type":"object","properties":{}}),
            move |_| {
                let value = value.clone();
                async move { Ok(value) }
            },
        ))
    }

    #[test]
    fn names_are_normalized_to_identifiers() {
        assert_eq!(normalize_name("Get User Info"), "get_user_info");
        assert_eq!(normalize_name("GET /users/{id}"), "get_users_id");
        assert_eq!(normalize_name("echo"), "echo");
        assert!(normalize_name(&"x".repeat(100)).len() <= 64);
        assert_eq!(normalize_name("trailing--"), "trailing");
    }

    #[tokio::test]
    async fn duplicate_registration_last_wins() {
        let registry = ToolRegistry::new();
        registry.register(constant_tool("echo", json!("first")));
        registry.register(constant_tool("echo", json!("second")));

        assert_eq!(registry.len(), 1);
        let result = registry.invoke("echo", json!({})).await.unwrap();
        assert_eq!(result, json!("second"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out_after_thirty_seconds() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FunctionTool::new(
            "slow",
            "sleeps for a minute",
            json!({"type":"object"}),
            |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!("done"))
            },
        )));

        let err = registry.invoke("slow", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "TIMEOUT_ERROR");
        assert!(err.to_string().contains("30"));
    }

    #[tokio::test]
    async fn toolkit_registration_collects_instructions_and_tools() {
        let registry = ToolRegistry::new();
        let toolkit = Toolkit::new("math")
            .with_instructions("Use math tools for arithmetic.")
            .add_tool(constant_tool("add", json!(0)))
            .add_tool(constant_tool("mul", json!(1)));
        registry.register_toolkit(toolkit);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["add", "mul"]);
        assert!(registry
            .instructions()
            .unwrap()
            .contains("math tools"));
    }

    #[test]
    fn definitions_follow_registration_order() {
        let registry = ToolRegistry::new();
        registry.register(constant_tool("beta", json!(0)));
        registry.register(constant_tool("alpha", json!(0)));
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "beta");
        assert_eq!(defs[1].name, "alpha");
    }
}
