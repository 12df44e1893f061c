//! The tool trait and closure-backed implementations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use vg_domain::error::{Error, Result};
use vg_domain::tool::ToolDefinition;

/// A callable the model may invoke.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema describing the argument object.
    fn parameters(&self) -> Value;

    async fn invoke(&self, args: Value) -> Result<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

type AsyncEntry =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

enum Entrypoint {
    /// Synchronous callable, executed on the blocking pool so slow tools
    /// never stall the event loop.
    Blocking(Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>),
    Async(AsyncEntry),
}

/// A tool built from a closure.
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    entrypoint: Entrypoint,
}

impl FunctionTool {
    /// Wrap a synchronous callable. Invocation runs on the blocking pool.
    pub fn blocking(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            entrypoint: Entrypoint::Blocking(Arc::new(f)),
        }
    }

    /// Wrap an async callable.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            entrypoint: Entrypoint::Async(Arc::new(move |args| Box::pin(f(args)))),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        match &self.entrypoint {
            Entrypoint::Async(f) => f(args).await,
            Entrypoint::Blocking(f) => {
                let f = f.clone();
                tokio::task::spawn_blocking(move || f(args))
                    .await
                    .map_err(|e| Error::Internal(format!("tool task panicked: {e}")))?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn blocking_tool_runs_off_the_event_loop() {
        let tool = FunctionTool::blocking(
            "add",
            "Add two numbers",
            json!({"type":"object","properties":{"a":{"type":"integer"},"b":{"type":"integer"}}}),
            |args| {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            },
        );

        let result = tool.invoke(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn async_tool_invokes_future() {
        let tool = FunctionTool::new("echo", "Echo back x", json!({"type":"object"}), |args| async move {
            Ok(args["x"].clone())
        });
        let result = tool.invoke(json!({"x": "ok"})).await.unwrap();
        assert_eq!(result, json!("ok"));
    }

    #[test]
    fn definition_mirrors_the_tool() {
        let tool = FunctionTool::blocking("t", "does t", json!({"type":"object"}), |_| Ok(Value::Null));
        let def = tool.definition();
        assert_eq!(def.name, "t");
        assert_eq!(def.description, "does t");
    }
}
