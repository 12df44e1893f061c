//! Toolkits: named bundles of tools with a shared instruction string.

use std::sync::Arc;

use crate::function::Tool;

pub struct Toolkit {
    pub name: String,
    /// Instructions appended to the agent's system prompt when the
    /// toolkit is registered.
    pub instructions: Option<String>,
    pub tools: Vec<Arc<dyn Tool>>,
}

impl Toolkit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            tools: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn add_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }
}
