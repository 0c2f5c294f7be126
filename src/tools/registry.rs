//! Tool registry - manages tool registration and execution

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolExecutor, ToolOutcome};
use crate::error::Result;
use crate::types::ToolDefinition;

/// Executor over a set of registered tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool to the registry, replacing any tool with the same name
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.add_tool(Box::new(tool));
        self
    }

    /// Tool definitions to advertise to the model, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, arguments: &Value) -> Result<ToolOutcome> {
        let Some(tool) = self.tools.get(name) else {
            log::warn!("model called unknown tool: {}", name);
            return Ok(ToolOutcome::failure(format!("Unknown tool: {}", name)));
        };
        match tool.execute(arguments.clone()).await {
            Ok(result) => Ok(ToolOutcome::success(result)),
            Err(e) => Ok(ToolOutcome::failure(format!("Tool error: {}", e))),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

/// A tool that answers every call with a fixed string. Used for fixture replay.
#[derive(Debug, Clone)]
pub struct StaticTool {
    name: String,
    description: String,
    response: String,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("Scripted tool '{}'", name),
            name,
            response: response.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: Value) -> std::result::Result<String, eyre::Error> {
        Ok(self.response.clone())
    }
}
