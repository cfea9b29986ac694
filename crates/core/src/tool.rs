//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. The
//! engine resolves the model's requested calls against a `ToolRegistry`
//! and records one `ToolResult` event per call, no matter what happens.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::model::ToolDefinition;

/// The reserved tool name the model uses to ask a human a question.
///
/// Calls to this tool are never executed; the engine converts them into a
/// human-in-the-loop pause instead.
pub const REQUEST_HUMAN_INPUT: &str = "request_human_input";

/// The built-in definition for the reserved human-input tool, bound on
/// every model call so the model can always escalate to a human.
pub fn request_human_input_definition() -> ToolDefinition {
    ToolDefinition {
        name: REQUEST_HUMAN_INPUT.to_string(),
        description: "Ask the human operator a question and pause until they answer. \
                      Use this when you are blocked on a decision only a human can make."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "The question to ask" },
                "context": { "type": "string", "description": "Why you are asking" },
                "urgency": { "type": "string", "enum": ["low", "medium", "high"] },
                "format": { "type": "string", "description": "Expected answer format" },
                "choices": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional fixed choices for the human to pick from"
                }
            },
            "required": ["question"]
        }),
    }
}

/// The core Tool trait.
///
/// Tools return a JSON value; the engine stringifies non-string outputs
/// before recording them. Errors are caught at the call boundary and
/// converted to error-text results — a failing tool never aborts an
/// iteration.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// Tools are stored behind `Arc` so the executor can fan them out across
/// concurrent calls in the parallel policy.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, returning the one it replaced if the name was
    /// already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name().to_string(), tool)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions (for sending to the model), sorted by name for
    /// a deterministic wire order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
