//! Engine configuration.
//!
//! `LoopConfig` maps directly to a `[loop]`-style TOML table; every field
//! has a serde default so partial configs deserialize cleanly.

use serde::{Deserialize, Serialize};

use ironloop_core::EngineError;

/// Configuration for one agent loop instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// The model to request (e.g. "anthropic/claude-sonnet-4").
    #[serde(default = "default_model")]
    pub model: String,

    /// Backpressure cap on tool calls within a single iteration.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_iteration: usize,

    /// Tool names that pause the run for human approval instead of
    /// executing.
    #[serde(default)]
    pub interrupt_on: Vec<String>,

    /// Execute each batch of requested tool calls concurrently.
    #[serde(default)]
    pub parallel_tools: bool,

    /// Estimated-token budget above which old iterations get summarized.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,

    /// How many recent iterations summarization leaves untouched.
    #[serde(default = "default_keep_recent_iterations")]
    pub keep_recent_iterations: u64,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_max_tool_calls() -> usize {
    20
}
fn default_max_context_tokens() -> u64 {
    150_000
}
fn default_keep_recent_iterations() -> u64 {
    3
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tool_calls_per_iteration: default_max_tool_calls(),
            interrupt_on: Vec::new(),
            parallel_tools: false,
            max_context_tokens: default_max_context_tokens(),
            keep_recent_iterations: default_keep_recent_iterations(),
        }
    }
}

impl LoopConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::Config {
            message: e.to_string(),
        })
    }
}
