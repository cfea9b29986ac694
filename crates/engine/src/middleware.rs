//! Middleware — named bundles of lifecycle hooks and contributed tools.
//!
//! Hooks compose as a chain of responsibility: an ordered list of optional
//! handlers invoked sequentially, never concurrently, since hooks mutate
//! shared thread state. Tool contribution is an explicit merge over ordered
//! sources with last-writer-wins semantics, so middleware appended after
//! built-ins can deliberately override them.

use std::sync::Arc;

use async_trait::async_trait;
use ironloop_core::error::EngineError;
use ironloop_core::thread::Thread;
use ironloop_core::tool::{Tool, ToolRegistry};
use ironloop_core::usage::TokenUsage;
use tracing::warn;

/// The state a hook sees (and may mutate) around one iteration.
pub struct IterationContext<'a> {
    pub thread: &'a mut Thread,
    pub iteration: u64,
    pub usage: &'a TokenUsage,
}

/// A middleware: lifecycle hooks plus contributed tools, all optional.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable name, used in conflict reports and error messages.
    fn name(&self) -> &str;

    /// Tools this middleware contributes to the merged registry.
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Runs before each iteration. An error here aborts the iteration
    /// through the engine's normal error path.
    async fn before_iteration(
        &self,
        _ctx: &mut IterationContext<'_>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Runs after each iteration with the raw result — the final response
    /// text on success, or the error that aborted the iteration.
    async fn after_iteration(
        &self,
        _ctx: &mut IterationContext<'_>,
        _outcome: Result<&str, &EngineError>,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Callback fired when a later source overrides an existing tool name.
/// Arguments: the tool name and the name of the overriding source.
pub type ConflictHandler = dyn Fn(&str, &str) + Send + Sync;

/// The default conflict handler: a logged warning.
pub fn log_conflict(tool_name: &str, source: &str) {
    warn!(tool = tool_name, source, "Tool name conflict: later source wins");
}

/// Merge tools from ordered sources into one registry.
///
/// A name collision lets the later source's tool win and fires
/// `on_conflict(tool_name, source_name)`.
pub fn merge_tool_sources(
    sources: &[(String, Vec<Arc<dyn Tool>>)],
    on_conflict: &ConflictHandler,
) -> ToolRegistry {
    let mut merged = ToolRegistry::new();
    for (source, tools) in sources {
        for tool in tools {
            if merged.register(Arc::clone(tool)).is_some() {
                on_conflict(tool.name(), source);
            }
        }
    }
    merged
}

/// An ordered middleware list with sequential hook dispatch.
#[derive(Default)]
pub struct MiddlewarePipeline {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new(middleware: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middleware }
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Contributed tools, as ordered (source, tools) pairs ready for
    /// [`merge_tool_sources`].
    pub fn tool_sources(&self) -> Vec<(String, Vec<Arc<dyn Tool>>)> {
        self.middleware
            .iter()
            .map(|m| (m.name().to_string(), m.tools()))
            .collect()
    }

    /// Run every `before_iteration` hook in list order. The first failure
    /// aborts the iteration.
    pub async fn run_before(&self, ctx: &mut IterationContext<'_>) -> Result<(), EngineError> {
        for m in &self.middleware {
            m.before_iteration(ctx)
                .await
                .map_err(|e| EngineError::Middleware {
                    middleware: m.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Run every `after_iteration` hook in list order.
    ///
    /// After-hooks run on both the success and error paths and cannot
    /// change an iteration's outcome, so their own failures are logged and
    /// swallowed.
    pub async fn run_after(
        &self,
        ctx: &mut IterationContext<'_>,
        outcome: Result<&str, &EngineError>,
    ) {
        for m in &self.middleware {
            if let Err(e) = m.after_iteration(ctx, outcome).await {
                warn!(middleware = m.name(), error = %e, "after_iteration hook failed");
            }
        }
    }
}
