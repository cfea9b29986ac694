//! Context management — token budgeting and summarization.
//!
//! The estimator is a cheap character heuristic: it only gates *when*
//! summarization fires, never billing. When the estimated thread size
//! crosses the budget, iterations at or below a cutoff are condensed into
//! `Summary` events by asking the model for a short summary of each; the
//! raw events for those iterations are then gone for good.

use std::collections::BTreeMap;

use ironloop_core::model::{ChatMessage, ModelClient, ModelRequest};
use ironloop_core::thread::{Event, EventKind, Thread};
use ironloop_core::usage::TokenUsage;
use tracing::{debug, warn};

use crate::config::LoopConfig;

/// Estimate tokens for a piece of text: `ceil(chars / 3.5)`.
///
/// Intentionally inexact — within ~15% for BPE tokenizers on English
/// text, and cheap enough to run over every event on every iteration.
pub fn default_estimator(text: &str) -> u64 {
    (text.len() as f64 / 3.5).ceil() as u64
}

/// Token-budget estimator, summarization trigger, and system-prompt
/// injection builder.
pub struct ContextManager {
    max_context_tokens: u64,
    keep_recent_iterations: u64,
    estimator: Box<dyn Fn(&str) -> u64 + Send + Sync>,
}

impl ContextManager {
    pub fn new(max_context_tokens: u64, keep_recent_iterations: u64) -> Self {
        Self {
            max_context_tokens,
            keep_recent_iterations,
            estimator: Box::new(default_estimator),
        }
    }

    pub fn from_config(config: &LoopConfig) -> Self {
        Self::new(config.max_context_tokens, config.keep_recent_iterations)
    }

    /// Replace the token estimator.
    pub fn with_estimator(
        mut self,
        estimator: impl Fn(&str) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Estimated token size of the whole thread (sum over JSON-serialized
    /// events).
    pub fn estimate_thread_tokens(&self, thread: &Thread) -> u64 {
        thread
            .events
            .iter()
            .map(|e| (self.estimator)(&serde_json::to_string(e).unwrap_or_default()))
            .sum()
    }

    /// Whether the thread has outgrown the context budget.
    pub fn needs_summarization(&self, thread: &Thread) -> bool {
        self.estimate_thread_tokens(thread) > self.max_context_tokens
    }

    /// Condense old iterations into `Summary` events.
    ///
    /// Iterations above `max_iteration - keep_recent_iterations` are left
    /// untouched. Iterations at or below the cutoff are each summarized by
    /// the model; on model failure the summary degrades to a deterministic
    /// placeholder rather than dropping the context entirely. Iterations
    /// already reduced to a lone `Summary` event are kept as-is.
    ///
    /// Returns the token usage spent on summarization calls.
    pub async fn summarize(
        &self,
        thread: &mut Thread,
        model: &dyn ModelClient,
        model_id: &str,
    ) -> TokenUsage {
        let max_iteration = thread.max_iteration();
        let cutoff = max_iteration.saturating_sub(self.keep_recent_iterations);

        let mut by_iteration: BTreeMap<u64, Vec<Event>> = BTreeMap::new();
        for event in &thread.events {
            by_iteration
                .entry(event.iteration)
                .or_default()
                .push(event.clone());
        }

        let mut usage = TokenUsage::default();
        let mut rewritten: Vec<Event> = Vec::new();

        for (&iteration, events) in by_iteration.range(..=cutoff) {
            // Already condensed — keep the existing summary.
            if let [lone] = events.as_slice()
                && matches!(lone.kind, EventKind::Summary { .. })
            {
                rewritten.push(lone.clone());
                continue;
            }

            let summary = match self
                .summarize_iteration(iteration, events, model, model_id)
                .await
            {
                Ok((text, call_usage)) => {
                    usage.merge(&call_usage);
                    text
                }
                Err(e) => {
                    warn!(iteration, error = %e, "Summarization failed, using placeholder");
                    format!(
                        "Iteration {}: {} events (summarization failed)",
                        iteration,
                        events.len()
                    )
                }
            };

            rewritten.push(Event::new(iteration, EventKind::Summary {
                summarized_iterations: vec![iteration],
                summary,
            }));
        }

        rewritten.extend(
            thread
                .events
                .iter()
                .filter(|e| e.iteration > cutoff)
                .cloned(),
        );

        debug!(
            thread_id = %thread.id,
            cutoff,
            events_after = rewritten.len(),
            "Rewrote thread with iteration summaries"
        );
        thread.replace_events(rewritten);
        usage
    }

    async fn summarize_iteration(
        &self,
        iteration: u64,
        events: &[Event],
        model: &dyn ModelClient,
        model_id: &str,
    ) -> Result<(String, TokenUsage), ironloop_core::ModelError> {
        let serialized = events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n");

        let request = ModelRequest {
            model: model_id.to_string(),
            messages: vec![
                ChatMessage::system("You condense agent execution transcripts."),
                ChatMessage::user(format!(
                    "Summarize iteration {iteration} of this agent run in 2-3 sentences, \
                     keeping decisions, tool outcomes, and errors:\n\n{serialized}"
                )),
            ],
            tools: vec![],
        };

        let response = model.invoke(request).await?;
        Ok((response.text, response.usage))
    }

    /// Render all current `Summary` events into a block for the system
    /// prompt, so the model keeps sight of compacted history.
    pub fn build_context_injection(&self, thread: &Thread) -> String {
        let mut lines = Vec::new();
        for event in &thread.events {
            if let EventKind::Summary {
                summarized_iterations,
                summary,
            } = &event.kind
            {
                let numbers = summarized_iterations
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("- [iteration {numbers}] {summary}"));
            }
        }

        if lines.is_empty() {
            String::new()
        } else {
            format!("## Summarized earlier iterations\n{}", lines.join("\n"))
        }
    }
}
