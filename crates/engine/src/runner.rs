//! The agent loop orchestrator.
//!
//! `AgentLoop` owns the model client, the merged tool set, the middleware
//! pipeline, stop conditions, and the optional verifier, and drives a
//! thread through iterations until the run completes, trips a stop
//! condition, exhausts the error budget, or suspends for human input.
//!
//! Suspension is explicit state, not a blocked future: a paused run comes
//! back as a [`PendingResult`] that owns its thread and can be serialized,
//! shelved, and fed to [`AgentLoop::resume`] later — against this engine
//! instance or a freshly built one.

use std::sync::Arc;

use ironloop_core::model::{ModelClient, ModelRequest, Role, StreamChunk};
use ironloop_core::serialize::{ThreadSerializer, TranscriptSerializer};
use ironloop_core::thread::{EventKind, Thread};
use ironloop_core::tool::Tool;
use ironloop_core::usage::TokenUsage;
use ironloop_core::{EngineError, ModelError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::context::ContextManager;
use crate::executor::{PauseSignal, ToolExecutor};
use crate::middleware::{
    ConflictHandler, IterationContext, Middleware, MiddlewarePipeline, log_conflict,
    merge_tool_sources,
};
use crate::stop::{StopCondition, StopContext, evaluate_stop_conditions};

/// Consecutive failed iterations before the run gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Why a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced a final answer (and verification, if configured,
    /// accepted it).
    Completed,

    /// A stop condition fired; the reason is in `stop_detail`.
    StopCondition,

    /// The circuit breaker tripped on consecutive failed iterations.
    MaxErrors,
}

/// A finished run.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResult {
    /// The full event log of the run.
    pub thread: Thread,

    /// The last assistant message, or empty if the model never produced one.
    pub response: String,

    pub stop_reason: StopReason,

    /// Human-readable detail for `StopCondition` and `MaxErrors`.
    pub stop_detail: Option<String>,

    /// Token usage accumulated across every model call, summarization
    /// included.
    pub usage: TokenUsage,

    /// The iteration the run ended on.
    pub iterations: u64,
}

/// A suspended run, waiting on a human.
///
/// Owns everything needed to resume: the thread, the iteration the pause
/// happened in, the prompt that started the run, and the usage so far.
/// Serializable, so callers can persist it across process restarts.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResult {
    pub thread: Thread,

    /// The question to put to the human.
    pub question: String,

    pub context: Option<String>,
    pub urgency: Option<String>,
    pub format: Option<String>,
    pub choices: Option<Vec<String>>,

    /// The iteration the pause happened in. Resuming re-enters the loop at
    /// `iteration + 1`.
    pub iteration: u64,

    /// The prompt that started this run.
    pub original_prompt: String,

    /// Usage accumulated before the pause.
    pub usage: TokenUsage,
}

/// What a call to `run`/`continue_loop`/`resume` produced.
#[derive(Debug)]
pub enum LoopOutcome {
    Done(AgentResult),
    Pending(PendingResult),
}

impl LoopOutcome {
    /// Unwrap a finished run; panics on `Pending`. Test convenience.
    pub fn expect_done(self) -> AgentResult {
        match self {
            LoopOutcome::Done(result) => result,
            LoopOutcome::Pending(p) => panic!("run unexpectedly suspended: {}", p.question),
        }
    }

    /// Unwrap a suspended run; panics on `Done`. Test convenience.
    pub fn expect_pending(self) -> PendingResult {
        match self {
            LoopOutcome::Pending(pending) => pending,
            LoopOutcome::Done(r) => panic!("run unexpectedly finished: {:?}", r.stop_reason),
        }
    }
}

/// A completeness check run after the model stops calling tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Complete,
    Incomplete { reason: String },
}

/// Verifies that a final response actually finished the task. An
/// `Incomplete` verdict sends the reason back to the model and continues
/// the loop; verifier errors count against the error budget like any
/// other iteration failure.
#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, thread: &Thread, response: &str) -> Result<Verdict, EngineError>;
}

/// What one iteration produced, before the post-iteration checks.
struct IterationStep {
    /// The last assistant text seen this iteration (may be empty).
    response: String,

    /// Set when a tool batch asked to pause.
    pause: Option<PauseSignal>,

    /// True when the model returned a text-only response — the natural
    /// completion signal. False when the sub-loop ended on a pause or the
    /// tool-call cap.
    completed_naturally: bool,
}

/// The engine. Build with `new` plus `with_*` methods, then call
/// [`run`](Self::run).
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    config: LoopConfig,
    system_prompt: String,
    serializer: Box<dyn ThreadSerializer>,
    tools: Vec<Arc<dyn Tool>>,
    middleware: Vec<Arc<dyn Middleware>>,
    stop_conditions: Vec<Box<dyn StopCondition>>,
    verifier: Option<Arc<dyn Verifier>>,
    context: Option<ContextManager>,
    on_tool_conflict: Box<ConflictHandler>,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            config: LoopConfig::default(),
            system_prompt: String::new(),
            serializer: Box::new(TranscriptSerializer),
            tools: Vec::new(),
            middleware: Vec::new(),
            stop_conditions: Vec::new(),
            verifier: None,
            context: None,
            on_tool_conflict: Box::new(log_conflict),
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_stop_condition(mut self, condition: Box<dyn StopCondition>) -> Self {
        self.stop_conditions.push(condition);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_serializer(mut self, serializer: Box<dyn ThreadSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_context_manager(mut self, context: ContextManager) -> Self {
        self.context = Some(context);
        self
    }

    /// Replace the default tool-conflict warning.
    pub fn with_on_tool_conflict(
        mut self,
        handler: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_tool_conflict = Box::new(handler);
        self
    }

    // ── Entry points ──────────────────────────────────────────────────────

    /// Start a fresh run from a prompt.
    pub async fn run(&self, prompt: &str) -> Result<LoopOutcome, EngineError> {
        let mut thread = Thread::new();
        thread.record(1, EventKind::Message {
            role: Role::User,
            content: prompt.to_string(),
        });
        info!(thread_id = %thread.id, "Starting agent run");
        self.drive(thread, 1, prompt.to_string(), TokenUsage::default())
            .await
    }

    /// Continue an existing thread with a follow-up prompt.
    pub async fn continue_loop(
        &self,
        mut thread: Thread,
        prompt: &str,
    ) -> Result<LoopOutcome, EngineError> {
        let iteration = thread.max_iteration() + 1;
        thread.record(iteration, EventKind::Message {
            role: Role::User,
            content: prompt.to_string(),
        });
        info!(thread_id = %thread.id, iteration, "Continuing agent run");
        self.drive(thread, iteration, prompt.to_string(), TokenUsage::default())
            .await
    }

    /// Resume a suspended run with the human's answer.
    ///
    /// Appends a `HumanInputReceived` event and re-enters the loop at the
    /// iteration after the pause. The same pending state can be resumed
    /// again if the run pauses once more.
    pub async fn resume(
        &self,
        pending: PendingResult,
        response: &str,
    ) -> Result<LoopOutcome, EngineError> {
        let mut thread = pending.thread;
        let iteration = pending.iteration + 1;
        thread.record(iteration, EventKind::HumanInputReceived {
            response: response.to_string(),
        });
        info!(thread_id = %thread.id, iteration, "Resuming after human input");
        self.drive(thread, iteration, pending.original_prompt, pending.usage)
            .await
    }

    /// One-shot streaming call: serialize the prompt, stream the model's
    /// answer. No tool sub-loop, no stop conditions.
    pub async fn stream(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<StreamChunk, ModelError>>, EngineError> {
        let mut thread = Thread::new();
        thread.record(1, EventKind::Message {
            role: Role::User,
            content: prompt.to_string(),
        });
        let request = ModelRequest {
            model: self.config.model.clone(),
            messages: self.serializer.serialize(&thread, &self.system_prompt),
            tools: Vec::new(),
        };
        Ok(self.model.stream(request).await?)
    }

    // ── The loop ──────────────────────────────────────────────────────────

    async fn drive(
        &self,
        mut thread: Thread,
        start_iteration: u64,
        original_prompt: String,
        mut usage: TokenUsage,
    ) -> Result<LoopOutcome, EngineError> {
        let pipeline = MiddlewarePipeline::new(self.middleware.clone());
        let executor = self.build_executor(&pipeline);
        let default_context;
        let context = match &self.context {
            Some(custom) => custom,
            None => {
                default_context = ContextManager::from_config(&self.config);
                &default_context
            }
        };

        let mut iteration = start_iteration;
        let mut consecutive_errors: u32 = 0;

        loop {
            debug!(iteration, thread_id = %thread.id, "Starting iteration");
            let step = self
                .run_iteration(&mut thread, iteration, &pipeline, &executor, context, &mut usage)
                .await;

            match step {
                Err(e) => {
                    let recoverable = consecutive_errors + 1 < MAX_CONSECUTIVE_ERRORS;
                    self.record_failure(&mut thread, iteration, &mut consecutive_errors, &e);

                    let snapshot = usage.clone();
                    let mut ctx = IterationContext {
                        thread: &mut thread,
                        iteration,
                        usage: &snapshot,
                    };
                    pipeline.run_after(&mut ctx, Err(&e)).await;

                    if !recoverable {
                        return Ok(LoopOutcome::Done(self.finish(
                            thread,
                            iteration,
                            usage,
                            StopReason::MaxErrors,
                            Some(format!(
                                "{MAX_CONSECUTIVE_ERRORS} consecutive errors; last: {e}"
                            )),
                        )));
                    }
                    iteration += 1;
                }
                Ok(step) => {
                    let snapshot = usage.clone();
                    {
                        let mut ctx = IterationContext {
                            thread: &mut thread,
                            iteration,
                            usage: &snapshot,
                        };
                        pipeline.run_after(&mut ctx, Ok(step.response.as_str())).await;
                    }

                    let stop_ctx = StopContext {
                        iteration,
                        usage: &usage,
                        model: &self.config.model,
                        thread: &thread,
                    };
                    if let Some(reason) = evaluate_stop_conditions(&self.stop_conditions, &stop_ctx)
                    {
                        info!(iteration, %reason, "Stop condition triggered");
                        return Ok(LoopOutcome::Done(self.finish(
                            thread,
                            iteration,
                            usage,
                            StopReason::StopCondition,
                            Some(reason),
                        )));
                    }

                    if let Some(signal) = step.pause {
                        return Ok(LoopOutcome::Pending(self.suspend(
                            thread,
                            iteration,
                            original_prompt,
                            usage,
                            signal,
                        )));
                    }

                    if !step.completed_naturally {
                        // Tool-call cap ended the sub-loop; the task is
                        // still in flight.
                        consecutive_errors = 0;
                        iteration += 1;
                        continue;
                    }

                    let Some(verifier) = &self.verifier else {
                        thread.record(iteration, EventKind::Completion {
                            result: step.response.clone(),
                            verified: false,
                        });
                        return Ok(LoopOutcome::Done(self.finish(
                            thread,
                            iteration,
                            usage,
                            StopReason::Completed,
                            None,
                        )));
                    };

                    match verifier.verify(&thread, &step.response).await {
                        Ok(Verdict::Complete) => {
                            thread.record(iteration, EventKind::Completion {
                                result: step.response.clone(),
                                verified: true,
                            });
                            return Ok(LoopOutcome::Done(self.finish(
                                thread,
                                iteration,
                                usage,
                                StopReason::Completed,
                                None,
                            )));
                        }
                        Ok(Verdict::Incomplete { reason }) => {
                            debug!(iteration, %reason, "Verification incomplete, continuing");
                            thread.record(iteration, EventKind::Message {
                                role: Role::User,
                                content: format!(
                                    "Verification failed: {reason}. Please try again."
                                ),
                            });
                            consecutive_errors = 0;
                            iteration += 1;
                        }
                        Err(e) => {
                            let recoverable = consecutive_errors + 1 < MAX_CONSECUTIVE_ERRORS;
                            self.record_failure(
                                &mut thread,
                                iteration,
                                &mut consecutive_errors,
                                &e,
                            );
                            if !recoverable {
                                return Ok(LoopOutcome::Done(self.finish(
                                    thread,
                                    iteration,
                                    usage,
                                    StopReason::MaxErrors,
                                    Some(format!(
                                        "{MAX_CONSECUTIVE_ERRORS} consecutive errors; last: {e}"
                                    )),
                                )));
                            }
                            iteration += 1;
                        }
                    }
                }
            }
        }
    }

    /// One iteration: before hooks, context check, then the model/tool
    /// sub-loop until a text-only response, a pause, or the call cap.
    async fn run_iteration(
        &self,
        thread: &mut Thread,
        iteration: u64,
        pipeline: &MiddlewarePipeline,
        executor: &ToolExecutor,
        context: &ContextManager,
        usage: &mut TokenUsage,
    ) -> Result<IterationStep, EngineError> {
        {
            let snapshot = usage.clone();
            let mut ctx = IterationContext {
                thread,
                iteration,
                usage: &snapshot,
            };
            pipeline.run_before(&mut ctx).await?;
        }

        if context.needs_summarization(thread) {
            info!(iteration, "Context budget exceeded, summarizing old iterations");
            let spent = context
                .summarize(thread, self.model.as_ref(), &self.config.model)
                .await;
            usage.merge(&spent);
        }

        let mut executed_calls = 0usize;
        let mut pause = None;
        let mut last_text = String::new();

        let completed_naturally = loop {
            let injection = context.build_context_injection(thread);
            let system = if injection.is_empty() {
                self.system_prompt.clone()
            } else {
                format!("{}\n\n{}", self.system_prompt, injection)
            };

            let request = ModelRequest {
                model: self.config.model.clone(),
                messages: self.serializer.serialize(thread, &system),
                tools: executor.definitions(),
            };
            let response = self.model.invoke(request).await?;
            usage.merge(&response.usage);

            if !response.text.is_empty() {
                last_text = response.text.clone();
                thread.record(iteration, EventKind::Message {
                    role: Role::Assistant,
                    content: response.text,
                });
            }

            if response.tool_calls.is_empty() {
                break true;
            }

            let batch = executor
                .execute_batch(thread, iteration, response.tool_calls)
                .await;
            executed_calls += batch.executed;

            if batch.pause.is_some() {
                pause = batch.pause;
                break false;
            }
            if executed_calls >= self.config.max_tool_calls_per_iteration {
                warn!(iteration, executed_calls, "Tool-call cap reached for this iteration");
                break false;
            }
        };

        Ok(IterationStep {
            response: last_text,
            pause,
            completed_naturally,
        })
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn build_executor(&self, pipeline: &MiddlewarePipeline) -> ToolExecutor {
        let mut sources: Vec<(String, Vec<Arc<dyn Tool>>)> =
            vec![("engine".to_string(), self.tools.clone())];
        sources.extend(pipeline.tool_sources());
        let merged = merge_tool_sources(&sources, &*self.on_tool_conflict);
        ToolExecutor::new(
            merged,
            self.config.interrupt_on.clone(),
            self.config.parallel_tools,
        )
    }

    fn record_failure(
        &self,
        thread: &mut Thread,
        iteration: u64,
        consecutive_errors: &mut u32,
        error: &EngineError,
    ) {
        *consecutive_errors += 1;
        let recoverable = *consecutive_errors < MAX_CONSECUTIVE_ERRORS;
        warn!(
            iteration,
            error = %error,
            consecutive_errors = *consecutive_errors,
            recoverable,
            "Iteration failed"
        );
        thread.record(iteration, EventKind::Error {
            error: error.to_string(),
            recoverable,
            tool_call_id: None,
        });
    }

    fn finish(
        &self,
        thread: Thread,
        iterations: u64,
        usage: TokenUsage,
        stop_reason: StopReason,
        stop_detail: Option<String>,
    ) -> AgentResult {
        let response = thread.last_assistant_message().unwrap_or_default().to_string();
        info!(
            thread_id = %thread.id,
            iterations,
            ?stop_reason,
            total_tokens = usage.total_tokens,
            "Run finished"
        );
        AgentResult {
            thread,
            response,
            stop_reason,
            stop_detail,
            usage,
            iterations,
        }
    }

    fn suspend(
        &self,
        mut thread: Thread,
        iteration: u64,
        original_prompt: String,
        usage: TokenUsage,
        signal: PauseSignal,
    ) -> PendingResult {
        let (question, context, urgency, format, choices) = match &signal {
            PauseSignal::HumanInput(call) => (
                call.args
                    .get("question")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Human input requested")
                    .to_string(),
                string_arg(&call.args, "context"),
                string_arg(&call.args, "urgency"),
                string_arg(&call.args, "format"),
                call.args.get("choices").and_then(|v| v.as_array()).map(|items| {
                    items
                        .iter()
                        .filter_map(|c| c.as_str().map(String::from))
                        .collect()
                }),
            ),
            PauseSignal::Interrupt(call) => (
                format!("Approve execution of '{}'?", call.name),
                Some(call.args.to_string()),
                None,
                None,
                None,
            ),
        };

        thread.record(iteration, EventKind::HumanInputRequested {
            question: question.clone(),
            context: context.clone(),
            urgency: urgency.clone(),
            format: format.clone(),
            choices: choices.clone(),
        });
        info!(thread_id = %thread.id, iteration, %question, "Run suspended for human input");

        PendingResult {
            thread,
            question,
            context,
            urgency,
            format,
            choices,
            iteration,
            original_prompt,
            usage,
        }
    }
}

fn string_arg(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ironloop_core::model::{ModelResponse, RequestedToolCall};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A model that replays a script of responses.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, _request: ModelRequest) -> Result<ModelResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text("fallback")))
        }
    }

    fn text(content: &str) -> ModelResponse {
        ModelResponse {
            text: content.to_string(),
            tool_calls: vec![],
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
                total_tokens: 150,
                cache_read_tokens: None,
                cache_write_tokens: None,
            },
            model: "scripted".into(),
        }
    }

    fn tool_call(name: &str, id: &str, args: serde_json::Value) -> ModelResponse {
        ModelResponse {
            text: String::new(),
            tool_calls: vec![RequestedToolCall {
                id: id.into(),
                name: name.into(),
                args,
            }],
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
                total_tokens: 150,
                cache_read_tokens: None,
                cache_write_tokens: None,
            },
            model: "scripted".into(),
        }
    }

    #[tokio::test]
    async fn text_only_response_completes_unverified() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(text("all done"))]));
        let engine = AgentLoop::new(model);

        let result = engine.run("do the thing").await.unwrap().expect_done();
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(result.response, "all done");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.usage.total_tokens, 150);
        assert!(matches!(
            result.thread.events.last().unwrap().kind,
            EventKind::Completion { verified: false, .. }
        ));
    }

    #[tokio::test]
    async fn usage_accumulates_across_model_calls() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call("missing_tool", "c1", json!({}))),
            Ok(text("done")),
        ]));
        let engine = AgentLoop::new(model);

        let result = engine.run("go").await.unwrap().expect_done();
        assert_eq!(result.usage.total_tokens, 300);
        assert_eq!(result.usage.input_tokens, 200);
    }

    #[tokio::test]
    async fn recoverable_error_is_retried() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(ModelError::Network("blip".into())),
            Ok(text("recovered")),
        ]));
        let engine = AgentLoop::new(model);

        let result = engine.run("go").await.unwrap().expect_done();
        assert_eq!(result.stop_reason, StopReason::Completed);
        assert_eq!(result.response, "recovered");
        assert_eq!(result.iterations, 2);

        let errors: Vec<_> = result
            .thread
            .events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Error { recoverable, .. } => Some(*recoverable),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec![true]);
    }

    #[tokio::test]
    async fn stream_passes_through_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(text("streamed"))]));
        let engine = AgentLoop::new(model);

        let mut rx = engine.stream("hello").await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("streamed"));
        assert!(chunk.done);
    }
}
