//! Tool execution — resolving the model's requested calls against the
//! registry and recording the outcomes.
//!
//! Two policies: sequential (default) runs calls one at a time in request
//! order; parallel fans a whole batch out with `join_all` and records the
//! results in the original request order once every call settles. In both
//! policies every `ToolCall` event gets exactly one `ToolResult` in the
//! same iteration — paused, missing, and failing tools get synthetic
//! results so the transcript always round-trips.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::future::join_all;
use ironloop_core::model::{RequestedToolCall, ToolDefinition};
use ironloop_core::thread::{EventKind, Thread};
use ironloop_core::tool::{REQUEST_HUMAN_INPUT, Tool, ToolRegistry, request_human_input_definition};
use tracing::{debug, warn};

/// Tool whose JSON output's `todos` field is mirrored into thread
/// metadata, giving callers a live view of the agent's plan without
/// parsing the transcript.
const WRITE_TODOS: &str = "write_todos";

/// Why tool execution wants the run paused. Carries the triggering call so
/// the engine can surface its arguments to the human.
#[derive(Debug, Clone)]
pub enum PauseSignal {
    /// The model called the reserved `request_human_input` tool.
    HumanInput(RequestedToolCall),

    /// The model called a tool listed in `interrupt_on`.
    Interrupt(RequestedToolCall),
}

/// What one batch of tool calls did.
pub struct BatchOutcome {
    /// Calls actually executed (paused calls are excluded).
    pub executed: usize,

    /// Set when the batch contained a pausing call. Human-input requests
    /// take precedence over interrupts within the same batch.
    pub pause: Option<PauseSignal>,
}

/// Executes batches of requested tool calls against a merged registry.
pub struct ToolExecutor {
    tools: ToolRegistry,
    interrupt_on: HashSet<String>,
    parallel: bool,
    group_counter: AtomicU64,
}

impl ToolExecutor {
    pub fn new(tools: ToolRegistry, interrupt_on: Vec<String>, parallel: bool) -> Self {
        Self {
            tools,
            interrupt_on: interrupt_on.into_iter().collect(),
            parallel,
            group_counter: AtomicU64::new(0),
        }
    }

    /// All definitions to bind on a model call: the registry sorted by
    /// name, plus the reserved human-input tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.tools.definitions();
        defs.push(request_human_input_definition());
        defs
    }

    /// Execute one batch of requested calls, appending `ToolCall` and
    /// `ToolResult` events to the thread.
    pub async fn execute_batch(
        &self,
        thread: &mut Thread,
        iteration: u64,
        calls: Vec<RequestedToolCall>,
    ) -> BatchOutcome {
        if self.parallel {
            self.execute_parallel(thread, iteration, calls).await
        } else {
            self.execute_sequential(thread, iteration, calls).await
        }
    }

    async fn execute_sequential(
        &self,
        thread: &mut Thread,
        iteration: u64,
        calls: Vec<RequestedToolCall>,
    ) -> BatchOutcome {
        let mut executed = 0;
        let mut pause = None;

        for call in calls {
            thread.record(iteration, EventKind::ToolCall {
                tool_name: call.name.clone(),
                tool_call_id: call.id.clone(),
                args: call.args.clone(),
            });

            if let Some(sentinel) = self.pause_sentinel(&call, &mut pause) {
                thread.record(iteration, EventKind::ToolResult {
                    tool_call_id: call.id.clone(),
                    result: sentinel,
                    duration_ms: None,
                    parallel_group: None,
                });
                continue;
            }

            let (result, duration_ms) = self.run_call(&call).await;
            self.mirror_todos(thread, &call, &result);
            thread.record(iteration, EventKind::ToolResult {
                tool_call_id: call.id,
                result,
                duration_ms: Some(duration_ms),
                parallel_group: None,
            });
            executed += 1;
        }

        BatchOutcome { executed, pause }
    }

    async fn execute_parallel(
        &self,
        thread: &mut Thread,
        iteration: u64,
        calls: Vec<RequestedToolCall>,
    ) -> BatchOutcome {
        // All ToolCall events land before any result, in request order.
        for call in &calls {
            thread.record(iteration, EventKind::ToolCall {
                tool_name: call.name.clone(),
                tool_call_id: call.id.clone(),
                args: call.args.clone(),
            });
        }

        // Classify up front but record nothing yet: sentinel results must
        // land interleaved in request order after the fan-out resolves.
        let mut pause = None;
        let sentinels: Vec<Option<String>> = calls
            .iter()
            .map(|call| self.pause_sentinel(call, &mut pause))
            .collect();

        let runnable: Vec<&RequestedToolCall> = calls
            .iter()
            .zip(&sentinels)
            .filter(|(_, sentinel)| sentinel.is_none())
            .map(|(call, _)| call)
            .collect();
        let executed = runnable.len();
        let group = if runnable.is_empty() {
            None
        } else {
            Some(self.group_counter.fetch_add(1, Ordering::Relaxed))
        };

        let mut outcomes: VecDeque<(String, u64)> =
            join_all(runnable.iter().map(|call| self.run_call(call)))
                .await
                .into_iter()
                .collect();

        // One result per call, back in the original request order.
        for (call, sentinel) in calls.iter().zip(sentinels) {
            match sentinel {
                Some(text) => thread.record(iteration, EventKind::ToolResult {
                    tool_call_id: call.id.clone(),
                    result: text,
                    duration_ms: None,
                    parallel_group: None,
                }),
                None => {
                    if let Some((result, duration_ms)) = outcomes.pop_front() {
                        self.mirror_todos(thread, call, &result);
                        thread.record(iteration, EventKind::ToolResult {
                            tool_call_id: call.id.clone(),
                            result,
                            duration_ms: Some(duration_ms),
                            parallel_group: group,
                        });
                    }
                }
            }
        }

        BatchOutcome { executed, pause }
    }

    /// Decide whether a call pauses the run instead of executing. Returns
    /// the synthetic result text to record when it does, and folds the
    /// call into the batch's pause signal with human-input precedence.
    fn pause_sentinel(
        &self,
        call: &RequestedToolCall,
        pause: &mut Option<PauseSignal>,
    ) -> Option<String> {
        if call.name == REQUEST_HUMAN_INPUT {
            if !matches!(pause, Some(PauseSignal::HumanInput(_))) {
                *pause = Some(PauseSignal::HumanInput(call.clone()));
            }
            return Some("[Waiting for human input]".to_string());
        }
        if self.interrupt_on.contains(&call.name) {
            if pause.is_none() {
                *pause = Some(PauseSignal::Interrupt(call.clone()));
            }
            return Some("[Not executed: paused for human approval]".to_string());
        }
        None
    }

    async fn run_call(&self, call: &RequestedToolCall) -> (String, u64) {
        let start = Instant::now();
        let result = match self.tools.get(&call.name) {
            Some(tool) => match tool.execute(call.args.clone()).await {
                Ok(value) => render_output(&value),
                Err(e) => format!("Error: {e}"),
            },
            // A hallucinated tool name becomes an error-text result the
            // model sees on the next exchange.
            None => format!("Error: tool '{}' not found", call.name),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool call finished");
        (result, duration_ms)
    }

    /// Mirror a `write_todos` output into thread metadata. The result text
    /// is whatever the tool returned — error text for failed or missing
    /// tools — so only a successful run with a JSON `todos` field updates
    /// anything. Parse failures are logged and swallowed.
    fn mirror_todos(&self, thread: &mut Thread, call: &RequestedToolCall, result: &str) {
        if call.name != WRITE_TODOS {
            return;
        }
        match serde_json::from_str::<serde_json::Value>(result) {
            Ok(output) => {
                if let Some(todos) = output.get("todos") {
                    thread.metadata.insert("todos".to_string(), todos.clone());
                }
            }
            Err(e) => {
                warn!(error = %e, "write_todos output was not JSON; todos metadata unchanged");
            }
        }
    }
}

/// Tool outputs go on the transcript as text; string outputs stay bare,
/// everything else is compact JSON.
fn render_output(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ironloop_core::error::ToolError;
    use ironloop_core::tool::Tool;
    use serde_json::json;
    use std::sync::Arc;

    struct Calculator;

    #[async_trait]
    impl Tool for Calculator {
        fn name(&self) -> &str {
            "calculator"
        }
        fn description(&self) -> &str {
            "Adds two numbers"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}})
        }
        async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        }
    }

    struct Flaky;

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "flaky".into(),
                reason: "disk on fire".into(),
            })
        }
    }

    /// A todos tool that plans for itself: its output, not its arguments,
    /// carries the list.
    struct Todos {
        output: serde_json::Value,
    }

    #[async_trait]
    impl Tool for Todos {
        fn name(&self) -> &str {
            WRITE_TODOS
        }
        fn description(&self) -> &str {
            "Record the current plan"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(self.output.clone())
        }
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(Calculator));
        tools.register(Arc::new(Flaky));
        tools.register(Arc::new(Todos {
            output: json!({"todos": ["ship it", "write docs"]}),
        }));
        tools
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> RequestedToolCall {
        RequestedToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    fn kinds(thread: &Thread) -> Vec<&EventKind> {
        thread.events.iter().map(|e| &e.kind).collect()
    }

    fn result_ids(thread: &Thread) -> Vec<&str> {
        thread
            .events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn sequential_batch_interleaves_calls_and_results() {
        let executor = ToolExecutor::new(registry(), vec![], false);
        let mut thread = Thread::new();

        let outcome = executor
            .execute_batch(&mut thread, 1, vec![
                call("c1", "calculator", json!({"a": 2, "b": 3})),
                call("c2", "calculator", json!({"a": 10, "b": 1})),
            ])
            .await;

        assert_eq!(outcome.executed, 2);
        assert!(outcome.pause.is_none());

        let events = kinds(&thread);
        assert!(matches!(events[0], EventKind::ToolCall { tool_call_id, .. } if tool_call_id == "c1"));
        match events[1] {
            EventKind::ToolResult {
                tool_call_id,
                result,
                duration_ms,
                parallel_group,
            } => {
                assert_eq!(tool_call_id, "c1");
                assert_eq!(result, "5");
                assert!(duration_ms.is_some());
                assert!(parallel_group.is_none());
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert!(matches!(events[2], EventKind::ToolCall { tool_call_id, .. } if tool_call_id == "c2"));
        assert!(matches!(events[3], EventKind::ToolResult { result, .. } if result == "11"));
    }

    #[tokio::test]
    async fn parallel_batch_records_calls_first_then_ordered_results() {
        let executor = ToolExecutor::new(registry(), vec![], true);
        let mut thread = Thread::new();

        executor
            .execute_batch(&mut thread, 1, vec![
                call("c1", "calculator", json!({"a": 1, "b": 1})),
                call("c2", "calculator", json!({"a": 2, "b": 2})),
                call("c3", "calculator", json!({"a": 3, "b": 3})),
            ])
            .await;

        let events = kinds(&thread);
        assert!(events[..3].iter().all(|k| matches!(k, EventKind::ToolCall { .. })));

        let mut groups = Vec::new();
        for (i, expected) in [("c1", "2"), ("c2", "4"), ("c3", "6")].iter().enumerate() {
            match events[3 + i] {
                EventKind::ToolResult {
                    tool_call_id,
                    result,
                    parallel_group,
                    ..
                } => {
                    assert_eq!(tool_call_id, expected.0);
                    assert_eq!(result, expected.1);
                    groups.push(parallel_group.unwrap());
                }
                other => panic!("expected result, got {other:?}"),
            }
        }
        assert!(groups.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn parallel_batch_keeps_request_order_around_paused_calls() {
        let executor = ToolExecutor::new(registry(), vec!["flaky".into()], true);
        let mut thread = Thread::new();

        let outcome = executor
            .execute_batch(&mut thread, 1, vec![
                call("c1", "calculator", json!({"a": 1, "b": 1})),
                call("c2", "flaky", json!({})),
                call("c3", "calculator", json!({"a": 3, "b": 3})),
            ])
            .await;

        assert_eq!(outcome.executed, 2);
        assert!(matches!(outcome.pause, Some(PauseSignal::Interrupt(_))));

        // The interrupted call's sentinel lands between the executed
        // results, exactly where it was requested.
        assert_eq!(result_ids(&thread), vec!["c1", "c2", "c3"]);
        let events = kinds(&thread);
        assert!(matches!(events[4], EventKind::ToolResult { result, parallel_group, .. }
            if result.contains("paused for human approval") && parallel_group.is_none()));
        assert!(matches!(events[3], EventKind::ToolResult { result, .. } if result == "2"));
        assert!(matches!(events[5], EventKind::ToolResult { result, .. } if result == "6"));
    }

    #[tokio::test]
    async fn failing_and_unknown_tools_yield_error_text_results() {
        let executor = ToolExecutor::new(registry(), vec![], false);
        let mut thread = Thread::new();

        let outcome = executor
            .execute_batch(&mut thread, 1, vec![
                call("c1", "flaky", json!({})),
                call("c2", "no_such_tool", json!({})),
            ])
            .await;

        // Both counted: each produced a recorded result.
        assert_eq!(outcome.executed, 2);
        let events = kinds(&thread);
        assert!(matches!(events[1], EventKind::ToolResult { result, .. }
            if result.contains("disk on fire")));
        assert!(matches!(events[3], EventKind::ToolResult { result, .. }
            if result.contains("'no_such_tool' not found")));
    }

    #[tokio::test]
    async fn human_input_takes_precedence_over_interrupt() {
        let executor = ToolExecutor::new(registry(), vec!["calculator".into()], false);
        let mut thread = Thread::new();

        let outcome = executor
            .execute_batch(&mut thread, 1, vec![
                call("c1", "calculator", json!({"a": 1, "b": 1})),
                call("c2", REQUEST_HUMAN_INPUT, json!({"question": "Proceed?"})),
            ])
            .await;

        assert_eq!(outcome.executed, 0);
        match outcome.pause {
            Some(PauseSignal::HumanInput(call)) => assert_eq!(call.id, "c2"),
            other => panic!("expected human-input pause, got {other:?}"),
        }

        // Both calls got synthetic results, no execution happened.
        let events = kinds(&thread);
        assert!(matches!(events[1], EventKind::ToolResult { result, duration_ms, .. }
            if result.contains("paused for human approval") && duration_ms.is_none()));
        assert!(matches!(events[3], EventKind::ToolResult { result, .. }
            if result.contains("Waiting for human input")));
    }

    #[tokio::test]
    async fn interrupt_pauses_but_rest_of_batch_executes() {
        let executor = ToolExecutor::new(registry(), vec!["flaky".into()], false);
        let mut thread = Thread::new();

        let outcome = executor
            .execute_batch(&mut thread, 1, vec![
                call("c1", "flaky", json!({})),
                call("c2", "calculator", json!({"a": 4, "b": 4})),
            ])
            .await;

        assert_eq!(outcome.executed, 1);
        assert!(matches!(outcome.pause, Some(PauseSignal::Interrupt(_))));
        let events = kinds(&thread);
        assert!(matches!(events[3], EventKind::ToolResult { result, .. } if result == "8"));
    }

    #[tokio::test]
    async fn write_todos_mirrors_its_output_into_metadata() {
        let executor = ToolExecutor::new(registry(), vec![], false);
        let mut thread = Thread::new();

        // Empty arguments: the todos come from the tool's output.
        executor
            .execute_batch(&mut thread, 1, vec![call("c1", WRITE_TODOS, json!({}))])
            .await;

        assert_eq!(
            thread.metadata.get("todos"),
            Some(&json!(["ship it", "write docs"]))
        );
    }

    #[tokio::test]
    async fn write_todos_args_alone_do_not_update_metadata() {
        // No tool registered under the name, so execution produces error
        // text — the arguments' todos must not leak into metadata.
        let executor = ToolExecutor::new(ToolRegistry::new(), vec![], false);
        let mut thread = Thread::new();

        executor
            .execute_batch(&mut thread, 1, vec![call(
                "c1",
                WRITE_TODOS,
                json!({"todos": ["from-args"]}),
            )])
            .await;

        assert!(thread.metadata.get("todos").is_none());
    }

    #[tokio::test]
    async fn write_todos_non_json_output_is_swallowed() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(Todos {
            output: json!("plain text, no structure"),
        }));
        let executor = ToolExecutor::new(tools, vec![], false);
        let mut thread = Thread::new();

        let outcome = executor
            .execute_batch(&mut thread, 1, vec![call("c1", WRITE_TODOS, json!({}))])
            .await;

        // The call still executed and recorded a result; metadata is
        // untouched.
        assert_eq!(outcome.executed, 1);
        assert!(thread.metadata.get("todos").is_none());
    }

    #[test]
    fn definitions_include_reserved_tool() {
        let executor = ToolExecutor::new(registry(), vec![], false);
        let defs = executor.definitions();
        assert_eq!(defs.last().unwrap().name, REQUEST_HUMAN_INPUT);
        // Registry portion is sorted by name.
        let names: Vec<_> = defs[..defs.len() - 1].iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["calculator", "flaky", WRITE_TODOS]);
    }
}
