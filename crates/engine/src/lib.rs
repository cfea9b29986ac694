//! The Ironloop agent execution engine.
//!
//! The engine drives a language model through repeated reason/act cycles
//! against an append-only event log (the `Thread`):
//!
//! 1. **Before hooks** — middleware runs in list order
//! 2. **Context check** — summarize old iterations if over the token budget
//! 3. **Model + tools** — the inner sub-loop: invoke the model, execute any
//!    requested tools, repeat until a text-only response (or the per-iteration
//!    tool-call cap)
//! 4. **After hooks, stop conditions, human-in-the-loop, verification** —
//!    either terminate, pause for a human, or continue to the next iteration
//!
//! A run terminates as `completed`, `stop_condition`, or `max_errors` — or
//! suspends as `human_input_needed`, returning a [`PendingResult`] that can
//! be resumed (any number of times) against the same thread.

pub mod config;
pub mod context;
pub mod executor;
pub mod middleware;
pub mod runner;
pub mod stop;

pub use config::LoopConfig;
pub use context::ContextManager;
pub use executor::{PauseSignal, ToolExecutor};
pub use middleware::{IterationContext, Middleware, MiddlewarePipeline, merge_tool_sources};
pub use runner::{
    AgentLoop, AgentResult, LoopOutcome, PendingResult, StopReason, Verdict, Verifier,
};
pub use stop::{
    StopCondition, StopContext, evaluate_stop_conditions, max_cost, max_cost_with_table,
    max_input_tokens, max_iterations, max_output_tokens, max_tokens,
};
