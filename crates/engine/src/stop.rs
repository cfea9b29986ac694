//! Stop conditions — predicates that end the loop independent of task
//! completion.
//!
//! A condition sees the iteration number, the running usage totals, the
//! model id, and the thread, and answers with a human-readable reason when
//! the run should stop. Evaluation is short-circuit OR: the first
//! triggering condition wins.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ironloop_core::thread::Thread;
use ironloop_core::usage::TokenUsage;
use ironloop_telemetry::PricingTable;
use tracing::warn;

/// Everything a stop condition may inspect.
pub struct StopContext<'a> {
    pub iteration: u64,
    pub usage: &'a TokenUsage,
    pub model: &'a str,
    pub thread: &'a Thread,
}

/// A predicate over the loop's running state.
pub trait StopCondition: Send + Sync {
    /// `Some(reason)` to stop the run, `None` to keep going.
    fn evaluate(&self, ctx: &StopContext<'_>) -> Option<String>;
}

/// First-match-wins evaluation over an ordered condition list.
pub fn evaluate_stop_conditions(
    conditions: &[Box<dyn StopCondition>],
    ctx: &StopContext<'_>,
) -> Option<String> {
    conditions.iter().find_map(|c| c.evaluate(ctx))
}

// ── Built-in conditions ───────────────────────────────────────────────────

struct MaxIterations(u64);

impl StopCondition for MaxIterations {
    fn evaluate(&self, ctx: &StopContext<'_>) -> Option<String> {
        (ctx.iteration >= self.0).then(|| format!("reached {} iterations", self.0))
    }
}

/// Stop after `n` iterations.
pub fn max_iterations(n: u64) -> Box<dyn StopCondition> {
    Box::new(MaxIterations(n))
}

struct MaxTokens {
    limit: u64,
    counter: fn(&TokenUsage) -> u64,
    label: &'static str,
}

impl StopCondition for MaxTokens {
    fn evaluate(&self, ctx: &StopContext<'_>) -> Option<String> {
        let current = (self.counter)(ctx.usage);
        (current >= self.limit)
            .then(|| format!("{} {} tokens used (limit {})", current, self.label, self.limit))
    }
}

/// Stop once total token usage reaches `n`.
pub fn max_tokens(n: u64) -> Box<dyn StopCondition> {
    Box::new(MaxTokens {
        limit: n,
        counter: |u| u.total_tokens,
        label: "total",
    })
}

/// Stop once input token usage reaches `n`.
pub fn max_input_tokens(n: u64) -> Box<dyn StopCondition> {
    Box::new(MaxTokens {
        limit: n,
        counter: |u| u.input_tokens,
        label: "input",
    })
}

/// Stop once output token usage reaches `n`.
pub fn max_output_tokens(n: u64) -> Box<dyn StopCondition> {
    Box::new(MaxTokens {
        limit: n,
        counter: |u| u.output_tokens,
        label: "output",
    })
}

struct MaxCost {
    limit_usd: f64,
    model_override: Option<String>,
    pricing: Arc<PricingTable>,
    /// Model ids we have already warned about. Per-instance on purpose:
    /// concurrent engines must not share warn state.
    warned: Mutex<HashSet<String>>,
}

impl StopCondition for MaxCost {
    fn evaluate(&self, ctx: &StopContext<'_>) -> Option<String> {
        let model = self.model_override.as_deref().unwrap_or(ctx.model);
        let cost = match self.pricing.cost(model, ctx.usage) {
            Some(cost) => cost,
            None => {
                // Unknown model: cost 0, condition never trips. Warn once
                // per model id so a misconfigured id is visible in logs.
                if self.warned.lock().unwrap().insert(model.to_string()) {
                    warn!(model, "Unknown model id in pricing table; cost treated as $0");
                }
                0.0
            }
        };
        (cost >= self.limit_usd)
            .then(|| format!("spent ${:.4} (limit ${:.4})", cost, self.limit_usd))
    }
}

/// Stop once the estimated spend reaches `limit_usd`, priced with the
/// built-in table. `model_override` prices against a different model id
/// than the one the loop is running.
pub fn max_cost(limit_usd: f64, model_override: Option<&str>) -> Box<dyn StopCondition> {
    max_cost_with_table(
        limit_usd,
        model_override,
        Arc::new(PricingTable::with_defaults()),
    )
}

/// `max_cost` against a caller-supplied pricing table.
pub fn max_cost_with_table(
    limit_usd: f64,
    model_override: Option<&str>,
    pricing: Arc<PricingTable>,
) -> Box<dyn StopCondition> {
    Box::new(MaxCost {
        limit_usd,
        model_override: model_override.map(String::from),
        pricing,
        warned: Mutex::new(HashSet::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
            cache_read_tokens: None,
            cache_write_tokens: None,
        }
    }

    fn ctx<'a>(iteration: u64, usage: &'a TokenUsage, model: &'a str, thread: &'a Thread) -> StopContext<'a> {
        StopContext {
            iteration,
            usage,
            model,
            thread,
        }
    }

    #[test]
    fn max_iterations_threshold_is_inclusive() {
        let thread = Thread::new();
        let u = usage(0, 0);
        let cond = max_iterations(3);
        assert!(cond.evaluate(&ctx(2, &u, "m", &thread)).is_none());
        let reason = cond.evaluate(&ctx(3, &u, "m", &thread)).unwrap();
        assert!(reason.contains("iterations"));
    }

    #[test]
    fn token_conditions_watch_their_counter() {
        let thread = Thread::new();
        let u = usage(800, 100);

        assert!(max_tokens(900).evaluate(&ctx(1, &u, "m", &thread)).is_some());
        assert!(max_tokens(901).evaluate(&ctx(1, &u, "m", &thread)).is_none());
        assert!(
            max_input_tokens(800)
                .evaluate(&ctx(1, &u, "m", &thread))
                .is_some()
        );
        assert!(
            max_output_tokens(101)
                .evaluate(&ctx(1, &u, "m", &thread))
                .is_none()
        );
    }

    #[test]
    fn first_match_wins() {
        let thread = Thread::new();
        let u = usage(1000, 1000);
        let conditions = vec![max_iterations(100), max_tokens(1), max_output_tokens(1)];
        let reason = evaluate_stop_conditions(&conditions, &ctx(1, &u, "m", &thread)).unwrap();
        assert!(reason.contains("total"));
    }

    #[test]
    fn no_conditions_never_stops() {
        let thread = Thread::new();
        let u = usage(1_000_000, 1_000_000);
        assert!(evaluate_stop_conditions(&[], &ctx(99, &u, "m", &thread)).is_none());
    }

    #[test]
    fn cost_condition_trips_on_known_model() {
        let thread = Thread::new();
        // 1M input on gpt-4o = $2.50
        let u = usage(1_000_000, 0);
        let cond = max_cost(2.0, Some("openai/gpt-4o"));
        let reason = cond.evaluate(&ctx(1, &u, "ignored", &thread)).unwrap();
        assert!(reason.contains('$'));
    }

    #[test]
    fn unknown_model_costs_zero_and_warns_once() {
        let thread = Thread::new();
        let u = usage(1_000_000, 1_000_000);
        let cond = MaxCost {
            limit_usd: 0.01,
            model_override: None,
            pricing: Arc::new(PricingTable::with_defaults()),
            warned: Mutex::new(HashSet::new()),
        };

        // Never trips, no matter the usage.
        assert!(cond.evaluate(&ctx(1, &u, "unknown/model-xyz", &thread)).is_none());
        assert!(cond.evaluate(&ctx(2, &u, "unknown/model-xyz", &thread)).is_none());

        // Warn-once set holds exactly one entry for the repeated id.
        assert_eq!(cond.warned.lock().unwrap().len(), 1);

        // A different unknown id gets its own warning.
        assert!(cond.evaluate(&ctx(3, &u, "unknown/other", &thread)).is_none());
        assert_eq!(cond.warned.lock().unwrap().len(), 2);
    }

    #[test]
    fn model_override_takes_precedence() {
        let thread = Thread::new();
        let u = usage(1_000_000, 0);
        let cond = max_cost(1.0, Some("openai/gpt-4o"));
        // Context model is unknown, but the override prices against gpt-4o.
        assert!(cond.evaluate(&ctx(1, &u, "unknown/model", &thread)).is_some());
    }
}
