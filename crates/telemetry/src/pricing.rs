//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Each model has input and output
//! rates plus optional prompt-cache rates. Custom pricing can be added at
//! runtime.

use ironloop_core::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRates {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
    /// Price per 1M cache-read tokens in USD.
    pub cache_read_per_m: f64,
    /// Price per 1M cache-write tokens in USD.
    pub cache_write_per_m: f64,
}

impl ModelRates {
    /// Pricing with no cache discount (cache reads billed as input).
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_read_per_m: input_per_m,
            cache_write_per_m: input_per_m,
        }
    }

    /// Pricing with explicit cache rates.
    pub fn with_cache(
        input_per_m: f64,
        output_per_m: f64,
        cache_read_per_m: f64,
        cache_write_per_m: f64,
    ) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_read_per_m,
            cache_write_per_m,
        }
    }

    /// Compute cost for a usage record.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let cache_read = usage.cache_read_tokens.unwrap_or(0) as f64;
        let cache_write = usage.cache_write_tokens.unwrap_or(0) as f64;
        (usage.input_tokens as f64 * self.input_per_m
            + usage.output_tokens as f64 * self.output_per_m
            + cache_read * self.cache_read_per_m
            + cache_write * self.cache_write_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    rates: RwLock<HashMap<String, ModelRates>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut rates = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        rates.insert(
            "anthropic/claude-sonnet-4".into(),
            ModelRates::with_cache(3.0, 15.0, 0.3, 3.75),
        );
        rates.insert(
            "anthropic/claude-opus-4".into(),
            ModelRates::with_cache(15.0, 75.0, 1.5, 18.75),
        );
        rates.insert(
            "anthropic/claude-3.5-sonnet".into(),
            ModelRates::with_cache(3.0, 15.0, 0.3, 3.75),
        );
        rates.insert(
            "anthropic/claude-3.5-haiku".into(),
            ModelRates::with_cache(0.8, 4.0, 0.08, 1.0),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        rates.insert("openai/gpt-4o".into(), ModelRates::new(2.5, 10.0));
        rates.insert("openai/gpt-4o-mini".into(), ModelRates::new(0.15, 0.6));
        rates.insert("openai/o1".into(), ModelRates::new(15.0, 60.0));
        rates.insert("openai/o3-mini".into(), ModelRates::new(1.1, 4.4));

        // ── Google ─────────────────────────────────────────────────
        rates.insert("google/gemini-2.0-flash".into(), ModelRates::new(0.1, 0.4));
        rates.insert("google/gemini-1.5-pro".into(), ModelRates::new(1.25, 5.0));

        // ── Meta (via OpenRouter) ──────────────────────────────────
        rates.insert(
            "meta-llama/llama-3.1-70b".into(),
            ModelRates::new(0.52, 0.75),
        );

        // ── DeepSeek ───────────────────────────────────────────────
        rates.insert("deepseek/deepseek-v3".into(), ModelRates::new(0.27, 1.1));

        Self {
            rates: RwLock::new(rates),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelRates> {
        let rates = self.rates.read().unwrap();
        rates.get(model).cloned()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelRates) {
        let mut rates = self.rates.write().unwrap();
        rates.insert(model.into(), pricing);
    }

    /// Compute cost for a usage record, or `None` if the model is unknown.
    ///
    /// Supports flexible matching: tries exact match first, then common
    /// provider prefixes (`gpt-4o` → `openai/gpt-4o`), then prefix matching
    /// on the bare name (`gpt-4o-mini-2024-07-18` matches `gpt-4o-mini`).
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> Option<f64> {
        let rates = self.rates.read().unwrap();

        // 1. Exact match
        if let Some(r) = rates.get(model) {
            return Some(r.cost(usage));
        }

        // 2. Try with common provider prefixes
        for prefix in [
            "openai",
            "anthropic",
            "google",
            "deepseek",
            "meta-llama",
        ] {
            if let Some(r) = rates.get(format!("{prefix}/{model}").as_str()) {
                return Some(r.cost(usage));
            }
        }

        // 3. Prefix match — model ids often include a version suffix,
        //    e.g. "gpt-4o-mini-2024-07-18" should match "gpt-4o-mini"
        let model_lower = model.to_lowercase();
        let bare_model = model_lower.split('/').next_back().unwrap_or(&model_lower);

        let mut best: Option<(&str, &ModelRates)> = None;
        for (key, rate) in rates.iter() {
            let bare_key = key.split('/').next_back().unwrap_or(key);
            if bare_model.starts_with(&bare_key.to_lowercase())
                && best.is_none_or(|(b, _)| bare_key.len() > b.len())
            {
                best = Some((bare_key, rate));
            }
        }

        best.map(|(_, r)| r.cost(usage))
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let rates = self.rates.read().unwrap();
        let mut names: Vec<String> = rates.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.rates.read().unwrap().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
