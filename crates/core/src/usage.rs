//! Token accounting.
//!
//! `TokenUsage` is merged pointwise across model calls, iterations, and
//! resumed runs. The optional cache counters stay `None` until a model call
//! actually reports them — `None` means "this provider never told us",
//! which is different from zero.

use serde::{Deserialize, Serialize};

/// Token usage for one model call, or a running total of many.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,

    /// Tokens served from the provider's prompt cache, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,

    /// Tokens written to the provider's prompt cache, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
}

/// Sum two optional counters; the result is `None` iff both sides are.
fn add_optional(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (x, y) => Some(x.unwrap_or(0) + y.unwrap_or(0)),
    }
}

impl TokenUsage {
    /// Pointwise addition of two usage records.
    pub fn add(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
            cache_read_tokens: add_optional(self.cache_read_tokens, other.cache_read_tokens),
            cache_write_tokens: add_optional(self.cache_write_tokens, other.cache_write_tokens),
        }
    }

    /// Merge another usage record into this one in place.
    pub fn merge(&mut self, other: &TokenUsage) {
        *self = self.add(other);
    }
}
