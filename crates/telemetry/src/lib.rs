//! Cost tracking for Ironloop agents.
//!
//! Provides a built-in per-model pricing table (input, output, and prompt
//! cache rates) and cost computation over `TokenUsage`, used by the
//! engine's cost-based stop condition to halt runaway API spend.

pub mod pricing;

pub use pricing::{ModelRates, PricingTable};
