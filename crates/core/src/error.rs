//! Error types for the Ironloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; `EngineError` is the
//! top-level aggregate the agent loop works with.
//!
//! An unrecoverable run is *not* an `EngineError`: the loop returns
//! `stop_reason = max_errors` instead of propagating, so callers branch on
//! the stop reason rather than catching errors for normal agent failure
//! modes.

use thiserror::Error;

/// The top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    // --- Model client errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Middleware hook errors ---
    #[error("Middleware '{middleware}' failed: {reason}")]
    Middleware { middleware: String, reason: String },

    // --- Verification callback errors ---
    #[error("Verification failed to run: {0}")]
    Verification(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, EngineError>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by model provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = EngineError::Model(ModelError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = EngineError::Tool(ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: "exit code 1".into(),
        });
        assert!(err.to_string().contains("shell"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn middleware_error_names_the_middleware() {
        let err = EngineError::Middleware {
            middleware: "todos".into(),
            reason: "hook panicked".into(),
        };
        assert!(err.to_string().contains("todos"));
    }
}
