//! # Ironloop Core
//!
//! Domain types, traits, and error definitions for the Ironloop agent
//! execution engine. This crate has **zero framework dependencies** — it
//! defines the domain model that the engine and telemetry crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator of the engine is defined as a trait here:
//! the model client, tool implementations, and the thread serializer.
//! Implementations live outside this crate (or in test doubles). This keeps
//! the dependency graph pointing inward and makes the loop trivially
//! testable with scripted mocks.

pub mod error;
pub mod model;
pub mod serialize;
pub mod thread;
pub mod tool;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use error::{EngineError, ModelError, Result, ToolError};
pub use model::{
    ChatMessage, ModelClient, ModelRequest, ModelResponse, RequestedToolCall, Role, StreamChunk,
    ToolDefinition,
};
pub use serialize::{ThreadSerializer, TranscriptSerializer};
pub use thread::{Event, EventKind, Thread, ThreadId};
pub use tool::{REQUEST_HUMAN_INPUT, Tool, ToolRegistry, request_human_input_definition};
pub use usage::TokenUsage;
