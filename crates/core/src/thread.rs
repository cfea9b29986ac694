//! Thread and Event domain types.
//!
//! A `Thread` is the append-only event log for one agent run — the sole
//! mutable resource the engine touches. Every model exchange, tool call,
//! error, and human-input pause is recorded as an `Event`, so the full
//! transcript can be replayed to the model or persisted verbatim by the
//! caller between suspensions.
//!
//! The one sanctioned destructive rewrite is context summarization, which
//! replaces old iterations' raw events with `Summary` events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Role;

/// Unique identifier for a thread (one agent run).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single event in a thread's log.
///
/// Every event carries the iteration it belongs to; the engine relies on
/// this for summarization grouping and for resuming at
/// `max(iteration) + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// When this event was appended.
    pub timestamp: DateTime<Utc>,

    /// The loop iteration this event belongs to.
    pub iteration: u64,

    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The closed set of things that can happen during an agent run.
///
/// New kinds are added as new variants — the engine matches exhaustively,
/// so an addition here is a compile error everywhere it matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A user, assistant, or system message.
    Message { role: Role, content: String },

    /// The model requested a tool invocation.
    ToolCall {
        tool_name: String,
        tool_call_id: String,
        args: serde_json::Value,
    },

    /// The outcome of a tool invocation.
    ///
    /// Every `ToolCall` is followed, within the same iteration, by exactly
    /// one `ToolResult` with a matching id — including synthetic results
    /// for paused or missing tools, so the transcript always round-trips.
    ToolResult {
        tool_call_id: String,
        result: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parallel_group: Option<u64>,
    },

    /// An iteration failed.
    Error {
        error: String,
        recoverable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },

    /// The run paused waiting for a human.
    HumanInputRequested {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        urgency: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choices: Option<Vec<String>>,
    },

    /// A human answered; the run resumes on the next iteration.
    HumanInputReceived { response: String },

    /// The run finished.
    Completion { result: String, verified: bool },

    /// Condensed stand-in for the raw events of older iterations.
    Summary {
        summarized_iterations: Vec<u64>,
        summary: String,
    },
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(iteration: u64, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            iteration,
            kind,
        }
    }

    /// Convenience constructor for a message event.
    pub fn message(iteration: u64, role: Role, content: impl Into<String>) -> Self {
        Self::new(
            iteration,
            EventKind::Message {
                role,
                content: content.into(),
            },
        )
    }
}

/// The append-only event log plus metadata for one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Unique thread ID.
    pub id: ThreadId,

    /// Ordered events. Immutable once appended, except for the
    /// summarization rewrite.
    pub events: Vec<Event>,

    /// Out-of-band observations (e.g. the `write_todos` side channel).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// When this thread was created.
    pub created_at: DateTime<Utc>,

    /// When the last event was appended.
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create a new empty thread.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ThreadId::new(),
            events: Vec::new(),
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an event, refreshing `updated_at`.
    pub fn append(&mut self, event: Event) {
        self.updated_at = Utc::now();
        self.events.push(event);
    }

    /// Append a freshly stamped event of the given kind.
    pub fn record(&mut self, iteration: u64, kind: EventKind) {
        self.append(Event::new(iteration, kind));
    }

    /// Swap in a rewritten event list, refreshing `updated_at`.
    ///
    /// Used by context summarization — the one destructive rewrite the
    /// engine performs.
    pub fn replace_events(&mut self, events: Vec<Event>) {
        self.updated_at = Utc::now();
        self.events = events;
    }

    /// The highest iteration number seen so far (0 for an empty thread).
    pub fn max_iteration(&self) -> u64 {
        self.events.iter().map(|e| e.iteration).max().unwrap_or(0)
    }

    /// Events belonging to one iteration, in append order.
    pub fn events_for_iteration(&self, iteration: u64) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.iteration == iteration)
            .collect()
    }

    /// The content of the most recent assistant message, if any.
    pub fn last_assistant_message(&self) -> Option<&str> {
        self.events.iter().rev().find_map(|e| match &e.kind {
            EventKind::Message {
                role: Role::Assistant,
                content,
            } => Some(content.as_str()),
            _ => None,
        })
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}
