//! Thread serialization — turning an event log into model-ready input.
//!
//! The engine is format-agnostic: any serializer works as long as
//! tool-call/tool-result pairing round-trips. `TranscriptSerializer` is the
//! default and renders one `ChatMessage` per event.

use crate::model::{ChatMessage, RequestedToolCall, Role};
use crate::thread::{EventKind, Thread};

/// Converts a thread into the message list a model client consumes.
pub trait ThreadSerializer: Send + Sync {
    /// Serialize the thread, with `system_prompt` as the leading system
    /// message.
    fn serialize(&self, thread: &Thread, system_prompt: &str) -> Vec<ChatMessage>;
}

/// The default serializer.
///
/// Rendering rules:
/// - `Message` events map to their role directly.
/// - `ToolCall`/`ToolResult` keep their ids so pairing round-trips.
/// - `Error` events are rendered as user-visible notes, giving the model
///   visibility into its own failures on retry.
/// - `HumanInputRequested`/`HumanInputReceived` render as an
///   assistant question and a user answer.
/// - `Summary` events are omitted here; the context manager injects them
///   into the system prompt instead.
/// - `Completion` events are terminal markers and are omitted.
#[derive(Debug, Clone, Default)]
pub struct TranscriptSerializer;

impl ThreadSerializer for TranscriptSerializer {
    fn serialize(&self, thread: &Thread, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(thread.events.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }

        for event in &thread.events {
            match &event.kind {
                EventKind::Message { role, content } => messages.push(ChatMessage {
                    role: *role,
                    content: content.clone(),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                }),
                EventKind::ToolCall {
                    tool_name,
                    tool_call_id,
                    args,
                } => messages.push(ChatMessage::assistant_tool_calls(
                    "",
                    vec![RequestedToolCall {
                        id: tool_call_id.clone(),
                        name: tool_name.clone(),
                        args: args.clone(),
                    }],
                )),
                EventKind::ToolResult {
                    tool_call_id,
                    result,
                    ..
                } => messages.push(ChatMessage::tool_result(tool_call_id, result)),
                EventKind::Error { error, .. } => {
                    messages.push(ChatMessage::user(format!("[iteration error] {error}")));
                }
                EventKind::HumanInputRequested { question, .. } => {
                    messages.push(ChatMessage::assistant(format!(
                        "[human input requested] {question}"
                    )));
                }
                EventKind::HumanInputReceived { response } => {
                    messages.push(ChatMessage::user(response.clone()));
                }
                EventKind::Completion { .. } | EventKind::Summary { .. } => {}
            }
        }

        messages
    }
}
