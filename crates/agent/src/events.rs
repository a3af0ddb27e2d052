//! Run-level events for the streamed surface.
//!
//! A streamed run yields `AgentEvent`s in order of occurrence; callers that
//! forward them to clients (SSE, WebSocket) can rely on the serialized
//! `type` tag.

use capstan_core::message::{Message, StreamedAssistantMessage};
use serde::{Deserialize, Serialize};

/// The final value of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AgentOutput {
    /// A plain assistant message.
    Message(Message),

    /// A structured object decoded per the active response schema.
    Structured(serde_json::Value),
}

/// Events yielded by a streamed run.
///
/// - `chunk`: a fresh snapshot of the accumulating assistant turn
/// - `tool_call`: a reassembled tool-call turn; its calls execute next
/// - `done`: the run finished, carrying the final output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Snapshot of the in-flight assistant turn after a content delta.
    Chunk(StreamedAssistantMessage),

    /// A complete tool-call turn reconstructed from the stream.
    ToolCall(Message),

    /// The run is complete.
    Done(AgentOutput),
}

impl AgentEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk(_) => "chunk",
            Self::ToolCall(_) => "tool_call",
            Self::Done(_) => "done",
        }
    }
}
