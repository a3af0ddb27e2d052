//! Message domain types.
//!
//! These are the value objects that flow through the whole engine: the caller
//! hands the loop a user message, history stores role-tagged turns, the driver
//! returns plain assistant text or a tool-call turn, and streamed turns build
//! up inside a `StreamedAssistantMessage` before being folded back into a
//! regular `Message`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::driver::Usage;
use crate::error::{Error, Result};

/// Who authored a given turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Engine-injected instructions
    System,
    /// Instructions on the developer channel
    Developer,
    /// The human in the conversation
    User,
    /// The model
    Assistant,
    /// Output of an executed tool call
    Tool,
}

/// One turn of a conversation.
///
/// One flat struct covers every turn shape: a plain text turn has `content`
/// set, an assistant tool-call turn has `tool_calls` (and `raw_payload`, the
/// driver-native envelope preserved for replay), and a tool-result turn has
/// `tool_call_id` correlating it to the call it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Generated unique identifier
    pub id: String,

    /// Author of the turn
    pub role: Role,

    /// The text content; tool-call turns carry none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Calls the assistant asked to run, empty for plain turns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// For tool-result turns, the id of the call being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Driver-native envelope for replaying a tool-call turn verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Free-form extras such as token usage
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Construct a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            raw_payload: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Construct a plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            raw_payload: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Construct a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            raw_payload: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Construct a developer message.
    pub fn developer(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Developer,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            raw_payload: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a tool result message correlated to its originating call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            raw_payload: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create an assistant tool-call turn from concrete call requests.
    ///
    /// Every call's `arguments` string is validated here (the
    /// re-serialization point): a call that does not parse as JSON fails the
    /// construction with `Error::MalformedArguments`. The driver-native
    /// envelope is captured in `raw_payload` so the turn can be replayed
    /// without losing fields.
    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Result<Self> {
        let mut entries = Vec::with_capacity(calls.len());
        for call in &calls {
            call.arguments_value()?;
            entries.push(json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments,
                },
            }));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: None,
            tool_calls: calls,
            tool_call_id: None,
            raw_payload: Some(json!({
                "role": "assistant",
                "tool_calls": entries,
            })),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        })
    }

    /// Whether this message is an assistant tool-call turn.
    pub fn is_tool_call(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Rough token count estimate for this message (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.content.as_deref().map_or(0, |c| c.len() / 4)
    }
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Driver-assigned call id, echoed back in the result turn
    pub id: String,

    /// Registered tool name
    pub name: String,

    /// Arguments as a JSON string, validated lazily at the point of use
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Decode the argument string.
    ///
    /// Called when the arguments are actually needed (execution or
    /// re-serialization), never at construction.
    pub fn arguments_value(&self) -> Result<serde_json::Value> {
        serde_json::from_str(&self.arguments).map_err(|e| Error::MalformedArguments {
            tool_name: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Accumulator for an in-flight streamed assistant turn.
///
/// Created empty when a streamed round starts, grown by every content delta,
/// marked complete when the driver reports usage, and finally folded into a
/// plain assistant [`Message`] via [`into_message`](Self::into_message).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamedAssistantMessage {
    /// Full content received so far (append-only)
    pub content: String,

    /// The most recent delta, exactly as it arrived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunk: Option<String>,

    /// Whether the driver has signalled the end of this turn
    pub complete: bool,

    /// Token usage, attached with the terminal record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamedAssistantMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a content delta and remember it as the newest chunk.
    pub fn append_chunk(&mut self, delta: &str) {
        self.content.push_str(delta);
        self.last_chunk = Some(delta.to_string());
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    pub fn set_complete(&mut self) {
        self.complete = true;
    }

    /// Fold the accumulator into a regular assistant message, carrying usage
    /// into the message metadata when present.
    pub fn into_message(self) -> Message {
        let mut message = Message::assistant(self.content);
        if let Some(usage) = self.usage {
            message.metadata.insert("usage".into(), json!(usage));
        }
        message
    }
}
