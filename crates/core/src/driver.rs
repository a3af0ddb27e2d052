//! Driver contract: the boundary to a language-model backend.
//!
//! The engine never talks to a vendor API itself. It hands a driver the full
//! history plus a derived [`RequestOptions`] and gets back either a complete
//! [`Message`] or a lazy stream of aggregated values per the streaming
//! contract in [`crate::streaming`]. Drivers also own the per-run tool
//! registry and the structured-output schema, so the loop can resolve tools
//! where it registered them.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{DriverError, Result};
use crate::message::Message;
use crate::streaming::StreamedMessage;
use crate::tool::Tool;

/// Token usage for a single round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool definition in the shape drivers hand to their backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,

    /// JSON Schema for the tool's parameters
    pub parameters: serde_json::Value,
}

/// How the model should pick among registered tools.
///
/// Serializes to the common wire forms: `"auto"` / `"none"` / `"required"`
/// as bare strings, and a forced tool as
/// `{"type":"function","function":{"name":...}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Force(String),
}

impl Serialize for ToolChoice {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::None => serializer.serialize_str("none"),
            Self::Required => serializer.serialize_str("required"),
            Self::Force(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name },
            })
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ToolChoice {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;
        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::String(s) => match s.as_str() {
                "auto" => Ok(Self::Auto),
                "none" => Ok(Self::None),
                "required" => Ok(Self::Required),
                other => Err(D::Error::custom(format!("unknown tool choice '{other}'"))),
            },
            serde_json::Value::Object(_) => match value["function"]["name"].as_str() {
                Some(name) => Ok(Self::Force(name.to_string())),
                None => Err(D::Error::custom("forced tool choice requires function.name")),
            },
            _ => Err(D::Error::custom("tool choice must be a string or an object")),
        }
    }
}

/// Per-request configuration derived by the loop for one round.
///
/// `parallel_tool_calls` and `tool_choice` are omitted from the serialized
/// form entirely when unset; drivers never see an explicit "unset" marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub model: String,
    pub max_completion_tokens: u32,
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// A lazy stream of aggregated values for one round, per the contract in
/// [`crate::streaming`].
pub type MessageStream = BoxStream<'static, Result<StreamedMessage>>;

/// The boundary to a language-model backend.
///
/// A driver must return either a plain assistant message or an assistant
/// tool-call turn from [`send_message`](Self::send_message); the loop treats
/// anything else as a fatal result-shape error.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Driver name, for logging.
    fn name(&self) -> &str;

    /// One synchronous round: full history in, one complete message out.
    async fn send_message(
        &mut self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> std::result::Result<Message, DriverError>;

    /// One streamed round: full history in, lazy aggregated sequence out.
    async fn send_message_streamed(
        &mut self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> std::result::Result<MessageStream, DriverError>;

    /// Register a tool for this run. Re-registering a name replaces it.
    fn register_tool(&mut self, tool: Arc<dyn Tool>);

    /// Look up a registered tool by name.
    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>>;

    /// Set the JSON schema constraining the final response.
    fn set_response_schema(&mut self, schema: serde_json::Value);

    /// The active response schema, if any.
    fn response_schema(&self) -> Option<&serde_json::Value>;

    /// Whether a response schema is active for this run.
    fn structured_output_enabled(&self) -> bool {
        self.response_schema().is_some()
    }
}
