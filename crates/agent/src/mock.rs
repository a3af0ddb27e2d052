//! Queue-scripted driver for tests and examples.
//!
//! `MockDriver` replays queued replies in order. Its streamed path feeds
//! scripted chunk records through the real aggregator in
//! [`capstan_core::streaming`], so tests exercise the same reassembly code
//! real drivers use. It also counts sends, which lets tests assert that a
//! vetoed run never touched the network.
//!
//! This doubles as a template for writing real drivers: implement
//! [`LlmDriver`] the same way with an HTTP client where the script queue is.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use capstan_core::driver::{LlmDriver, MessageStream, RequestOptions, Usage};
use capstan_core::error::DriverError;
use capstan_core::message::{Message, ToolCallRequest};
use capstan_core::streaming::{FinishReason, StreamChunk, aggregate};
use capstan_core::tool::{Tool, ToolRegistry};
use futures::stream;
use serde_json::json;

/// One scripted reply.
#[derive(Debug, Clone)]
enum Scripted {
    Text {
        content: String,
        usage: Option<Usage>,
    },
    ToolCalls(Vec<ToolCallRequest>),
    Raw(Message),
    Chunks(Vec<StreamChunk>),
    Fail(DriverError),
}

/// A driver that replays a scripted queue of replies.
#[derive(Default)]
pub struct MockDriver {
    script: Mutex<VecDeque<Scripted>>,
    sends: Arc<AtomicUsize>,
    tools: ToolRegistry,
    response_schema: Option<serde_json::Value>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text reply.
    pub fn push_text(&mut self, content: impl Into<String>) -> &mut Self {
        self.push(Scripted::Text {
            content: content.into(),
            usage: None,
        })
    }

    /// Queue a plain text reply carrying usage metadata.
    pub fn push_text_with_usage(&mut self, content: impl Into<String>, usage: Usage) -> &mut Self {
        self.push(Scripted::Text {
            content: content.into(),
            usage: Some(usage),
        })
    }

    /// Queue a tool-call turn.
    pub fn push_tool_calls(&mut self, calls: Vec<ToolCallRequest>) -> &mut Self {
        self.push(Scripted::ToolCalls(calls))
    }

    /// Queue a reply verbatim, bypassing construction-time validation.
    pub fn push_message(&mut self, message: Message) -> &mut Self {
        self.push(Scripted::Raw(message))
    }

    /// Queue a raw chunk sequence for one streamed round.
    pub fn push_chunks(&mut self, chunks: Vec<StreamChunk>) -> &mut Self {
        self.push(Scripted::Chunks(chunks))
    }

    /// Queue a failure.
    pub fn push_error(&mut self, error: DriverError) -> &mut Self {
        self.push(Scripted::Fail(error))
    }

    /// Handle to the send counter; stays valid after the driver is boxed.
    pub fn send_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.sends)
    }

    fn push(&mut self, scripted: Scripted) -> &mut Self {
        self.script.lock().unwrap().push_back(scripted);
        self
    }

    fn pop_script(&self) -> Result<Scripted, DriverError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DriverError::NotConfigured("no scripted reply left".into()))
    }
}

#[async_trait]
impl LlmDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_message(
        &mut self,
        _messages: &[Message],
        _options: &RequestOptions,
    ) -> Result<Message, DriverError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        match self.pop_script()? {
            Scripted::Text { content, usage } => {
                let mut message = Message::assistant(content);
                if let Some(usage) = usage {
                    message.metadata.insert("usage".into(), json!(usage));
                }
                Ok(message)
            }
            Scripted::ToolCalls(calls) => {
                Message::tool_calls(calls).map_err(|e| DriverError::InvalidResponse(e.to_string()))
            }
            Scripted::Raw(message) => Ok(message),
            Scripted::Chunks(_) => Err(DriverError::InvalidResponse(
                "scripted chunk sequence reached a synchronous send".into(),
            )),
            Scripted::Fail(error) => Err(error),
        }
    }

    async fn send_message_streamed(
        &mut self,
        _messages: &[Message],
        _options: &RequestOptions,
    ) -> Result<MessageStream, DriverError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let chunks = match self.pop_script()? {
            Scripted::Chunks(chunks) => chunks,
            Scripted::Text { content, usage } => vec![
                StreamChunk::Content { delta: content },
                StreamChunk::Finish {
                    reason: FinishReason::Stop,
                },
                StreamChunk::Usage(usage.unwrap_or_default()),
            ],
            Scripted::ToolCalls(calls) => {
                let mut chunks: Vec<StreamChunk> = calls
                    .into_iter()
                    .enumerate()
                    .map(|(index, call)| StreamChunk::ToolCallDelta {
                        index: index as u32,
                        id: Some(call.id),
                        name: Some(call.name),
                        arguments: Some(call.arguments),
                    })
                    .collect();
                chunks.push(StreamChunk::Finish {
                    reason: FinishReason::ToolCalls,
                });
                chunks
            }
            Scripted::Raw(_) => {
                return Err(DriverError::InvalidResponse(
                    "a raw scripted reply cannot be streamed".into(),
                ));
            }
            Scripted::Fail(error) => return Err(error),
        };
        Ok(aggregate(stream::iter(chunks.into_iter().map(Ok))))
    }

    fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.register(tool);
    }

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name)
    }

    fn set_response_schema(&mut self, schema: serde_json::Value) {
        self.response_schema = Some(schema);
    }

    fn response_schema(&self) -> Option<&serde_json::Value> {
        self.response_schema.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::streaming::StreamedMessage;
    use futures::StreamExt;

    fn options() -> RequestOptions {
        RequestOptions {
            model: "mock-model".into(),
            max_completion_tokens: 100,
            temperature: 1.0,
            parallel_tool_calls: None,
            tool_choice: None,
        }
    }

    #[tokio::test]
    async fn scripted_replies_pop_in_order() {
        let mut driver = MockDriver::new();
        driver.push_text("first").push_text("second");

        let one = driver.send_message(&[], &options()).await.unwrap();
        let two = driver.send_message(&[], &options()).await.unwrap();
        assert_eq!(one.content.as_deref(), Some("first"));
        assert_eq!(two.content.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let mut driver = MockDriver::new();
        let err = driver.send_message(&[], &options()).await.unwrap_err();
        assert!(matches!(err, DriverError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn streamed_text_goes_through_the_aggregator() {
        let mut driver = MockDriver::new();
        driver.push_text("Sunny.");

        let stream = driver.send_message_streamed(&[], &options()).await.unwrap();
        let items: Vec<_> = stream.map(|item| item.unwrap()).collect().await;

        // One delta snapshot plus the final complete state.
        assert_eq!(items.len(), 2);
        match &items[1] {
            StreamedMessage::Assistant(snapshot) => {
                assert_eq!(snapshot.content, "Sunny.");
                assert!(snapshot.complete);
            }
            _ => panic!("expected assistant state"),
        }
    }

    #[tokio::test]
    async fn streamed_tool_calls_reassemble() {
        let mut driver = MockDriver::new();
        driver.push_tool_calls(vec![ToolCallRequest::new(
            "call_1",
            "get_weather",
            r#"{"location":"Boston"}"#,
        )]);

        let stream = driver.send_message_streamed(&[], &options()).await.unwrap();
        let items: Vec<_> = stream.map(|item| item.unwrap()).collect().await;

        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamedMessage::ToolCalls(message) => {
                assert_eq!(message.tool_calls[0].name, "get_weather");
            }
            _ => panic!("expected tool-call element"),
        }
    }

    #[tokio::test]
    async fn send_counter_covers_both_paths() {
        let mut driver = MockDriver::new();
        driver.push_text("a").push_text("b");
        let sends = driver.send_count();

        driver.send_message(&[], &options()).await.unwrap();
        driver
            .send_message_streamed(&[], &options())
            .await
            .unwrap();
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }
}
