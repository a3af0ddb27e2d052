//! Streaming delta aggregation.
//!
//! Chunk-based backends deliver a round as an interleaved sequence of raw
//! records: content deltas, tool-call fragments, a finish-reason marker, and
//! a terminal usage record. [`aggregate`] turns that sequence into the lazy
//! stream drivers must expose: every content delta yields a fresh snapshot of
//! the one accumulator for the round, and completed tool calls are
//! reassembled into a single tool-call turn yielded last.
//!
//! The sequence is single-pass and non-restartable; exhausting the input is
//! the only way it ends.

use async_stream::try_stream;
use futures::StreamExt;
use futures::pin_mut;
use futures::stream::BoxStream;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::driver::Usage;
use crate::error::{DriverError, Result};
use crate::message::{Message, StreamedAssistantMessage, ToolCallRequest};

/// Why the backend stopped producing output for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of a text turn
    Stop,
    /// The model is requesting tool invocations
    ToolCalls,
    /// Anything else the backend reports (length, content filter, ...)
    Other(String),
}

/// One raw record from a chunk-based backend.
///
/// The variants are mutually exclusive per delta; backends that pack several
/// facts into one network frame split them into separate records.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// A fragment of assistant text
    Content { delta: String },

    /// A fragment of one tool call, addressed by position
    ToolCallDelta {
        /// Positional index of the call this fragment belongs to; fragments
        /// for concurrent calls interleave and may carry nothing else
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },

    /// The backend's finish-reason marker
    Finish { reason: FinishReason },

    /// Terminal token accounting; designated end-of-stream signal
    Usage(Usage),
}

/// One aggregated value of a streamed round.
#[derive(Debug, Clone)]
pub enum StreamedMessage {
    /// Snapshot of the accumulator after a content delta (or its final,
    /// complete state once usage arrived)
    Assistant(StreamedAssistantMessage),

    /// The reassembled tool-call turn, always the last element of its round
    ToolCalls(Message),
}

/// In-progress reconstruction of one tool call.
#[derive(Debug, Clone, Default)]
struct ToolCallDraft {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallDraft {
    /// A draft is a complete call once its name is known and the accumulated
    /// arguments close and parse as JSON.
    fn is_complete_call(&self) -> bool {
        !self.name.is_empty()
            && self.arguments.contains('}')
            && serde_json::from_str::<serde_json::Value>(&self.arguments).is_ok()
    }
}

fn generated_call_id() -> String {
    format!("tool_call_{}", Uuid::new_v4().simple())
}

/// Aggregate raw chunk records into the per-round message stream.
///
/// Per-record behavior:
/// - content deltas append to the round's single accumulator, which is
///   yielded after every append (at-least-once visibility of every byte, in
///   arrival order);
/// - tool-call fragments merge into a draft keyed by their index: `id` and
///   `name` overwrite when present and non-empty, `arguments` concatenate;
///   the first time a draft's arguments close and parse it moves into the
///   completed set (keyed by id, or `index_<n>` when no id ever arrived) and
///   the draft's argument buffer resets, so a later call may reuse the index;
/// - the usage record completes the accumulator, yields it one final time,
///   and ends draining;
/// - after exhaustion, completed calls are reassembled into one tool-call
///   turn iff the last finish reason was the tool-call reason; calls that
///   never completed are dropped with a warning, never executed.
pub fn aggregate<S>(chunks: S) -> BoxStream<'static, Result<StreamedMessage>>
where
    S: futures::Stream<Item = std::result::Result<StreamChunk, DriverError>> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut accumulator = StreamedAssistantMessage::new();
        let mut drafts: HashMap<u32, ToolCallDraft> = HashMap::new();
        let mut completed: Vec<(String, ToolCallDraft)> = Vec::new();
        let mut finish_reason: Option<FinishReason> = None;

        pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            match chunk? {
                StreamChunk::Content { delta } => {
                    accumulator.append_chunk(&delta);
                    yield StreamedMessage::Assistant(accumulator.clone());
                }
                StreamChunk::ToolCallDelta { index, id, name, arguments } => {
                    let draft = drafts.entry(index).or_default();
                    if let Some(id) = id.filter(|v| !v.is_empty()) {
                        draft.id = Some(id);
                    }
                    if let Some(name) = name.filter(|v| !v.is_empty()) {
                        draft.name = name;
                    }
                    if let Some(fragment) = arguments {
                        draft.arguments.push_str(&fragment);
                    }
                    if draft.is_complete_call() {
                        let key = draft
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("index_{index}"));
                        let snapshot = draft.clone();
                        match completed.iter_mut().find(|(k, _)| *k == key) {
                            Some((_, existing)) => *existing = snapshot,
                            None => completed.push((key, snapshot)),
                        }
                        draft.arguments.clear();
                    }
                }
                StreamChunk::Finish { reason } => {
                    finish_reason = Some(reason);
                }
                StreamChunk::Usage(usage) => {
                    accumulator.set_usage(usage);
                    accumulator.set_complete();
                    yield StreamedMessage::Assistant(accumulator.clone());
                    break;
                }
            }
        }

        let incomplete = drafts.values().filter(|d| !d.arguments.is_empty()).count();
        if incomplete > 0 {
            warn!(count = incomplete, "dropping tool calls whose arguments never completed");
        }

        if !completed.is_empty() && finish_reason == Some(FinishReason::ToolCalls) {
            let calls: Vec<ToolCallRequest> = completed
                .into_iter()
                .map(|(_, draft)| ToolCallRequest {
                    id: draft.id.unwrap_or_else(generated_call_id),
                    name: draft.name,
                    arguments: draft.arguments,
                })
                .collect();
            let mut message = Message::tool_calls(calls)?;
            if let Some(usage) = accumulator.usage {
                message.metadata.insert("usage".into(), serde_json::json!(usage));
            }
            yield StreamedMessage::ToolCalls(message);
        }
    })
}
