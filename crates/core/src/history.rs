//! Chat history contract.
//!
//! History is an append-only, ordered sequence of messages identified by a
//! chat key. The loop appends turns as they happen and flushes once per
//! finalized run; everything else (storage medium, pruning policy, key
//! registries) belongs to the implementation.

use async_trait::async_trait;

use crate::error::HistoryError;
use crate::message::Message;

/// The storage boundary for one conversation.
///
/// `write_to_memory` is the only durable operation; mutation methods work on
/// the in-memory sequence. A flush failure is fatal to the run and is not
/// retried by the loop.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    /// The external identifier correlating this history to its conversation.
    fn chat_key(&self) -> &str;

    /// Append a message to the in-memory sequence.
    fn add_message(&mut self, message: Message);

    /// The full ordered sequence.
    fn messages(&self) -> &[Message];

    /// Number of stored messages.
    fn count(&self) -> usize {
        self.messages().len()
    }

    /// The most recently appended message, if any.
    fn last_message(&self) -> Option<&Message> {
        self.messages().last()
    }

    /// Flush the sequence to durable storage.
    async fn write_to_memory(&mut self) -> Result<(), HistoryError>;

    /// Drop every stored message. Durable storage is untouched until the next
    /// flush.
    fn clear(&mut self);
}
