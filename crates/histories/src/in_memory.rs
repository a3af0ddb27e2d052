//! In-memory chat history, useful for tests and ephemeral sessions.

use async_trait::async_trait;
use capstan_core::error::HistoryError;
use capstan_core::history::ChatHistory;
use capstan_core::message::Message;

use crate::window::prune_to_window;

/// A chat history that lives only for the process lifetime.
///
/// `write_to_memory` is a no-op: every mutation is already "stored". The
/// optional context window prunes oldest turns on append, keeping the
/// instruction head intact.
#[derive(Debug, Clone)]
pub struct InMemoryHistory {
    chat_key: String,
    messages: Vec<Message>,
    context_window: Option<usize>,
}

impl InMemoryHistory {
    pub fn new(chat_key: impl Into<String>) -> Self {
        Self {
            chat_key: chat_key.into(),
            messages: Vec::new(),
            context_window: None,
        }
    }

    /// Cap the history at roughly `tokens` estimated tokens.
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }
}

#[async_trait]
impl ChatHistory for InMemoryHistory {
    fn chat_key(&self) -> &str {
        &self.chat_key
    }

    fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        if let Some(window) = self.context_window {
            prune_to_window(&mut self.messages, window);
        }
    }

    fn messages(&self) -> &[Message] {
        &self.messages
    }

    async fn write_to_memory(&mut self) -> Result<(), HistoryError> {
        Ok(())
    }

    fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::message::Role;

    #[tokio::test]
    async fn appends_in_order() {
        let mut history = InMemoryHistory::new("chat-1");
        history.add_message(Message::user("first"));
        history.add_message(Message::assistant("second"));

        assert_eq!(history.count(), 2);
        assert_eq!(history.last_message().unwrap().content.as_deref(), Some("second"));
        assert_eq!(history.messages()[0].role, Role::User);
    }

    #[tokio::test]
    async fn flush_is_a_noop() {
        let mut history = InMemoryHistory::new("chat-1");
        history.add_message(Message::user("hello"));
        history.write_to_memory().await.unwrap();
        assert_eq!(history.count(), 1);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let mut history = InMemoryHistory::new("chat-1");
        history.add_message(Message::user("hello"));
        history.clear();
        assert_eq!(history.count(), 0);
        assert!(history.last_message().is_none());
    }

    #[tokio::test]
    async fn context_window_prunes_on_append() {
        let mut history = InMemoryHistory::new("chat-1").with_context_window(30);
        history.add_message(Message::system("s".repeat(40)));
        history.add_message(Message::user("u".repeat(80)));
        history.add_message(Message::assistant("a".repeat(80)));

        // 10 + 20 + 20 estimated tokens; the oldest user turn had to go.
        assert_eq!(history.count(), 2);
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(history.messages()[1].role, Role::Assistant);
    }
}
