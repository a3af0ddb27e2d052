//! JSON-file chat history, one file per chat key.
//!
//! Layout under the storage directory:
//! - `<chat_key>.json` holds one [`HistoryEnvelope`] per conversation
//! - `keys.json` is the registry of every chat key ever flushed
//!
//! Construction eagerly loads the existing file so a resumed conversation
//! continues where it left off. A missing file means a fresh conversation; a
//! corrupt file is logged and treated as fresh rather than failing the run.

use async_trait::async_trait;
use capstan_core::error::HistoryError;
use capstan_core::history::ChatHistory;
use capstan_core::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::window::prune_to_window;

const REGISTRY_FILE: &str = "keys.json";

/// On-disk representation of one conversation.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryEnvelope {
    chat_key: String,
    saved_at: DateTime<Utc>,
    messages: Vec<Message>,
}

/// A chat history persisted as pretty-printed JSON.
#[derive(Debug)]
pub struct JsonFileHistory {
    chat_key: String,
    storage_dir: PathBuf,
    messages: Vec<Message>,
    context_window: Option<usize>,
}

impl JsonFileHistory {
    /// Open (or start) the conversation `chat_key` under `storage_dir`.
    pub fn new(storage_dir: impl Into<PathBuf>, chat_key: impl Into<String>) -> Self {
        let storage_dir = storage_dir.into();
        let chat_key = chat_key.into();
        let messages = Self::load_from_disk(&storage_dir, &chat_key);
        Self {
            chat_key,
            storage_dir,
            messages,
            context_window: None,
        }
    }

    /// Cap the history at roughly `tokens` estimated tokens.
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Every chat key that has ever been flushed under `storage_dir`.
    ///
    /// A missing or corrupt registry reads as empty.
    pub fn load_keys(storage_dir: impl AsRef<Path>) -> Vec<String> {
        let path = storage_dir.as_ref().join(REGISTRY_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "chat key registry is corrupt, starting empty");
                Vec::new()
            }
        }
    }

    /// Delete this conversation's file and registry entry.
    ///
    /// The in-memory sequence is untouched; the next flush would recreate the
    /// file.
    pub fn remove_from_storage(&mut self) -> Result<(), HistoryError> {
        let path = self.file_path();
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                HistoryError::Storage(format!("failed to remove {}: {e}", path.display()))
            })?;
        }

        let mut keys = Self::load_keys(&self.storage_dir);
        let before = keys.len();
        keys.retain(|k| k != &self.chat_key);
        if keys.len() != before {
            self.write_registry(&keys)?;
        }
        Ok(())
    }

    fn file_path(&self) -> PathBuf {
        Self::path_for(&self.storage_dir, &self.chat_key)
    }

    fn path_for(storage_dir: &Path, chat_key: &str) -> PathBuf {
        storage_dir.join(format!("{}.json", file_stem(chat_key)))
    }

    fn registry_path(&self) -> PathBuf {
        self.storage_dir.join(REGISTRY_FILE)
    }

    fn load_from_disk(storage_dir: &Path, chat_key: &str) -> Vec<Message> {
        let path = Self::path_for(storage_dir, chat_key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<HistoryEnvelope>(&raw) {
            Ok(envelope) => envelope.messages,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "history file is corrupt, starting empty");
                Vec::new()
            }
        }
    }

    fn register_key(&self) -> Result<(), HistoryError> {
        let mut keys = Self::load_keys(&self.storage_dir);
        if !keys.iter().any(|k| k == &self.chat_key) {
            keys.push(self.chat_key.clone());
            self.write_registry(&keys)?;
        }
        Ok(())
    }

    fn write_registry(&self, keys: &[String]) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(keys)
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        std::fs::write(self.registry_path(), json).map_err(|e| {
            HistoryError::Storage(format!(
                "failed to write {}: {e}",
                self.registry_path().display()
            ))
        })
    }
}

#[async_trait]
impl ChatHistory for JsonFileHistory {
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
        std::fs::create_dir_all(&self.storage_dir).map_err(|e| {
            HistoryError::Storage(format!(
                "failed to create {}: {e}",
                self.storage_dir.display()
            ))
        })?;

        let envelope = HistoryEnvelope {
            chat_key: self.chat_key.clone(),
            saved_at: Utc::now(),
            messages: self.messages.clone(),
        };
        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|e| HistoryError::Storage(e.to_string()))?;

        // Write to a sibling temp file first so a crash mid-write cannot
        // leave a torn conversation file.
        let path = self.file_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| HistoryError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            HistoryError::Storage(format!("failed to replace {}: {e}", path.display()))
        })?;

        self.register_key()
    }

    fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Chat keys may embed separators; they must not escape the storage dir.
fn file_stem(chat_key: &str) -> String {
    chat_key
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
