//! # Capstan Core
//!
//! Domain types, traits, and error definitions for the Capstan agent engine.
//! This crate defines the vocabulary every other crate implements against:
//! messages and roles, the driver and history contracts, tool definitions,
//! lifecycle hooks, and streaming aggregation.
//!
//! The collaborators (driver, history, tool) are traits here; concrete
//! backends live in sibling crates and depend inward on core. Scripted test
//! doubles drop in behind the same traits, so the orchestration loop never
//! learns which implementation it is driving.

pub mod driver;
pub mod error;
pub mod history;
pub mod hook;
pub mod message;
pub mod streaming;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use driver::{LlmDriver, MessageStream, RequestOptions, ToolChoice, ToolDefinition, Usage};
pub use error::{DriverError, Error, HistoryError, Result, ToolError};
pub use history::ChatHistory;
pub use hook::{HookFlow, Hooks};
pub use message::{Message, Role, StreamedAssistantMessage, ToolCallRequest};
pub use streaming::{FinishReason, StreamChunk, StreamedMessage, aggregate};
pub use tool::{FunctionTool, Tool, ToolProperty, ToolRegistry};
