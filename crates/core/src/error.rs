//! Error types for the Capstan domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! (driver, tool, history) has its own error enum; the orchestration-level
//! failures that have no single owner live directly on `Error`.
//!
//! Vetoes are not errors: a hook abandoning a phase surfaces as `Ok(None)`
//! (or an ended stream), never as a variant here.

use thiserror::Error;

/// The top-level error type for all Capstan operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Driver errors ---
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- History errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Orchestration errors ---
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Malformed arguments for tool '{tool_name}': {reason}")]
    MalformedArguments { tool_name: String, reason: String },

    #[error("Unexpected driver result: {0}")]
    UnexpectedDriverResult(String),

    #[error("Structured output decode failed: {0}")]
    StructuredDecode(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shorthand result used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Unexpected finish reason: {0}")]
    UnexpectedFinishReason(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid response payload: {0}")]
    InvalidResponse(String),

    #[error("Driver not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool execution failed in '{tool_name}': {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Property '{property}' does not exist on tool '{tool_name}'")]
    UndeclaredProperty { tool_name: String, property: String },
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Storage error: {0}")]
    Storage(String),
}
