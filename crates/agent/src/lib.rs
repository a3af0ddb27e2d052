//! # Capstan Agent
//!
//! The conversation engine: drives one logical user turn against a language
//! model, resolving tool calls and lifecycle hooks along the way.
//!
//! A turn is a cycle:
//!
//! 1. Prepare: inject or re-anchor instructions, register tools, arm the
//!    response schema, let `before_send` gate the round.
//! 2. Send: append the queued user message and hand the full history to the
//!    driver, either synchronously or as a chunk stream.
//! 3. Resolve: if the model answered with tool calls, execute them, append
//!    the results, and go back to 2.
//! 4. Finalize: flush the history and return the final message, or the
//!    schema-decoded value when structured output is active.
//!
//! Hooks observe every phase and can veto it; a veto ends the run quietly
//! (`Ok(None)` or an ended stream), never with an error.

pub mod events;
pub mod mock;
pub mod orchestrator;

pub use events::{AgentEvent, AgentOutput};
pub use mock::MockDriver;
pub use orchestrator::Orchestrator;
