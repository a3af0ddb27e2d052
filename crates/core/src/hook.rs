//! Hook registry: named extension points around every loop phase.
//!
//! Each point holds an ordered list of observers registered in call order.
//! Observers return a [`HookFlow`]; the first `Veto` stops the remaining
//! observers for that invocation and tells the loop to abandon the current
//! phase silently. Mutation points (`after_tool_execution`,
//! `before_structured_output`, `after_response`) hand the observer a mutable
//! reference, and the rewritten value is what every downstream consumer sees.

use crate::history::ChatHistory;
use crate::message::Message;
use crate::tool::Tool;

/// Verdict returned by a hook observer.
///
/// Anything an observer wants short of stopping the phase is `Continue`;
/// `Veto` is the explicit stop signal and is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookFlow {
    #[default]
    Continue,
    Veto,
}

impl HookFlow {
    pub fn is_veto(self) -> bool {
        matches!(self, Self::Veto)
    }
}

/// Observer over the history alone (`before_reinjecting_instructions`,
/// `before_save_history`).
pub type HistoryObserver = Box<dyn Fn(&dyn ChatHistory) -> HookFlow + Send + Sync>;

/// Observer over the history plus the pending user message (`before_send`,
/// `before_response`).
pub type SendObserver = Box<dyn Fn(&dyn ChatHistory, Option<&Message>) -> HookFlow + Send + Sync>;

/// Observer with mutable access to the just-received response
/// (`after_response`).
pub type ResponseObserver = Box<dyn Fn(&mut Message) -> HookFlow + Send + Sync>;

/// Observer over the history plus the appended response (`after_send`).
pub type ExchangeObserver = Box<dyn Fn(&dyn ChatHistory, &Message) -> HookFlow + Send + Sync>;

/// Observer over a tool about to run (`before_tool_execution`).
pub type ToolObserver = Box<dyn Fn(&dyn Tool) -> HookFlow + Send + Sync>;

/// Observer with mutable access to a tool's return value
/// (`after_tool_execution`).
pub type ToolResultObserver =
    Box<dyn Fn(&dyn Tool, &mut serde_json::Value) -> HookFlow + Send + Sync>;

/// Observer with mutable access to the decoded structured output
/// (`before_structured_output`).
pub type ValueObserver = Box<dyn Fn(&mut serde_json::Value) -> HookFlow + Send + Sync>;

/// The nine named hook points of the orchestration loop.
#[derive(Default)]
pub struct Hooks {
    before_reinjecting_instructions: Vec<HistoryObserver>,
    before_send: Vec<SendObserver>,
    before_response: Vec<SendObserver>,
    after_response: Vec<ResponseObserver>,
    after_send: Vec<ExchangeObserver>,
    before_save_history: Vec<HistoryObserver>,
    before_tool_execution: Vec<ToolObserver>,
    after_tool_execution: Vec<ToolResultObserver>,
    before_structured_output: Vec<ValueObserver>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Registration (call order is invocation order) ---

    pub fn on_before_reinjecting_instructions(
        &mut self,
        observer: impl Fn(&dyn ChatHistory) -> HookFlow + Send + Sync + 'static,
    ) {
        self.before_reinjecting_instructions.push(Box::new(observer));
    }

    pub fn on_before_send(
        &mut self,
        observer: impl Fn(&dyn ChatHistory, Option<&Message>) -> HookFlow + Send + Sync + 'static,
    ) {
        self.before_send.push(Box::new(observer));
    }

    pub fn on_before_response(
        &mut self,
        observer: impl Fn(&dyn ChatHistory, Option<&Message>) -> HookFlow + Send + Sync + 'static,
    ) {
        self.before_response.push(Box::new(observer));
    }

    pub fn on_after_response(
        &mut self,
        observer: impl Fn(&mut Message) -> HookFlow + Send + Sync + 'static,
    ) {
        self.after_response.push(Box::new(observer));
    }

    pub fn on_after_send(
        &mut self,
        observer: impl Fn(&dyn ChatHistory, &Message) -> HookFlow + Send + Sync + 'static,
    ) {
        self.after_send.push(Box::new(observer));
    }

    pub fn on_before_save_history(
        &mut self,
        observer: impl Fn(&dyn ChatHistory) -> HookFlow + Send + Sync + 'static,
    ) {
        self.before_save_history.push(Box::new(observer));
    }

    pub fn on_before_tool_execution(
        &mut self,
        observer: impl Fn(&dyn Tool) -> HookFlow + Send + Sync + 'static,
    ) {
        self.before_tool_execution.push(Box::new(observer));
    }

    pub fn on_after_tool_execution(
        &mut self,
        observer: impl Fn(&dyn Tool, &mut serde_json::Value) -> HookFlow + Send + Sync + 'static,
    ) {
        self.after_tool_execution.push(Box::new(observer));
    }

    pub fn on_before_structured_output(
        &mut self,
        observer: impl Fn(&mut serde_json::Value) -> HookFlow + Send + Sync + 'static,
    ) {
        self.before_structured_output.push(Box::new(observer));
    }

    // --- Invocation (strict registration order, first veto wins) ---

    pub fn run_before_reinjecting_instructions(&self, history: &dyn ChatHistory) -> HookFlow {
        for observer in &self.before_reinjecting_instructions {
            if observer(history).is_veto() {
                tracing::debug!(hook = "before_reinjecting_instructions", "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_before_send(&self, history: &dyn ChatHistory, message: Option<&Message>) -> HookFlow {
        for observer in &self.before_send {
            if observer(history, message).is_veto() {
                tracing::debug!(hook = "before_send", "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_before_response(
        &self,
        history: &dyn ChatHistory,
        message: Option<&Message>,
    ) -> HookFlow {
        for observer in &self.before_response {
            if observer(history, message).is_veto() {
                tracing::debug!(hook = "before_response", "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_after_response(&self, response: &mut Message) -> HookFlow {
        for observer in &self.after_response {
            if observer(response).is_veto() {
                tracing::debug!(hook = "after_response", "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_after_send(&self, history: &dyn ChatHistory, response: &Message) -> HookFlow {
        for observer in &self.after_send {
            if observer(history, response).is_veto() {
                tracing::debug!(hook = "after_send", "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_before_save_history(&self, history: &dyn ChatHistory) -> HookFlow {
        for observer in &self.before_save_history {
            if observer(history).is_veto() {
                tracing::debug!(hook = "before_save_history", "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_before_tool_execution(&self, tool: &dyn Tool) -> HookFlow {
        for observer in &self.before_tool_execution {
            if observer(tool).is_veto() {
                tracing::debug!(hook = "before_tool_execution", tool = tool.name(), "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_after_tool_execution(
        &self,
        tool: &dyn Tool,
        result: &mut serde_json::Value,
    ) -> HookFlow {
        for observer in &self.after_tool_execution {
            if observer(tool, result).is_veto() {
                tracing::debug!(hook = "after_tool_execution", tool = tool.name(), "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }

    pub fn run_before_structured_output(&self, value: &mut serde_json::Value) -> HookFlow {
        for observer in &self.before_structured_output {
            if observer(value).is_veto() {
                tracing::debug!(hook = "before_structured_output", "phase vetoed");
                return HookFlow::Veto;
            }
        }
        HookFlow::Continue
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before_reinjecting_instructions", &self.before_reinjecting_instructions.len())
            .field("before_send", &self.before_send.len())
            .field("before_response", &self.before_response.len())
            .field("after_response", &self.after_response.len())
            .field("after_send", &self.after_send.len())
            .field("before_save_history", &self.before_save_history.len())
            .field("before_tool_execution", &self.before_tool_execution.len())
            .field("after_tool_execution", &self.after_tool_execution.len())
            .field("before_structured_output", &self.before_structured_output.len())
            .finish()
    }
}
