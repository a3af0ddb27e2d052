//! The orchestration loop implementation.

use std::sync::Arc;

use async_stream::try_stream;
use capstan_config::AgentSettings;
use capstan_core::driver::{LlmDriver, RequestOptions, ToolChoice};
use capstan_core::error::{Error, Result};
use capstan_core::history::ChatHistory;
use capstan_core::hook::{HookFlow, Hooks};
use capstan_core::message::{Message, Role};
use capstan_core::streaming::StreamedMessage;
use capstan_core::tool::Tool;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, info, warn};

use crate::events::{AgentEvent, AgentOutput};

/// Instructions are re-anchored when the history count modulo the configured
/// period lands in `(0, REINJECTION_WINDOW]`. The window (rather than an
/// exact multiple) keeps reinjection from being skipped forever when several
/// messages land in one turn.
const REINJECTION_WINDOW: usize = 5;

/// Drives one logical user turn to completion, including any number of
/// tool-call round trips.
///
/// One instance serves one conversation: construct it with a driver and a
/// history, configure it with the `with_*` builders (or
/// [`apply_settings`](Self::apply_settings)), queue a user message, then call
/// [`run`](Self::run) or [`run_streamed`](Self::run_streamed). The instance
/// can be reused for the next turn of the same chat.
pub struct Orchestrator {
    /// The language-model backend
    driver: Box<dyn LlmDriver>,

    /// The conversation store
    history: Box<dyn ChatHistory>,

    /// Lifecycle observers
    hooks: Hooks,

    /// Tools registered with the driver every round
    tools: Vec<Arc<dyn Tool>>,

    /// Instructions injected when the conversation starts
    instructions: Option<String>,

    /// Inject instructions with the developer role instead of system
    use_developer_for_instructions: bool,

    /// Model identifier passed to the driver
    model: String,

    /// Estimated-token budget; handed to history backends by callers, the
    /// loop itself never prunes
    context_window_size: usize,

    /// Completion-token cap per round
    max_completion_tokens: u32,

    /// Sampling temperature
    temperature: f32,

    /// Re-anchor instructions every N stored messages; 0 disables
    reinject_instructions_per: usize,

    /// Forwarded to the driver only while tools are registered
    parallel_tool_calls: Option<bool>,

    /// How the model should pick among registered tools
    tool_choice: Option<ToolChoice>,

    /// JSON schema constraining the final response
    response_schema: Option<serde_json::Value>,

    /// The user message queued for the next run
    pending_message: Option<Message>,

    /// Streamed-run side channel, called once per yielded event
    on_event: Option<Arc<dyn Fn(&AgentEvent) + Send + Sync>>,
}

impl Orchestrator {
    pub fn new(driver: Box<dyn LlmDriver>, history: Box<dyn ChatHistory>) -> Self {
        Self {
            driver,
            history,
            hooks: Hooks::default(),
            tools: Vec::new(),
            instructions: None,
            use_developer_for_instructions: false,
            model: "gpt-4o-mini".into(),
            context_window_size: 50_000,
            max_completion_tokens: 1000,
            temperature: 1.0,
            reinject_instructions_per: 0,
            parallel_tool_calls: Some(true),
            tool_choice: None,
            response_schema: None,
            pending_message: None,
            on_event: None,
        }
    }

    // --- Configuration builders ---

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Use the developer role for injected instructions.
    pub fn with_developer_instructions(mut self, enabled: bool) -> Self {
        self.use_developer_for_instructions = enabled;
        self
    }

    pub fn with_context_window_size(mut self, tokens: usize) -> Self {
        self.context_window_size = tokens;
        self
    }

    pub fn with_max_completion_tokens(mut self, tokens: u32) -> Self {
        self.max_completion_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Re-anchor instructions every `period` stored messages; 0 disables.
    pub fn with_reinject_instructions_per(mut self, period: usize) -> Self {
        self.reinject_instructions_per = period;
        self
    }

    pub fn with_parallel_tool_calls(mut self, enabled: Option<bool>) -> Self {
        self.parallel_tool_calls = enabled;
        self
    }

    /// Let the model decide whether to call tools.
    pub fn tool_auto(mut self) -> Self {
        self.tool_choice = Some(ToolChoice::Auto);
        self
    }

    /// Forbid tool calls for this run.
    pub fn tool_none(mut self) -> Self {
        self.tool_choice = Some(ToolChoice::None);
        self
    }

    /// Require the model to call some tool.
    pub fn tool_required(mut self) -> Self {
        self.tool_choice = Some(ToolChoice::Required);
        self
    }

    /// Force the model to call one specific tool.
    pub fn force_tool(mut self, name: impl Into<String>) -> Self {
        self.tool_choice = Some(ToolChoice::Force(name.into()));
        self
    }

    /// Constrain the final response to a JSON schema; the run then returns a
    /// decoded object instead of a message.
    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Make a tool available to every subsequent run.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add a tool after construction.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.push(tool);
        self
    }

    /// Side channel for streamed runs, invoked once per yielded event.
    pub fn on_event(mut self, callback: impl Fn(&AgentEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(callback));
        self
    }

    /// Overwrite the conversation configuration from loaded settings.
    pub fn apply_settings(&mut self, settings: &AgentSettings) {
        self.model = settings.model.clone();
        self.instructions = settings.instructions.clone();
        self.use_developer_for_instructions = settings.use_developer_for_instructions;
        self.context_window_size = settings.context_window_size;
        self.max_completion_tokens = settings.max_completion_tokens;
        self.temperature = settings.temperature;
        self.reinject_instructions_per = settings.reinject_instructions_per as usize;
        self.parallel_tool_calls = settings.parallel_tool_calls;
        self.tool_choice = settings.tool_choice.clone();
        self.response_schema = settings.response_schema.clone();
    }

    // --- Hook registration ---

    pub fn on_before_reinjecting_instructions(
        mut self,
        observer: impl Fn(&dyn ChatHistory) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_before_reinjecting_instructions(observer);
        self
    }

    pub fn on_before_send(
        mut self,
        observer: impl Fn(&dyn ChatHistory, Option<&Message>) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_before_send(observer);
        self
    }

    pub fn on_before_response(
        mut self,
        observer: impl Fn(&dyn ChatHistory, Option<&Message>) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_before_response(observer);
        self
    }

    pub fn on_after_response(
        mut self,
        observer: impl Fn(&mut Message) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_after_response(observer);
        self
    }

    pub fn on_after_send(
        mut self,
        observer: impl Fn(&dyn ChatHistory, &Message) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_after_send(observer);
        self
    }

    pub fn on_before_save_history(
        mut self,
        observer: impl Fn(&dyn ChatHistory) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_before_save_history(observer);
        self
    }

    pub fn on_before_tool_execution(
        mut self,
        observer: impl Fn(&dyn Tool) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_before_tool_execution(observer);
        self
    }

    pub fn on_after_tool_execution(
        mut self,
        observer: impl Fn(&dyn Tool, &mut serde_json::Value) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_after_tool_execution(observer);
        self
    }

    pub fn on_before_structured_output(
        mut self,
        observer: impl Fn(&mut serde_json::Value) -> HookFlow + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_before_structured_output(observer);
        self
    }

    // --- Accessors ---

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn context_window_size(&self) -> usize {
        self.context_window_size
    }

    pub fn history(&self) -> &dyn ChatHistory {
        self.history.as_ref()
    }

    // --- Messages ---

    /// Queue a user message for the next run.
    pub fn message(&mut self, content: impl Into<String>) -> &mut Self {
        self.pending_message = Some(Message::user(content));
        self
    }

    /// Queue an arbitrary message for the next run.
    pub fn queue_message(&mut self, message: Message) -> &mut Self {
        self.pending_message = Some(message);
        self
    }

    // --- Execution ---

    /// Drive one logical turn to completion.
    ///
    /// Returns `Ok(None)` when a hook vetoed the run; fatal failures surface
    /// as `Err`. Tool-call turns loop back to the driver until it answers
    /// with text.
    pub async fn run(&mut self) -> Result<Option<AgentOutput>> {
        info!(chat_key = self.history.chat_key(), model = %self.model, "starting run");
        let mut round: usize = 0;

        loop {
            round += 1;
            debug!(round, "starting round");

            if self.prepare_round().is_veto() {
                return Ok(None);
            }

            let appended_user = match self.pending_message.take() {
                Some(message) => {
                    self.history.add_message(message);
                    true
                }
                None => false,
            };
            let verdict = {
                // The queued user message is already appended when the hook
                // observes it.
                let current = if appended_user {
                    self.history.last_message()
                } else {
                    None
                };
                self.hooks.run_before_response(self.history.as_ref(), current)
            };
            if verdict.is_veto() {
                return Ok(None);
            }

            let options = self.request_options();
            let mut response = self
                .driver
                .send_message(self.history.messages(), &options)
                .await?;
            if response.role != Role::Assistant {
                return Err(Error::UnexpectedDriverResult(format!(
                    "driver returned a non-assistant message (role {:?})",
                    response.role
                )));
            }

            // The after_response verdict only stops later observers; the
            // append below is not revocable.
            let _ = self.hooks.run_after_response(&mut response);
            let is_tool_call = response.is_tool_call();
            let response_snapshot = response.clone();
            self.history.add_message(response);

            if self
                .hooks
                .run_after_send(self.history.as_ref(), &response_snapshot)
                .is_veto()
            {
                debug!(round, "run stopped after send");
                return Ok(None);
            }

            if is_tool_call {
                self.execute_tool_round(&response_snapshot).await?;
                debug!(round, calls = response_snapshot.tool_calls.len(), "tool round complete");
                continue;
            }

            debug!(round, "final response received");
            return self.finalize(response_snapshot).await;
        }
    }

    /// Drive one logical turn as a lazy event stream.
    ///
    /// Side effects happen at the same points as [`run`](Self::run): the
    /// stream changes what is observable, never the state machine. A hook
    /// veto ends the stream without a terminal [`AgentEvent::Done`]. Nothing
    /// executes until the stream is first polled.
    pub fn run_streamed(&mut self) -> BoxStream<'_, Result<AgentEvent>> {
        Box::pin(try_stream! {
            info!(chat_key = self.history.chat_key(), model = %self.model, "starting streamed run");
            let mut round: usize = 0;

            'run: loop {
                round += 1;
                debug!(round, "starting streamed round");

                if self.prepare_round().is_veto() {
                    break 'run;
                }

                let appended_user = match self.pending_message.take() {
                    Some(message) => {
                        self.history.add_message(message);
                        true
                    }
                    None => false,
                };
                let verdict = {
                    let current = if appended_user {
                        self.history.last_message()
                    } else {
                        None
                    };
                    self.hooks.run_before_response(self.history.as_ref(), current)
                };
                if verdict.is_veto() {
                    break 'run;
                }

                let options = self.request_options();
                let mut stream = self
                    .driver
                    .send_message_streamed(self.history.messages(), &options)
                    .await?;

                let mut last_element: Option<StreamedMessage> = None;
                while let Some(item) = stream.next().await {
                    let item = item?;
                    let event = match &item {
                        StreamedMessage::Assistant(snapshot) => {
                            AgentEvent::Chunk(snapshot.clone())
                        }
                        StreamedMessage::ToolCalls(message) => {
                            AgentEvent::ToolCall(message.clone())
                        }
                    };
                    self.emit(&event);
                    yield event;
                    last_element = Some(item);
                }

                let mut response = match last_element {
                    Some(StreamedMessage::ToolCalls(message)) => message,
                    Some(StreamedMessage::Assistant(accumulator)) => accumulator.into_message(),
                    None => Err(Error::UnexpectedDriverResult(
                        "stream ended without producing an element".into(),
                    ))?,
                };

                let _ = self.hooks.run_after_response(&mut response);
                let is_tool_call = response.is_tool_call();
                let response_snapshot = response.clone();
                self.history.add_message(response);

                if self
                    .hooks
                    .run_after_send(self.history.as_ref(), &response_snapshot)
                    .is_veto()
                {
                    debug!(round, "streamed run stopped after send");
                    break 'run;
                }

                if is_tool_call {
                    self.execute_tool_round(&response_snapshot).await?;
                    debug!(round, "tool round complete");
                    continue 'run;
                }

                if let Some(output) = self.finalize(response_snapshot).await? {
                    let event = AgentEvent::Done(output);
                    self.emit(&event);
                    yield event;
                }
                break 'run;
            }
        })
    }

    // --- Phases ---

    /// PreparingTurn: instruction (re)injection, tool registration, schema
    /// arming, and the `before_send` gate. `Veto` aborts the whole turn.
    fn prepare_round(&mut self) -> HookFlow {
        if let Some(instructions) = self.instructions.clone() {
            if self.history.count() == 0 {
                self.inject_instructions(&instructions);
            } else if self.should_reinject() {
                if self
                    .hooks
                    .run_before_reinjecting_instructions(self.history.as_ref())
                    .is_veto()
                {
                    return HookFlow::Veto;
                }
                self.inject_instructions(&instructions);
            }
        }

        for tool in &self.tools {
            self.driver.register_tool(Arc::clone(tool));
        }
        if let Some(schema) = &self.response_schema {
            self.driver.set_response_schema(schema.clone());
        }

        self.hooks
            .run_before_send(self.history.as_ref(), self.pending_message.as_ref())
    }

    fn should_reinject(&self) -> bool {
        if self.reinject_instructions_per == 0 {
            return false;
        }
        let rem = self.history.count() % self.reinject_instructions_per;
        rem > 0 && rem <= REINJECTION_WINDOW
    }

    fn inject_instructions(&mut self, instructions: &str) {
        let message = if self.use_developer_for_instructions {
            Message::developer(instructions)
        } else {
            Message::system(instructions)
        };
        debug!(role = ?message.role, "injecting instructions");
        self.history.add_message(message);
    }

    /// Derive the per-round request configuration. Tool-related fields are
    /// populated only while tools are registered; unset values are omitted
    /// from the wire shape, never sent as an explicit null.
    fn request_options(&self) -> RequestOptions {
        let has_tools = !self.tools.is_empty();
        RequestOptions {
            model: self.model.clone(),
            max_completion_tokens: self.max_completion_tokens,
            temperature: self.temperature,
            parallel_tool_calls: if has_tools { self.parallel_tool_calls } else { None },
            tool_choice: if has_tools { self.tool_choice.clone() } else { None },
        }
    }

    /// Resolve and execute every call in a tool-call turn, appending one
    /// result message per executed call. Calls run in declaration order; a
    /// vetoed call is skipped without a result, a failed lookup or decode
    /// aborts the run (results of earlier calls stand).
    async fn execute_tool_round(&mut self, response: &Message) -> Result<()> {
        for call in &response.tool_calls {
            let Some(tool) = self.driver.tool(&call.name) else {
                return Err(Error::UnknownTool(call.name.clone()));
            };

            let arguments = call.arguments_value()?;

            if self.hooks.run_before_tool_execution(tool.as_ref()).is_veto() {
                debug!(tool = %call.name, id = %call.id, "tool call skipped");
                continue;
            }

            debug!(tool = %call.name, id = %call.id, "executing tool");
            let mut result = tool.execute(arguments.clone()).await?;

            if self
                .hooks
                .run_after_tool_execution(tool.as_ref(), &mut result)
                .is_veto()
            {
                debug!(tool = %call.name, id = %call.id, "tool result discarded");
                continue;
            }

            let content = tool_result_content(&arguments, &call.name, &result)?;
            self.history
                .add_message(Message::tool_result(call.id.clone(), content));
        }
        Ok(())
    }

    /// Finalizing: flush history, then decode structured output when a
    /// schema is active.
    async fn finalize(&mut self, response: Message) -> Result<Option<AgentOutput>> {
        if self
            .hooks
            .run_before_save_history(self.history.as_ref())
            .is_veto()
        {
            warn!(chat_key = self.history.chat_key(), "history flush skipped");
        } else {
            self.history.write_to_memory().await?;
        }

        if self.driver.structured_output_enabled() {
            let content = response.content.as_deref().unwrap_or_default();
            let mut value: serde_json::Value =
                serde_json::from_str(content).map_err(|e| Error::StructuredDecode(e.to_string()))?;
            if self.hooks.run_before_structured_output(&mut value).is_veto() {
                return Ok(None);
            }
            info!(chat_key = self.history.chat_key(), "run complete (structured)");
            return Ok(Some(AgentOutput::Structured(value)));
        }

        info!(chat_key = self.history.chat_key(), "run complete");
        Ok(Some(AgentOutput::Message(response)))
    }

    fn emit(&self, event: &AgentEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }
}

/// Tool results are stored as the call's arguments merged with a
/// `{tool_name: result}` entry, JSON-encoded, so the model sees what it
/// asked for next to what came back.
fn tool_result_content(
    arguments: &serde_json::Value,
    tool_name: &str,
    result: &serde_json::Value,
) -> Result<String> {
    let mut merged = match arguments {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    merged.insert(tool_name.to_string(), result.clone());
    Ok(serde_json::to_string(&serde_json::Value::Object(merged))?)
}
