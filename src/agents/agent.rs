//! The orchestrating agent: tool-calling chat loop, triage, decomposition,
//! and sequential task execution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::decompose::{decomposition_prompt, is_affirmative, parse_subtasks, triage_prompt};
use super::types::{AgentError, AgentId};
use crate::config::ConfigError;
use crate::llm::{ChatOptions, ChatResponse, Provider, Role, ToolCallRequest};
use crate::memory::{Memory, Message, MessageId, MessageMeta};
use crate::task::{self, SharedTaskManager, TaskId, TaskManager, TaskRunner, TaskStatus, TaskSummary};
use crate::tools::{InvalidArguments, ToolExecutionContext, ToolSet};

/// Default cap on provider rounds within one tool-calling turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

/// Per-call options for [`Agent::chat_with`].
#[derive(Debug, Clone)]
pub struct Turn {
    /// Record the exchange in the memory ledger. When false the turn runs
    /// against a copy of the transcript and leaves the ledger untouched.
    pub add_to_memory: bool,
    /// Tag recorded messages with this task.
    pub task_id: Option<TaskId>,
    pub options: ChatOptions,
}

impl Default for Turn {
    fn default() -> Self {
        Self {
            add_to_memory: true,
            task_id: None,
            options: ChatOptions::default(),
        }
    }
}

impl Turn {
    /// A read-only turn.
    pub fn probe() -> Self {
        Self {
            add_to_memory: false,
            ..Self::default()
        }
    }

    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

/// Where a turn's messages go: the ledger, or a private copy of it.
enum Transcript<'a> {
    Ledger {
        memory: &'a mut Memory,
        task_id: Option<TaskId>,
    },
    Probe(Vec<Message>),
}

impl Transcript<'_> {
    fn messages(&self) -> &[Message] {
        match self {
            Transcript::Ledger { memory, .. } => memory.get_messages(),
            Transcript::Probe(messages) => messages,
        }
    }

    fn push_probe(messages: &mut Vec<Message>, mut message: Message) {
        // Probe messages never reach the ledger, so their ids only need to
        // be distinct from each other.
        message.id = MessageId::from_raw(u64::MAX - messages.len() as u64);
        messages.push(message);
    }

    fn record_reply(&mut self, response: &ChatResponse) {
        match self {
            Transcript::Ledger { memory, task_id } => {
                memory.add_response_message(Role::Assistant, response, None, *task_id);
            }
            Transcript::Probe(messages) => {
                let mut reply = Message::new(MessageId::from_raw(0), Role::Assistant, &response.message);
                reply.tool_calls = response.function_calls.clone();
                Self::push_probe(messages, reply);
            }
        }
    }

    fn record_tool_result(&mut self, call_id: &str, content: String) {
        match self {
            Transcript::Ledger { memory, task_id } => {
                memory.add_message_with(
                    Role::Tool,
                    content,
                    MessageMeta {
                        tool_call_id: Some(call_id.to_string()),
                        task_id: *task_id,
                        ..MessageMeta::default()
                    },
                );
            }
            Transcript::Probe(messages) => {
                let mut result = Message::new(MessageId::from_raw(0), Role::Tool, content);
                result.tool_call_id = Some(call_id.to_string());
                Self::push_probe(messages, result);
            }
        }
    }
}

/// Resolve and run one model-issued tool call.
///
/// Unknown tools, malformed JSON and invalid arguments become readable
/// results. Any other tool failure is an error.
async fn dispatch_tool_call(
    tools: &ToolSet,
    ctx: &ToolExecutionContext,
    call: &ToolCallRequest,
) -> Result<String, AgentError> {
    let name = call.function_name();
    tracing::debug!(tool = name, call_id = %call.id, "Dispatching tool call");

    let raw = call.arguments_json().trim();
    let args: Value = if raw.is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(raw) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool = name, "Invalid tool arguments: {}", e);
                return Ok(format!("Error: invalid JSON arguments for {}: {}", name, e));
            }
        }
    };

    let Some(tool) = tools.get(name) else {
        tracing::warn!(tool = name, call_id = %call.id, "Tool not found");
        return Ok(format!("Error: Tool '{}' not found", name));
    };

    match tool.execute(args, ctx).await {
        Ok(output) => Ok(output),
        Err(e) if e.downcast_ref::<InvalidArguments>().is_some() => Ok(e.to_string()),
        Err(e) => {
            tracing::error!(tool = name, "Tool failed: {:#}", e);
            Err(AgentError::Tool(format!("{}: {:#}", name, e)))
        }
    }
}

/// An LLM-backed agent with memory, a task tree, and a bound tool set.
pub struct Agent {
    id: AgentId,
    name: Option<String>,
    description: Option<String>,
    provider: Arc<dyn Provider>,
    memory: Memory,
    tasks: SharedTaskManager,
    tools: ToolSet,
    context: ToolExecutionContext,
    max_tool_rounds: usize,
}

impl Agent {
    /// Create an agent whose ledger is priced for the provider's model.
    ///
    /// # Errors
    /// `AgentError::Config` when the provider/model pair has no pricing.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: ToolSet,
        settings: HashMap<String, String>,
    ) -> Result<Self, AgentError> {
        let memory = Memory::new(provider.kind().as_str(), provider.model())
            .map_err(ConfigError::from)?;
        Ok(Self::with_memory(provider, memory, tools, settings))
    }

    /// Create an agent around an already configured ledger.
    pub fn with_memory(
        provider: Arc<dyn Provider>,
        memory: Memory,
        tools: ToolSet,
        settings: HashMap<String, String>,
    ) -> Self {
        let id = AgentId::new();
        let tasks = TaskManager::new().shared();
        let context = ToolExecutionContext::new(settings)
            .with_agent_id(id.to_string())
            .with_task_manager(Arc::clone(&tasks));

        tracing::debug!(
            agent_id = %id,
            provider = %provider.kind(),
            model = provider.model(),
            tools = ?tools.names(),
            "Created agent"
        );

        Self {
            id,
            name: None,
            description: None,
            provider,
            memory,
            tasks,
            tools,
            context,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        if !prompt.is_empty() {
            self.memory.set_system_prompt(prompt);
        }
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn task_manager(&self) -> &SharedTaskManager {
        &self.tasks
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn context(&self) -> &ToolExecutionContext {
        &self.context
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.max_tool_rounds
    }

    /// Total dollars spent by this agent so far.
    pub fn total_cost(&self) -> f64 {
        self.memory.get_total_cost()
    }

    // ------------------------------------------------------------------
    // Conversation
    // ------------------------------------------------------------------

    /// Send a user message and return the final assistant reply.
    pub async fn chat(&mut self, user_message: &str) -> Result<String, AgentError> {
        self.chat_with(user_message, Turn::default()).await
    }

    /// Run one conversational turn, including any tool-calling rounds.
    ///
    /// With tools bound and supported, the provider is called repeatedly
    /// until it answers without tool calls, up to `max_tool_rounds` times.
    ///
    /// # Errors
    /// - `Provider` when a provider call fails
    /// - `Tool` when a tool fails unexpectedly
    /// - `MaxToolRounds` when the model keeps requesting tools
    pub async fn chat_with(&mut self, user_message: &str, turn: Turn) -> Result<String, AgentError> {
        let mut transcript = if turn.add_to_memory {
            self.memory.add_message_with(
                Role::User,
                user_message,
                MessageMeta::for_task(turn.task_id),
            );
            Transcript::Ledger {
                memory: &mut self.memory,
                task_id: turn.task_id,
            }
        } else {
            let mut copy = self.memory.get_messages().to_vec();
            Transcript::push_probe(
                &mut copy,
                Message::new(MessageId::from_raw(0), Role::User, user_message),
            );
            Transcript::Probe(copy)
        };

        if self.tools.is_empty() || !self.provider.supports_tools() {
            let response = self
                .provider
                .chat(transcript.messages(), &turn.options)
                .await
                .map_err(AgentError::provider)?;
            transcript.record_reply(&response);
            return Ok(response.message);
        }

        let declarations = self.provider.get_tools_format(&self.tools);
        for round in 1..=self.max_tool_rounds {
            let response = self
                .provider
                .chat_with_tools(transcript.messages(), &declarations, &turn.options)
                .await
                .map_err(AgentError::provider)?;
            transcript.record_reply(&response);

            if !response.has_function_calls() {
                return Ok(response.message);
            }

            tracing::debug!(
                round,
                calls = response.function_calls.len(),
                "Model requested tool calls"
            );
            for call in &response.function_calls {
                let result = dispatch_tool_call(&self.tools, &self.context, call).await?;
                transcript.record_tool_result(&call.id, result);
            }
        }

        tracing::warn!(rounds = self.max_tool_rounds, "Tool loop did not converge");
        Err(AgentError::MaxToolRounds(self.max_tool_rounds))
    }

    /// Send a prompt whose exchange must not stay in the transcript.
    ///
    /// The prompt rides on a copy of the history, so it can never evict a
    /// durable message. The usage of the round is still billed.
    async fn scratch_round(&mut self, prompt: String) -> Result<String, AgentError> {
        let mut history = self.memory.get_messages().to_vec();
        Transcript::push_probe(
            &mut history,
            Message::new(MessageId::from_raw(0), Role::User, prompt),
        );
        let response = self
            .provider
            .chat(&history, &ChatOptions::default())
            .await
            .map_err(AgentError::provider)?;
        tracing::debug!(messages = history.len(), "Scratch round finished");

        self.memory.record_usage(&response);
        Ok(response.message)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn add_task(&self, description: &str) -> TaskId {
        self.tasks.lock().await.add_task(description)
    }

    pub async fn add_complex_task<S: AsRef<str>>(
        &self,
        description: &str,
        subtasks: &[S],
    ) -> TaskId {
        self.tasks.lock().await.add_complex_task(description, subtasks)
    }

    /// Root task descriptions grouped by status.
    pub async fn get_tasks(&self) -> TaskSummary {
        self.tasks.lock().await.summary()
    }

    /// Move a task to `status` (`pending`, `in_progress`, `completed`, `failed`).
    pub async fn update_task(
        &self,
        task_id: TaskId,
        status: &str,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), AgentError> {
        let status: TaskStatus = status.to_ascii_lowercase().parse()?;
        Ok(self
            .tasks
            .lock()
            .await
            .update_task_status(task_id, status, result, error)?)
    }

    /// Ask the model to split a task into steps and record the result.
    ///
    /// Falls back to a single flat task when no steps can be parsed.
    pub async fn decompose_task(&mut self, task_description: &str) -> Result<TaskId, AgentError> {
        let reply = self
            .scratch_round(decomposition_prompt(task_description))
            .await?;
        let subtasks = parse_subtasks(&reply);

        let mut tasks = self.tasks.lock().await;
        if subtasks.is_empty() {
            tracing::info!("Decomposition produced no steps; creating a single task");
            Ok(tasks.add_task(task_description))
        } else {
            tracing::info!(steps = subtasks.len(), "Decomposed task");
            Ok(tasks.add_complex_task(task_description, &subtasks))
        }
    }

    /// Execute a task and its pending subtasks in order.
    ///
    /// Returns `Ok(None)` for an unknown task id.
    pub async fn execute_task_sequentially(
        &mut self,
        task_id: TaskId,
    ) -> Result<Option<String>, AgentError> {
        let manager = Arc::clone(&self.tasks);
        let outcome = task::execute_task_sequentially(&manager, self, task_id).await;
        self.context.set_current_task(None);

        outcome.map_err(|e| match e.downcast::<AgentError>() {
            Ok(inner) => inner,
            Err(other) => AgentError::Execution(format!("{:#}", other)),
        })
    }

    /// Triage a query, then either decompose and execute it or just chat.
    pub async fn handle_complex_query(&mut self, query: &str) -> Result<String, AgentError> {
        let verdict = self.scratch_round(triage_prompt(query)).await?;

        if !is_affirmative(&verdict) {
            tracing::debug!("Triage selected a direct answer");
            return self.chat(query).await;
        }

        tracing::info!("Triage selected decomposition");
        let task_id = self.decompose_task(query).await?;
        let result = self.execute_task_sequentially(task_id).await?;

        let summary = format!(
            "Complex task completed. Results: {}",
            result.as_deref().unwrap_or("None")
        );
        self.memory.add_message_with(
            Role::Assistant,
            summary.as_str(),
            MessageMeta::for_task(Some(task_id)),
        );
        Ok(summary)
    }
}

#[async_trait]
impl TaskRunner for Agent {
    async fn run_task(&mut self, task_id: TaskId, prompt: String) -> anyhow::Result<String> {
        self.context.set_current_task(Some(task_id));
        Ok(self.chat_with(&prompt, Turn::for_task(task_id)).await?)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider.kind())
            .field("model", &self.provider.model())
            .field("tools", &self.tools)
            .field("messages", &self.memory.len())
            .finish()
    }
}
