//! Memory ledger: the ordered transcript sent to the provider.
//!
//! The ledger bounds the transcript by message count and by an estimated
//! token budget, and tracks the provider-reported usage that drives cost.
//!
//! # Token bookkeeping
//!
//! Two totals are kept and they are deliberately not the same thing:
//!
//! - `input_tokens_total`: running size of the context. Each added message
//!   adds its *estimate*. When a provider response arrives the total is reset
//!   to the *actual* input tokens the provider reported. Eviction subtracts the
//!   evicted message's *actual* `input_tokens` (0 if never finalized).
//! - `total_input_tokens` / `total_output_tokens`: cumulative billed usage,
//!   advanced only by provider responses. Cost is computed from these.
//!
//! Messages are addressed by [`MessageId`], so a scratch prompt can be
//! released after use without relying on positional or identity removal.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{ChatResponse, Role, ToolCallRequest};
use crate::pricing::{self, ModelInfo, PricingError};
use crate::task::TaskId;

/// Default cap on the number of messages kept in the transcript.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Stable handle for a message in one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Calls issued by the assistant in this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// For `Role::Tool`: the call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Marginal input tokens reported by the provider; signed because the
    /// marginal formula can dip below zero once earlier rounds are billed.
    pub input_tokens: i64,
    pub output_tokens: u64,
    /// Pre-send estimate
    pub input_tokens_estimate: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            input_tokens: 0,
            output_tokens: 0,
            input_tokens_estimate: 0,
            task_id: None,
        }
    }
}

/// Optional fields for [`Memory::add_message_with`].
#[derive(Debug, Clone, Default)]
pub struct MessageMeta {
    pub tool_calls: Vec<ToolCallRequest>,
    pub tool_call_id: Option<String>,
    pub task_id: Option<TaskId>,
}

impl MessageMeta {
    pub fn for_task(task_id: Option<TaskId>) -> Self {
        Self {
            task_id,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
#[error("tokenizer failed: {0}")]
pub struct TokenizerError(pub String);

/// Counts tokens for a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> Result<u64, TokenizerError>;
}

/// Content-aware character heuristic.
///
/// JSON packs more tokens per character than code, code more than prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl HeuristicTokenizer {
    fn chars_per_token(text: &str) -> f64 {
        let trimmed = text.trim_start();
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
        {
            2.5
        } else if looks_like_code(text) {
            3.0
        } else {
            3.5
        }
    }
}

fn looks_like_code(text: &str) -> bool {
    const MARKERS: &[&str] = &["fn ", "def ", "class ", "import ", "```", "=>", "};", "#include"];
    MARKERS.iter().filter(|m| text.contains(*m)).count() >= 2
}

impl TokenCounter for HeuristicTokenizer {
    fn count_tokens(&self, text: &str) -> Result<u64, TokenizerError> {
        let chars = text.chars().count();
        if chars == 0 {
            return Ok(0);
        }
        Ok((chars as f64 / Self::chars_per_token(text)).ceil() as u64)
    }
}

/// Fallback estimate: `round(words * 1.3)`.
pub fn word_estimate(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * 1.3).round() as u64
}

/// The conversation ledger owned by one agent.
pub struct Memory {
    messages: Vec<Message>,
    next_id: u64,
    provider: String,
    model: String,
    model_info: ModelInfo,
    max_messages: usize,
    tokenizer: Option<Arc<dyn TokenCounter>>,
    input_tokens_total: i64,
    total_input_tokens: u64,
    total_output_tokens: u64,
}

impl Memory {
    /// Create a ledger for `provider`/`model`.
    ///
    /// # Errors
    /// Fails immediately if the pair is not in the pricing table.
    pub fn new(provider: &str, model: &str) -> Result<Self, PricingError> {
        let model_info = pricing::get_model_info(provider, model)?;
        Ok(Self {
            messages: Vec::new(),
            next_id: 0,
            provider: provider.to_string(),
            model: model.to_string(),
            model_info,
            max_messages: DEFAULT_MAX_MESSAGES,
            tokenizer: Some(Arc::new(HeuristicTokenizer)),
            input_tokens_total: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
        })
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    /// Replace the tokenizer. `None` forces the word-count fallback.
    pub fn with_tokenizer(mut self, tokenizer: Option<Arc<dyn TokenCounter>>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Override the context budget that drives eviction.
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.model_info.max_context_tokens = max_tokens;
        self
    }

    /// Estimate tokens for `text`. Never fails.
    pub fn estimate_tokens(&self, text: &str) -> u64 {
        match &self.tokenizer {
            Some(tokenizer) => match tokenizer.count_tokens(text) {
                Ok(count) => count,
                Err(e) => {
                    tracing::debug!("Tokenizer failed, using word estimate: {}", e);
                    word_estimate(text)
                }
            },
            None => word_estimate(text),
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        self.add_message_with(role, content, MessageMeta::default())
    }

    /// Append a message, then evict until both budgets hold.
    pub fn add_message_with(
        &mut self,
        role: Role,
        content: impl Into<String>,
        meta: MessageMeta,
    ) -> MessageId {
        let id = self.allocate_id();
        let mut message = Message::new(id, role, content);
        message.input_tokens_estimate = self.estimate_tokens(&message.content);
        message.tool_calls = meta.tool_calls;
        message.tool_call_id = meta.tool_call_id;
        message.task_id = meta.task_id;

        self.input_tokens_total += message.input_tokens_estimate as i64;
        self.messages.push(message);
        self.evict();
        id
    }

    fn over_budget(&self) -> bool {
        self.messages.len() > self.max_messages
            || self.input_tokens_total > self.model_info.max_context_tokens as i64
    }

    /// Drop the oldest non-system messages while over either budget.
    fn evict(&mut self) {
        while self.over_budget() {
            let Some(index) = self.messages.iter().position(|m| m.role != Role::System) else {
                break;
            };
            let evicted = self.messages.remove(index);
            self.input_tokens_total -= evicted.input_tokens;
            tracing::debug!(
                id = %evicted.id,
                role = %evicted.role,
                remaining = self.messages.len(),
                context_tokens = self.input_tokens_total,
                "Evicted message from memory"
            );
        }
    }

    /// Record a provider reply and reconcile token counts with the actuals.
    ///
    /// # Postconditions
    /// - `input_tokens_total == response.input_tokens`
    /// - the stored message's `input_tokens` is `response.input_tokens` minus
    ///   the billed input total before this call
    /// - billed totals advance by the response's usage
    pub fn add_response_message(
        &mut self,
        role: Role,
        response: &ChatResponse,
        tool_call_id: Option<String>,
        task_id: Option<TaskId>,
    ) -> MessageId {
        let id = self.add_message_with(
            role,
            response.message.clone(),
            MessageMeta {
                tool_calls: response.function_calls.clone(),
                tool_call_id,
                task_id,
            },
        );

        let actual = response.input_tokens as i64;
        let marginal = actual - self.total_input_tokens as i64;
        self.input_tokens_total = actual;
        if let Some(message) = self.get_message_mut(id) {
            message.input_tokens = marginal;
            message.output_tokens = response.output_tokens;
        }
        self.total_input_tokens += response.input_tokens;
        self.total_output_tokens += response.output_tokens;
        id
    }

    /// Count a provider round's usage without keeping its reply.
    pub fn record_usage(&mut self, response: &ChatResponse) {
        self.input_tokens_total = response.input_tokens as i64;
        self.total_input_tokens += response.input_tokens;
        self.total_output_tokens += response.output_tokens;
    }

    /// Replace any system prompt with `content`, placed first.
    pub fn set_system_prompt(&mut self, content: impl Into<String>) -> MessageId {
        let removed: i64 = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.input_tokens)
            .sum();
        self.messages.retain(|m| m.role != Role::System);
        self.input_tokens_total -= removed;

        let id = self.allocate_id();
        let mut message = Message::new(id, Role::System, content);
        message.input_tokens_estimate = self.estimate_tokens(&message.content);
        self.input_tokens_total += message.input_tokens_estimate as i64;
        self.messages.insert(0, message);
        self.evict();
        id
    }

    pub fn get_system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Remove a message by id. Removing an absent id is a no-op.
    pub fn remove_message(&mut self, id: MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        let removed = self.messages.remove(index);
        self.input_tokens_total -= removed.input_tokens;
        Some(removed)
    }

    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get_message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn get_message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Messages tagged with `task_id`, plus every system message.
    pub fn get_messages_for_task(&self, task_id: TaskId) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System || m.task_id == Some(task_id))
            .collect()
    }

    /// Total spend so far in dollars.
    pub fn get_total_cost(&self) -> f64 {
        self.model_info
            .cost(self.total_input_tokens, self.total_output_tokens)
    }

    /// Cost attributed to one message from its stored marginal usage.
    pub fn get_message_cost(&self, id: MessageId) -> Option<f64> {
        self.get_message(id).map(|m| {
            (m.input_tokens as f64 / 1_000_000.0) * self.model_info.input_cost_per_million
                + (m.output_tokens as f64 / 1_000_000.0) * self.model_info.output_cost_per_million
        })
    }

    /// Drop every non-system message. Billed totals are kept.
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
        self.input_tokens_total = self.messages.iter().map(|m| m.input_tokens_estimate as i64).sum();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_info(&self) -> &ModelInfo {
        &self.model_info
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn input_tokens_total(&self) -> i64 {
        self.input_tokens_total
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input_tokens
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output_tokens
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("input_tokens_total", &self.input_tokens_total)
            .field("total_input_tokens", &self.total_input_tokens)
            .field("total_output_tokens", &self.total_output_tokens)
            .finish()
    }
}
