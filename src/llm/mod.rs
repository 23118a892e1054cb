//! LLM provider layer.
//!
//! Every vendor is reached through the [`Provider`] capability trait, which
//! normalizes chat and tool-calling round trips into one [`ChatResponse`]
//! shape. The concrete adapter is picked once, at construction, from a
//! [`ProviderKind`].
//!
//! ```text
//!   Agent ──▶ dyn Provider ──┬─▶ OpenAiProvider    (chat completions)
//!                            ├─▶ AnthropicProvider (messages API)
//!                            └─▶ XaiProvider       (chat completions, no tools)
//!                                     │
//!                                     ▼
//!                              HttpTransport (retry on connection failures)
//! ```

mod anthropic;
mod error;
mod http;
mod openai;
#[cfg(test)]
pub(crate) mod scripted;
mod xai;

pub use anthropic::AnthropicProvider;
pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use http::HttpTransport;
pub use openai::OpenAiProvider;
pub use xai::XaiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;
use crate::tools::ToolSet;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the model.
///
/// Serializes as `{id, type: "function", function: {name, arguments}}`,
/// which is the shape chat-completions vendors expect back verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_call_type() -> String {
    "function".to_string()
}

/// Function name and JSON-encoded arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        arguments_json: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: function_call_type(),
            function: FunctionCall {
                name: function_name.into(),
                arguments: arguments_json.into(),
            },
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments_json(&self) -> &str {
        &self.function.arguments
    }
}

/// Tool declaration in OpenAI function format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool declaration in Anthropic format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Which declaration shape a vendor expects for tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolsFormat {
    OpenAi,
    Anthropic,
}

/// Normalized result of one provider round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    /// Assistant text (may be empty when only tool calls were issued)
    pub message: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tool invocations, in the order the model issued them
    pub function_calls: Vec<ToolCallRequest>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// A plain text reply with the given usage.
    pub fn text(message: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            message: message.into(),
            input_tokens,
            output_tokens,
            function_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn has_function_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }
}

/// Per-request sampling options passed through to the vendor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
}

/// The vendors this crate has adapters and pricing for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Xai,
}

impl ProviderKind {
    /// Parse a provider name case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "xai" => Some(ProviderKind::Xai),
            _ => None,
        }
    }

    /// Key used in the pricing table and for `{PROVIDER}_API_KEY`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Xai => "xai",
        }
    }

    /// Name of the environment variable holding this vendor's API key.
    pub fn api_key_env_var(&self) -> String {
        format!("{}_API_KEY", self.as_str().to_ascii_uppercase())
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform capability interface over a vendor's chat API.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Whether `chat_with_tools` is usable with this vendor.
    fn supports_tools(&self) -> bool;

    /// Project the bound tools into this vendor's declaration list.
    fn get_tools_format(&self, tools: &ToolSet) -> Vec<Value>;

    async fn chat(&self, history: &[Message], options: &ChatOptions)
        -> anyhow::Result<ChatResponse>;

    async fn chat_with_tools(
        &self,
        history: &[Message],
        tools: &[Value],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse>;
}
