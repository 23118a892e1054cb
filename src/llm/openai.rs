//! OpenAI chat-completions adapter.
//!
//! The wire client here is also used by the xAI adapter, which speaks the
//! same protocol at a different endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{LlmError, RetryConfig};
use super::http::HttpTransport;
use super::{ChatOptions, ChatResponse, Provider, ProviderKind, Role, ToolCallRequest, ToolsFormat};
use crate::memory::Message;
use crate::tools::ToolSet;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Client for any chat-completions compatible endpoint.
#[derive(Debug, Clone)]
pub(crate) struct ChatCompletionsClient {
    transport: HttpTransport,
    api_key: String,
    endpoint: String,
}

impl ChatCompletionsClient {
    pub(crate) fn new(api_key: String, endpoint: impl Into<String>) -> Self {
        Self {
            transport: HttpTransport::new(),
            api_key,
            endpoint: endpoint.into(),
        }
    }

    pub(crate) fn set_retry_config(&mut self, retry_config: RetryConfig) {
        self.transport = HttpTransport::with_retry_config(retry_config);
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into();
    }

    pub(crate) async fn complete(
        &self,
        model: &str,
        history: &[Message],
        tools: Option<&[Value]>,
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let tools = tools.filter(|t| !t.is_empty());
        let request = CompletionRequest {
            model,
            messages: to_wire_messages(history),
            tools,
            tool_choice: tools.map(|_| "auto"),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            model,
            messages = history.len(),
            tools = tools.map(|t| t.len()).unwrap_or(0),
            "Sending chat completion request"
        );

        let body = self
            .transport
            .post_json(
                &self.endpoint,
                &[("Authorization", format!("Bearer {}", self.api_key))],
                &request,
            )
            .await?;

        Ok(parse_completion(&body)?)
    }
}

/// Convert ledger messages to the chat-completions message list.
fn to_wire_messages(history: &[Message]) -> Vec<WireMessage<'_>> {
    history
        .iter()
        .map(|m| {
            let has_calls = !m.tool_calls.is_empty();
            WireMessage {
                role: m.role,
                // Assistant turns that only carry tool calls send null content
                content: if has_calls && m.content.is_empty() {
                    None
                } else {
                    Some(m.content.as_str())
                },
                tool_calls: has_calls.then_some(m.tool_calls.as_slice()),
                tool_call_id: m.tool_call_id.as_deref(),
            }
        })
        .collect()
}

fn parse_completion(body: &str) -> Result<ChatResponse, LlmError> {
    let parsed: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
    })?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::parse_error("No choices in response".to_string()))?;

    let usage = parsed.usage.unwrap_or_default();
    Ok(ChatResponse {
        message: choice.message.content.unwrap_or_default(),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        function_calls: choice.message.tool_calls.unwrap_or_default(),
        finish_reason: choice.finish_reason,
    })
}

/// OpenAI adapter.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: ChatCompletionsClient,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: ChatCompletionsClient::new(api_key.into(), OPENAI_API_URL),
            model: model.into(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.client.set_retry_config(retry_config);
        self
    }

    /// Point the adapter at a compatible endpoint (proxy, local server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.client.set_endpoint(endpoint);
        self
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn get_tools_format(&self, tools: &ToolSet) -> Vec<Value> {
        tools.declarations(ToolsFormat::OpenAi)
    }

    async fn chat(
        &self,
        history: &[Message],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.client.complete(&self.model, history, None, options).await
    }

    async fn chat_with_tools(
        &self,
        history: &[Message],
        tools: &[Value],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.client
            .complete(&self.model, history, Some(tools), options)
            .await
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCallRequest]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallRequest>>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageId;

    fn message(role: Role, content: &str) -> Message {
        Message::new(MessageId::from_raw(0), role, content)
    }

    #[test]
    fn parses_tool_calls_and_usage() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_a",
                        "type": "function",
                        "function": {"name": "filesys.read_file", "arguments": "{\"file_path\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 15, "total_tokens": 135}
        }"#;

        let response = parse_completion(body).unwrap();
        assert_eq!(response.message, "");
        assert_eq!(response.input_tokens, 120);
        assert_eq!(response.output_tokens, 15);
        assert_eq!(response.function_calls.len(), 1);
        assert_eq!(response.function_calls[0].function_name(), "filesys.read_file");
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn empty_choices_is_a_parse_error() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert_eq!(err.kind, crate::llm::LlmErrorKind::ParseError);
    }

    #[test]
    fn wire_messages_keep_tool_linkage() {
        let mut assistant = message(Role::Assistant, "");
        assistant.tool_calls = vec![ToolCallRequest::new("call_a", "t", "{}")];
        let mut tool = message(Role::Tool, "result");
        tool.tool_call_id = Some("call_a".to_string());
        let history = vec![message(Role::User, "hi"), assistant, tool];

        let wire = serde_json::to_value(to_wire_messages(&history)).unwrap();
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["content"], Value::Null);
        assert_eq!(wire[1]["tool_calls"][0]["id"], "call_a");
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "call_a");
        assert!(wire[0].get("tool_calls").is_none());
    }
}
