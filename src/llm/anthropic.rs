//! Anthropic messages-API adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{LlmError, RetryConfig};
use super::http::HttpTransport;
use super::{ChatOptions, ChatResponse, Provider, ProviderKind, Role, ToolCallRequest, ToolsFormat};
use crate::memory::Message;
use crate::tools::ToolSet;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    transport: HttpTransport,
    api_key: String,
    model: String,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            transport: HttpTransport::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.transport = HttpTransport::with_retry_config(retry_config);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn send(
        &self,
        history: &[Message],
        tools: Option<&[Value]>,
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let (system, messages) = to_anthropic_messages(history);
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            tools: tools.filter(|t| !t.is_empty()),
            temperature: options.temperature,
            top_p: options.top_p,
        };

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            "Sending Anthropic messages request"
        );

        let body = self
            .transport
            .post_json(
                &self.endpoint,
                &[
                    ("x-api-key", self.api_key.clone()),
                    ("anthropic-version", ANTHROPIC_VERSION.to_string()),
                ],
                &request,
            )
            .await?;

        Ok(parse_messages_response(&body)?)
    }
}

/// Split the ledger into Anthropic's `system` string and alternating turns.
///
/// Tool results travel as `tool_result` blocks inside a user turn, and
/// consecutive turns with the same role are merged.
fn to_anthropic_messages(history: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut turns: Vec<AnthropicMessage> = Vec::new();

    for message in history {
        let (role, blocks) = match message.role {
            Role::System => {
                system_parts.push(&message.content);
                continue;
            }
            Role::User => (
                "user",
                vec![ContentBlock::Text {
                    text: message.content.clone(),
                }],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                for call in &message.tool_calls {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function_name().to_string(),
                        input: serde_json::from_str(call.arguments_json())
                            .unwrap_or_else(|_| json!({})),
                    });
                }
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                }],
            ),
        };

        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => turns.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, turns)
}

fn parse_messages_response(body: &str) -> Result<ChatResponse, LlmError> {
    let parsed: MessagesResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
    })?;

    let mut text = Vec::new();
    let mut function_calls = Vec::new();
    for block in parsed.content {
        match block {
            ContentBlock::Text { text: t } => text.push(t),
            ContentBlock::ToolUse { id, name, input } => {
                function_calls.push(ToolCallRequest::new(id, name, input.to_string()))
            }
            ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
        }
    }

    Ok(ChatResponse {
        message: text.join(""),
        input_tokens: parsed.usage.input_tokens,
        output_tokens: parsed.usage.output_tokens,
        function_calls,
        finish_reason: parsed.stop_reason,
    })
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn get_tools_format(&self, tools: &ToolSet) -> Vec<Value> {
        tools.declarations(ToolsFormat::Anthropic)
    }

    async fn chat(
        &self,
        history: &[Message],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.send(history, None, options).await
    }

    async fn chat_with_tools(
        &self,
        history: &[Message],
        tools: &[Value],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.send(history, Some(tools), options).await
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    /// Block types this adapter does not consume (thinking, etc.)
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageId;

    fn message(role: Role, content: &str) -> Message {
        Message::new(MessageId::from_raw(0), role, content)
    }

    #[test]
    fn system_is_lifted_and_tool_results_merge_into_one_user_turn() {
        let mut assistant = message(Role::Assistant, "Let me look.");
        assistant.tool_calls = vec![
            ToolCallRequest::new("tu_1", "filesys.read_file", r#"{"file_path":"a"}"#),
            ToolCallRequest::new("tu_2", "filesys.read_file", r#"{"file_path":"b"}"#),
        ];
        let mut r1 = message(Role::Tool, "A");
        r1.tool_call_id = Some("tu_1".into());
        let mut r2 = message(Role::Tool, "B");
        r2.tool_call_id = Some("tu_2".into());

        let history = vec![
            message(Role::System, "be terse"),
            message(Role::User, "read a and b"),
            assistant,
            r1,
            r2,
        ];

        let (system, turns) = to_anthropic_messages(&history);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, "assistant");
        assert_eq!(turns[1].content.len(), 3);
        assert_eq!(turns[2].role, "user");
        assert_eq!(turns[2].content.len(), 2);

        let wire = serde_json::to_value(&turns[1].content[1]).unwrap();
        assert_eq!(wire["type"], "tool_use");
        assert_eq!(wire["input"]["file_path"], "a");
    }

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let body = r#"{
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "tu_9", "name": "web_search", "input": {"query": "rust"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 40, "output_tokens": 12}
        }"#;

        let response = parse_messages_response(body).unwrap();
        assert_eq!(response.message, "Checking.");
        assert_eq!(response.input_tokens, 40);
        assert_eq!(response.output_tokens, 12);
        assert_eq!(response.function_calls[0].id, "tu_9");
        let args: Value = serde_json::from_str(response.function_calls[0].arguments_json()).unwrap();
        assert_eq!(args["query"], "rust");
    }
}
