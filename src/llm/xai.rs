//! xAI adapter (Grok models).
//!
//! Speaks the chat-completions protocol. Tool calling is not enabled for
//! this vendor, so agents bound to it always take the plain chat path.

use async_trait::async_trait;
use serde_json::Value;

use super::error::RetryConfig;
use super::openai::ChatCompletionsClient;
use super::{ChatOptions, ChatResponse, Provider, ProviderKind};
use crate::memory::Message;
use crate::tools::ToolSet;

const XAI_API_URL: &str = "https://api.x.ai/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct XaiProvider {
    client: ChatCompletionsClient,
    model: String,
}

impl XaiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: ChatCompletionsClient::new(api_key.into(), XAI_API_URL),
            model: model.into(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.client.set_retry_config(retry_config);
        self
    }
}

#[async_trait]
impl Provider for XaiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Xai
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        false
    }

    fn get_tools_format(&self, _tools: &ToolSet) -> Vec<Value> {
        Vec::new()
    }

    async fn chat(
        &self,
        history: &[Message],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.client.complete(&self.model, history, None, options).await
    }

    /// Tools are ignored; this is a plain chat round.
    async fn chat_with_tools(
        &self,
        history: &[Message],
        _tools: &[Value],
        options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.chat(history, options).await
    }
}
