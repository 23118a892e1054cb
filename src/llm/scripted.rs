//! Test provider that replays queued responses.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{ChatOptions, ChatResponse, Provider, ProviderKind, Role, ToolsFormat};
use crate::memory::Message;
use crate::tools::ToolSet;

/// What the provider saw on one call.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub with_tools: bool,
    pub history: Vec<(Role, String)>,
}

pub(crate) struct ScriptedProvider {
    responses: Mutex<VecDeque<anyhow::Result<ChatResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    supports_tools: bool,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
            supports_tools: true,
        }
    }

    /// Replies with the given texts in order, each billed 10 in / 5 out.
    pub fn texts(replies: &[&str]) -> Self {
        Self::new(
            replies
                .iter()
                .map(|r| ChatResponse::text(*r, 10, 5))
                .collect(),
        )
    }

    pub fn without_tools(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!(message.to_string())));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next(&self, history: &[Message], with_tools: bool) -> anyhow::Result<ChatResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            with_tools,
            history: history
                .iter()
                .map(|m| (m.role, m.content.clone()))
                .collect(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        "gpt-3.5-turbo"
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    fn get_tools_format(&self, tools: &ToolSet) -> Vec<Value> {
        tools.declarations(ToolsFormat::OpenAi)
    }

    async fn chat(&self, history: &[Message], _options: &ChatOptions) -> anyhow::Result<ChatResponse> {
        self.next(history, false)
    }

    async fn chat_with_tools(
        &self,
        history: &[Message],
        _tools: &[Value],
        _options: &ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.next(history, true)
    }
}
