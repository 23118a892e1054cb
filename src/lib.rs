//! # agentcorp
//!
//! Lightweight orchestration layer for LLM agents.
//!
//! This library provides:
//! - Provider adapters (OpenAI, Anthropic, xAI) behind one chat/tool-calling trait
//! - A tool registry with filesystem, search, terminal, web and task tools
//! - A token-aware memory ledger with per-message cost accounting
//! - A task tree executed step by step, each step seeing earlier results
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!   query ───────▶ │            Agent             │
//!                  │  triage ▸ decompose ▸ chat   │
//!                  └──┬─────────┬──────────┬──────┘
//!                     │         │          │
//!                     ▼         ▼          ▼
//!              ┌──────────┐ ┌────────┐ ┌─────────────┐
//!              │ Provider │ │ Memory │ │ TaskManager │
//!              └──────────┘ └────────┘ └─────────────┘
//!                     │
//!                     ▼ tool calls
//!              ┌──────────────────────────┐
//!              │ ToolSet (from registry)  │
//!              │  + ToolExecutionContext  │
//!              └──────────────────────────┘
//! ```
//!
//! ## Task Flow
//! 1. Ask the model whether the query needs several steps
//! 2. If so, decompose it into subtasks under one parent task
//! 3. Run each subtask in order through the tool loop
//! 4. The parent completes with the last step's result
//!
//! ## Modules
//! - `agents`: the agent and its tool loop
//! - `llm`: provider adapters
//! - `memory`: conversation ledger and cost tracking
//! - `pricing`: static model pricing table
//! - `task`: task tree and sequential execution
//! - `tools`: tool trait, registry and built-in tools
//! - `config`: environment settings and JSON agent definitions
//! - `prompts`: markdown prompt templates

pub mod agents;
pub mod config;
pub mod llm;
pub mod memory;
pub mod pricing;
pub mod prompts;
pub mod task;
pub mod tools;

pub use agents::{Agent, AgentError, Turn};
pub use config::{create_agent_from_config, AgentConfig, Config, ConfigError};
pub use llm::{ChatOptions, ChatResponse, Provider, ProviderKind};
pub use memory::Memory;
pub use task::{TaskId, TaskManager, TaskStatus};
pub use tools::{Tool, ToolExecutionContext, ToolRegistry};
