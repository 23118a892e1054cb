//! Agents module - the orchestration layer.
//!
//! An [`Agent`] owns one provider, one memory ledger and one task manager,
//! and is bound to a subset of the tool registry.
//!
//! # Entry points
//! - [`Agent::chat`]: one turn, transparently running tool calls
//! - [`Agent::handle_complex_query`]: triage, then either chat or
//!   decompose and execute the steps in order
//!
//! Triage and decomposition prompts are scratch messages: they are sent,
//! their reply is read, and both are dropped from the transcript.

mod agent;
mod decompose;
mod types;

pub use agent::{Agent, Turn, DEFAULT_MAX_TOOL_ROUNDS};
pub use decompose::parse_subtasks;
pub use types::{AgentError, AgentId};
