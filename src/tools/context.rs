//! Per-agent execution context handed to every tool call.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::task::{SharedTaskManager, TaskId};

/// Closed set of inputs a tool may rely on.
///
/// `settings` is the only sanctioned source of environment for tools; the
/// `workingdir` key confines filesystem access. The task manager handle lets
/// the task tools reach back into the owning agent's task tree.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    settings: HashMap<String, String>,
    agent_id: String,
    session_id: String,
    task_manager: Option<SharedTaskManager>,
    current_task_id: Option<TaskId>,
}

impl ToolExecutionContext {
    pub fn new(settings: HashMap<String, String>) -> Self {
        Self {
            settings,
            session_id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_task_manager(mut self, manager: SharedTaskManager) -> Self {
        self.task_manager = Some(manager);
        self
    }

    pub fn get_setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn get_setting_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_setting(key).unwrap_or(default)
    }

    pub fn has_setting(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn task_manager(&self) -> Option<&SharedTaskManager> {
        self.task_manager.as_ref()
    }

    /// Task currently being executed by the owning agent, if any.
    pub fn current_task_id(&self) -> Option<TaskId> {
        self.current_task_id
    }

    pub(crate) fn set_current_task(&mut self, task_id: Option<TaskId>) {
        self.current_task_id = task_id;
    }

    /// The `workingdir` confinement root. An empty value counts as unset.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.get_setting("workingdir")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_and_working_dir() {
        let mut settings = HashMap::new();
        settings.insert("workingdir".to_string(), "/srv/project".to_string());
        settings.insert("mode".to_string(), "".to_string());
        let ctx = ToolExecutionContext::new(settings).with_agent_id("agent-1");

        assert_eq!(ctx.working_dir(), Some(PathBuf::from("/srv/project")));
        assert_eq!(ctx.get_setting_or("missing", "fallback"), "fallback");
        assert!(ctx.has_setting("mode"));
        assert_eq!(ctx.agent_id(), "agent-1");
        assert!(!ctx.session_id().is_empty());
        assert!(ctx.task_manager().is_none());
    }

    #[test]
    fn empty_working_dir_is_unset() {
        let mut settings = HashMap::new();
        settings.insert("workingdir".to_string(), "  ".to_string());
        assert!(ToolExecutionContext::new(settings).working_dir().is_none());
    }
}
