//! Task tree with validated status transitions.
//!
//! # Invariants
//! - `id` is unique for the lifetime of the process
//! - a task is complex iff it has at least one subtask
//! - every subtask's `parent_id` is its owner's `id`; ownership is a strict tree
//! - a complex task auto-completes when its last child completes

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// # Postcondition
    /// Returns an id never handed out before in this process.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| TaskError::InvalidId(s.to_string()))
    }
}

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending --start()--> InProgress --complete()--> Completed
///    |                     \------fail()-------> Failed
///    \--(last child completes)--> Completed --resume()--> InProgress
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| TaskError::InvalidStatus(s.to_string()))
    }
}

/// A unit of work, possibly split into ordered subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    description: String,
    status: TaskStatus,
    result: Option<String>,
    error: Option<String>,
    parent_id: Option<TaskId>,
    subtasks: Vec<Task>,
}

impl Task {
    /// # Postconditions
    /// `status == Pending`, no parent, no subtasks.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            parent_id: None,
            subtasks: Vec::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn parent_id(&self) -> Option<TaskId> {
        self.parent_id
    }

    pub fn subtasks(&self) -> &[Task] {
        &self.subtasks
    }

    pub fn is_complex(&self) -> bool {
        !self.subtasks.is_empty()
    }

    /// Append a child task.
    ///
    /// # Postcondition
    /// The new child is last in `subtasks` and its `parent_id` is `self.id`.
    pub fn add_subtask(&mut self, description: impl Into<String>) -> TaskId {
        let mut child = Task::new(description);
        child.parent_id = Some(self.id);
        let id = child.id;
        self.subtasks.push(child);
        id
    }

    /// Every descendant, depth-first in definition order.
    pub fn get_all_subtasks(&self) -> Vec<&Task> {
        let mut out = Vec::new();
        for child in &self.subtasks {
            out.push(child);
            out.extend(child.get_all_subtasks());
        }
        out
    }

    /// Find this task or a descendant by id.
    pub fn find(&self, id: TaskId) -> Option<&Task> {
        if self.id == id {
            return Some(self);
        }
        self.subtasks.iter().find_map(|child| child.find(id))
    }

    pub(crate) fn find_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        if self.id == id {
            return Some(self);
        }
        self.subtasks.iter_mut().find_map(|child| child.find_mut(id))
    }

    fn invalid(&self, to: TaskStatus) -> TaskError {
        TaskError::InvalidTransition {
            from: self.status,
            to,
        }
    }

    /// # Precondition
    /// `status == Pending`
    pub fn start(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Pending => {
                self.status = TaskStatus::InProgress;
                Ok(())
            }
            _ => Err(self.invalid(TaskStatus::InProgress)),
        }
    }

    /// Mark completed with `result`.
    ///
    /// Completing an already completed task replaces its result; this is how
    /// an auto-completed parent records its own execution output.
    ///
    /// # Precondition
    /// `status != Failed`
    pub fn complete(&mut self, result: Option<String>) -> Result<(), TaskError> {
        if self.status == TaskStatus::Failed {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        if result.is_some() {
            self.result = result;
        }
        Ok(())
    }

    /// Put the task (back) in progress for its own execution step.
    ///
    /// A parent that auto-completed when its last child finished is
    /// reopened, so the outcome of its own step decides its final status.
    ///
    /// # Precondition
    /// `status != Failed`
    pub fn resume(&mut self) -> Result<(), TaskError> {
        if self.status == TaskStatus::Failed {
            return Err(self.invalid(TaskStatus::InProgress));
        }
        self.status = TaskStatus::InProgress;
        Ok(())
    }

    /// # Precondition
    /// `status` is `Pending` or `InProgress`
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        if self.status.is_terminal() {
            return Err(self.invalid(TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        Ok(())
    }

    /// Complete the descendant `id`, then let every ancestor on the path
    /// check whether all of its children are now completed.
    ///
    /// Returns `Ok(false)` if `id` is not below this task.
    pub(crate) fn complete_descendant(
        &mut self,
        id: TaskId,
        result: Option<String>,
    ) -> Result<bool, TaskError> {
        let found = match self.subtasks.iter().position(|t| t.id == id) {
            Some(index) => {
                self.subtasks[index].complete(result)?;
                true
            }
            None => {
                let mut found = false;
                for child in &mut self.subtasks {
                    if child.complete_descendant(id, result.clone())? {
                        found = true;
                        break;
                    }
                }
                found
            }
        };
        if found {
            self.complete_if_children_done();
        }
        Ok(found)
    }

    fn complete_if_children_done(&mut self) {
        if self.status.is_terminal() || !self.is_complex() {
            return;
        }
        if self
            .subtasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
        {
            self.status = TaskStatus::Completed;
            tracing::debug!(task_id = %self.id, "All subtasks completed; parent auto-completed");
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Invalid task id '{0}'")]
    InvalidId(String),

    #[error("Invalid status '{0}'. Valid statuses: pending, in_progress, completed, failed")]
    InvalidStatus(String),
}
