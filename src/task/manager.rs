//! Task manager and the sequential execution algorithm.
//!
//! The manager owns root tasks; subtasks are reached through their parents.
//! It is shared between the agent and the task tools as a
//! [`SharedTaskManager`], and the lock is never held across a chat round.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use super::task::{Task, TaskError, TaskId, TaskStatus};

/// Handle shared by an agent and the tools acting on its behalf.
pub type SharedTaskManager = Arc<Mutex<TaskManager>>;

/// Owns the root tasks of one agent, in creation order.
#[derive(Debug, Default)]
pub struct TaskManager {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

/// Descriptions of root tasks grouped by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSummary {
    pub pending: Vec<String>,
    pub in_progress: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedTaskManager {
        Arc::new(Mutex::new(self))
    }

    fn insert(&mut self, task: Task) -> TaskId {
        let id = task.id();
        self.order.push(id);
        self.tasks.insert(id, task);
        id
    }

    pub fn add_task(&mut self, description: impl Into<String>) -> TaskId {
        let task = Task::new(description);
        tracing::debug!(task_id = %task.id(), "Created task: {}", task.description());
        self.insert(task)
    }

    /// Create a root task with one subtask per description, in order.
    pub fn add_complex_task<S: AsRef<str>>(
        &mut self,
        description: impl Into<String>,
        subtasks: &[S],
    ) -> TaskId {
        let mut task = Task::new(description);
        for subtask in subtasks {
            task.add_subtask(subtask.as_ref());
        }
        tracing::debug!(
            task_id = %task.id(),
            subtasks = subtasks.len(),
            "Created complex task: {}",
            task.description()
        );
        self.insert(task)
    }

    /// Append a subtask under any task in the tree.
    pub fn add_subtask(
        &mut self,
        parent_id: TaskId,
        description: impl Into<String>,
    ) -> Result<TaskId, TaskError> {
        Ok(self
            .find_task_mut(parent_id)
            .ok_or(TaskError::NotFound(parent_id))?
            .add_subtask(description))
    }

    /// Look up a root task.
    pub fn get_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Look up any task, root or nested.
    pub fn find_task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.values().find_map(|t| t.find(id))
    }

    fn find_task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.values_mut().find_map(|t| t.find_mut(id))
    }

    fn root_id_of(&self, id: TaskId) -> Option<TaskId> {
        self.tasks
            .values()
            .find(|t| t.find(id).is_some())
            .map(|t| t.id())
    }

    /// The root task whose tree contains `id`.
    pub fn root_of(&self, id: TaskId) -> Option<&Task> {
        self.root_id_of(id).and_then(|root| self.tasks.get(&root))
    }

    /// Root tasks in creation order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn start_task(&mut self, id: TaskId) -> Result<(), TaskError> {
        let task = self.find_task_mut(id).ok_or(TaskError::NotFound(id))?;
        task.start()?;
        tracing::debug!(task_id = %id, "Task started");
        Ok(())
    }

    /// Move `id` to `InProgress` for its own step, reopening an
    /// auto-completed parent.
    pub fn resume_task(&mut self, id: TaskId) -> Result<(), TaskError> {
        let task = self.find_task_mut(id).ok_or(TaskError::NotFound(id))?;
        task.resume()?;
        tracing::debug!(task_id = %id, "Task resumed for its own step");
        Ok(())
    }

    /// Complete `id` and let its ancestors auto-complete.
    pub fn complete_task(&mut self, id: TaskId, result: Option<String>) -> Result<(), TaskError> {
        let root_id = self.root_id_of(id).ok_or(TaskError::NotFound(id))?;
        let root = self.tasks.get_mut(&root_id).ok_or(TaskError::NotFound(id))?;
        if root_id == id {
            root.complete(result)?;
        } else {
            root.complete_descendant(id, result)?;
        }
        tracing::debug!(task_id = %id, "Task completed");
        Ok(())
    }

    pub fn fail_task(&mut self, id: TaskId, error: impl Into<String>) -> Result<(), TaskError> {
        let error = error.into();
        let task = self.find_task_mut(id).ok_or(TaskError::NotFound(id))?;
        task.fail(error.clone())?;
        tracing::warn!(task_id = %id, "Task failed: {}", error);
        Ok(())
    }

    /// Move a task forward to `status`.
    ///
    /// Re-asserting the current non-terminal status is a no-op. Moving
    /// backwards, or out of `Failed`, is an `InvalidTransition`.
    pub fn update_task_status(
        &mut self,
        id: TaskId,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), TaskError> {
        let current = self
            .find_task(id)
            .ok_or(TaskError::NotFound(id))?
            .status();

        match (current, status) {
            (TaskStatus::Pending, TaskStatus::Pending)
            | (TaskStatus::InProgress, TaskStatus::InProgress) => Ok(()),
            (_, TaskStatus::InProgress) => self.start_task(id),
            (_, TaskStatus::Completed) => self.complete_task(id, result),
            (_, TaskStatus::Failed) => {
                self.fail_task(id, error.unwrap_or_else(|| "Marked as failed".to_string()))
            }
            (from, to) => Err(TaskError::InvalidTransition { from, to }),
        }
    }

    fn roots_with(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks().filter(|t| t.status() == status).collect()
    }

    pub fn get_pending_tasks(&self) -> Vec<&Task> {
        self.roots_with(TaskStatus::Pending)
    }

    pub fn get_in_progress_tasks(&self) -> Vec<&Task> {
        self.roots_with(TaskStatus::InProgress)
    }

    pub fn get_completed_tasks(&self) -> Vec<&Task> {
        self.roots_with(TaskStatus::Completed)
    }

    pub fn get_failed_tasks(&self) -> Vec<&Task> {
        self.roots_with(TaskStatus::Failed)
    }

    pub fn summary(&self) -> TaskSummary {
        let describe = |tasks: Vec<&Task>| -> Vec<String> {
            tasks.iter().map(|t| t.description().to_string()).collect()
        };
        TaskSummary {
            pending: describe(self.get_pending_tasks()),
            in_progress: describe(self.get_in_progress_tasks()),
            completed: describe(self.get_completed_tasks()),
            failed: describe(self.get_failed_tasks()),
        }
    }
}

/// Executes one task prompt. Implemented by the agent.
#[async_trait]
pub trait TaskRunner: Send {
    /// Run `prompt` on behalf of `task_id` and return the reply text.
    async fn run_task(&mut self, task_id: TaskId, prompt: String) -> anyhow::Result<String>;
}

/// A completed sibling fed forward as context.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousResult {
    pub description: String,
    pub result: Option<String>,
}

/// Prompt for executing one task of a plan.
pub fn build_task_prompt(
    overall: &str,
    previous: &[PreviousResult],
    current: &str,
) -> String {
    let previous = if previous.is_empty() {
        "None".to_string()
    } else {
        previous
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "{}. {}\n   Result: {}",
                    i + 1,
                    p.description,
                    p.result.as_deref().unwrap_or("None")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Overall task: {}\n\n\
         Previous results:\n{}\n\n\
         Current task: {}\n\n\
         Complete the current task, building on the previous results where relevant.",
        overall, previous, current
    )
}

fn completed_before(task: &Task, index: usize) -> Vec<PreviousResult> {
    task.subtasks()
        .iter()
        .take(index)
        .filter(|t| t.status() == TaskStatus::Completed)
        .map(|t| PreviousResult {
            description: t.description().to_string(),
            result: t.result().map(str::to_string),
        })
        .collect()
}

/// Record a failure; a task that already reached a terminal state keeps it.
fn mark_failed(manager: &mut TaskManager, id: TaskId, reason: String) {
    if let Err(e) = manager.fail_task(id, reason) {
        tracing::debug!(task_id = %id, "Not marking task failed: {}", e);
    }
}

/// Run `task_id` and, for a complex task, each of its pending subtasks first.
///
/// Subtasks run in definition order. Each one sees only the completed
/// siblings before it; the parent then runs with every completed subtask.
/// Subtasks that are not pending when reached are skipped.
///
/// Returns `Ok(None)` when the task does not exist.
///
/// # Failure policy
/// When a step fails, that task is marked `Failed`, its parent is marked
/// `Failed`, and the error is returned without running the remaining steps.
pub async fn execute_task_sequentially<R>(
    manager: &SharedTaskManager,
    runner: &mut R,
    task_id: TaskId,
) -> anyhow::Result<Option<String>>
where
    R: TaskRunner + ?Sized,
{
    let (overall, description) = {
        let mut guard = manager.lock().await;
        let Some(task) = guard.find_task(task_id) else {
            tracing::warn!(task_id = %task_id, "Task not found; nothing to execute");
            return Ok(None);
        };
        let description = task.description().to_string();
        let overall = guard
            .root_of(task_id)
            .map(|root| root.description().to_string())
            .unwrap_or_else(|| description.clone());
        if task.status() == TaskStatus::Pending {
            guard.start_task(task_id)?;
        }
        (overall, description)
    };

    tracing::info!(task_id = %task_id, "Executing task: {}", description);

    let mut index = 0;
    loop {
        // Re-read every step: tools may append subtasks while we run.
        let step = {
            let mut guard = manager.lock().await;
            let task = guard.find_task(task_id).ok_or(TaskError::NotFound(task_id))?;
            let Some(subtask) = task.subtasks().get(index) else {
                break;
            };
            if subtask.status() != TaskStatus::Pending {
                tracing::debug!(
                    task_id = %subtask.id(),
                    status = %subtask.status(),
                    "Skipping subtask that is not pending"
                );
                None
            } else {
                let step = (
                    subtask.id(),
                    subtask.description().to_string(),
                    completed_before(task, index),
                );
                guard.start_task(step.0)?;
                Some(step)
            }
        };

        if let Some((subtask_id, subtask_description, previous)) = step {
            tracing::info!(
                task_id = %subtask_id,
                step = index + 1,
                "Executing subtask: {}",
                subtask_description
            );
            let prompt = build_task_prompt(&overall, &previous, &subtask_description);
            match runner.run_task(subtask_id, prompt).await {
                Ok(result) => manager.lock().await.complete_task(subtask_id, Some(result))?,
                Err(e) => {
                    let mut guard = manager.lock().await;
                    let reason = format!("{:#}", e);
                    mark_failed(&mut guard, subtask_id, reason.clone());
                    mark_failed(&mut guard, task_id, format!("Subtask failed: {}", reason));
                    return Err(e.context(format!("subtask '{}' failed", subtask_description)));
                }
            }
        }
        index += 1;
    }

    let previous = {
        let mut guard = manager.lock().await;
        guard.resume_task(task_id)?;
        let task = guard.find_task(task_id).ok_or(TaskError::NotFound(task_id))?;
        completed_before(task, task.subtasks().len())
    };

    let prompt = build_task_prompt(&overall, &previous, &description);
    match runner.run_task(task_id, prompt).await {
        Ok(result) => {
            manager
                .lock()
                .await
                .complete_task(task_id, Some(result.clone()))?;
            Ok(Some(result))
        }
        Err(e) => {
            mark_failed(&mut *manager.lock().await, task_id, format!("{:#}", e));
            Err(e.context(format!("task '{}' failed", description)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Vec<(TaskId, String)>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl TaskRunner for RecordingRunner {
        async fn run_task(&mut self, task_id: TaskId, prompt: String) -> anyhow::Result<String> {
            self.calls.push((task_id, prompt));
            let n = self.calls.len();
            if self.fail_on_call == Some(n) {
                anyhow::bail!("provider unavailable");
            }
            Ok(format!("result {}", n))
        }
    }

    #[test]
    fn complex_task_shape() {
        let mut manager = TaskManager::new();
        let subtasks = ["gather data", "analyze", "write summary"];
        let id = manager.add_complex_task("research topic", &subtasks);

        let task = manager.get_task(id).unwrap();
        assert_eq!(task.subtasks().len(), subtasks.len());
        assert!(task.is_complex());
        for (child, description) in task.subtasks().iter().zip(subtasks) {
            assert_eq!(child.parent_id(), Some(id));
            assert_eq!(child.description(), description);
            assert!(!child.is_complex());
            // Subtasks are not indexed as roots
            assert!(manager.get_task(child.id()).is_none());
            assert!(manager.find_task(child.id()).is_some());
        }
    }

    #[test]
    fn summary_groups_roots_by_status() {
        let mut manager = TaskManager::new();
        let a = manager.add_task("a");
        let b = manager.add_task("b");
        let c = manager.add_task("c");
        manager.add_task("d");
        manager.start_task(a).unwrap();
        manager.complete_task(b, Some("ok".into())).unwrap();
        manager.update_task_status(c, TaskStatus::Failed, None, Some("broken".into())).unwrap();

        let summary = manager.summary();
        assert_eq!(summary.in_progress, vec!["a"]);
        assert_eq!(summary.completed, vec!["b"]);
        assert_eq!(summary.failed, vec!["c"]);
        assert_eq!(summary.pending, vec!["d"]);
        assert_eq!(manager.get_task(c).unwrap().error(), Some("broken"));
    }

    #[test]
    fn update_status_is_forward_only() {
        let mut manager = TaskManager::new();
        let id = manager.add_task("a");
        manager.update_task_status(id, TaskStatus::Pending, None, None).unwrap();
        manager.update_task_status(id, TaskStatus::InProgress, None, None).unwrap();
        manager.update_task_status(id, TaskStatus::InProgress, None, None).unwrap();
        assert!(matches!(
            manager.update_task_status(id, TaskStatus::Pending, None, None),
            Err(TaskError::InvalidTransition { .. })
        ));
        manager.update_task_status(id, TaskStatus::Completed, Some("done".into()), None).unwrap();
        assert_eq!(manager.get_task(id).unwrap().result(), Some("done"));
        assert!(manager.update_task_status(TaskId::new(), TaskStatus::Completed, None, None).is_err());
    }

    #[test]
    fn completing_subtasks_through_manager_bubbles_up() {
        let mut manager = TaskManager::new();
        let id = manager.add_complex_task("p", &["A", "B"]);
        let children: Vec<_> = manager.get_task(id).unwrap().subtasks().iter().map(|t| t.id()).collect();

        manager.complete_task(children[1], None).unwrap();
        assert_eq!(manager.get_task(id).unwrap().status(), TaskStatus::Pending);
        manager.complete_task(children[0], None).unwrap();
        assert_eq!(manager.get_task(id).unwrap().status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn three_subtasks_take_four_rounds() {
        let manager = TaskManager::new().shared();
        let id = manager
            .lock()
            .await
            .add_complex_task("plan trip", &["book flight", "book hotel", "plan days"]);
        let mut runner = RecordingRunner::default();

        let result = execute_task_sequentially(&manager, &mut runner, id).await.unwrap();

        assert_eq!(runner.calls.len(), 4);
        assert_eq!(result.as_deref(), Some("result 4"));
        let guard = manager.lock().await;
        let task = guard.get_task(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result(), Some("result 4"));
        let results: Vec<_> = task.subtasks().iter().map(|t| t.result().unwrap()).collect();
        assert_eq!(results, vec!["result 1", "result 2", "result 3"]);
        assert_eq!(runner.calls[3].0, id);
    }

    #[tokio::test]
    async fn previous_results_only_include_earlier_completed_siblings() {
        let manager = TaskManager::new().shared();
        let (id, later) = {
            let mut guard = manager.lock().await;
            let id = guard.add_complex_task("overall goal", &["first", "second", "third"]);
            let later = guard.get_task(id).unwrap().subtasks()[2].id();
            // Already done before the run starts: skipped and never fed forward early.
            guard.complete_task(later, Some("precomputed".into())).unwrap();
            (id, later)
        };
        let mut runner = RecordingRunner::default();

        execute_task_sequentially(&manager, &mut runner, id).await.unwrap();

        assert_eq!(runner.calls.len(), 3);
        let first = &runner.calls[0].1;
        assert!(first.contains("Overall task: overall goal"));
        assert!(first.contains("Previous results:\nNone"));
        assert!(first.contains("Current task: first"));
        assert!(!first.contains("precomputed"));

        let second = &runner.calls[1].1;
        assert!(second.contains("1. first\n   Result: result 1"));
        assert!(!second.contains("precomputed"));

        let parent = &runner.calls[2].1;
        assert_eq!(runner.calls[2].0, id);
        assert!(parent.contains("result 1"));
        assert!(parent.contains("result 2"));
        assert!(parent.contains("precomputed"));
        assert!(runner.calls.iter().all(|(task, _)| *task != later));
    }

    #[tokio::test]
    async fn flat_task_runs_once_with_no_context() {
        let manager = TaskManager::new().shared();
        let id = manager.lock().await.add_task("say hi");
        let mut runner = RecordingRunner::default();

        let result = execute_task_sequentially(&manager, &mut runner, id).await.unwrap();

        assert_eq!(result.as_deref(), Some("result 1"));
        assert_eq!(runner.calls.len(), 1);
        assert!(runner.calls[0].1.contains("Previous results:\nNone"));
        assert_eq!(manager.lock().await.get_task(id).unwrap().status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn missing_task_is_not_an_error() {
        let manager = TaskManager::new().shared();
        let mut runner = RecordingRunner::default();
        let result = execute_task_sequentially(&manager, &mut runner, TaskId::new()).await.unwrap();
        assert!(result.is_none());
        assert!(runner.calls.is_empty());
    }

    #[tokio::test]
    async fn failing_step_marks_failed_and_aborts() {
        let manager = TaskManager::new().shared();
        let id = manager.lock().await.add_complex_task("p", &["A", "B", "C"]);
        let mut runner = RecordingRunner {
            fail_on_call: Some(2),
            ..Default::default()
        };

        let err = execute_task_sequentially(&manager, &mut runner, id).await.unwrap_err();
        assert!(format!("{:#}", err).contains("provider unavailable"));
        assert_eq!(runner.calls.len(), 2);

        let guard = manager.lock().await;
        let task = guard.get_task(id).unwrap();
        let statuses: Vec<_> = task.subtasks().iter().map(|t| t.status()).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Pending]
        );
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.subtasks()[1].error().unwrap().contains("provider unavailable"));
    }

    #[tokio::test]
    async fn failing_parent_step_marks_parent_failed() {
        let manager = TaskManager::new().shared();
        let id = manager.lock().await.add_complex_task("p", &["A", "B"]);
        let mut runner = RecordingRunner {
            fail_on_call: Some(3),
            ..Default::default()
        };

        let err = execute_task_sequentially(&manager, &mut runner, id).await.unwrap_err();
        assert!(format!("{:#}", err).contains("provider unavailable"));
        assert_eq!(runner.calls.len(), 3);

        let guard = manager.lock().await;
        let task = guard.get_task(id).unwrap();
        assert!(task.subtasks().iter().all(|t| t.status() == TaskStatus::Completed));
        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.error().unwrap().contains("provider unavailable"));
        assert!(task.result().is_none());
        assert_eq!(guard.summary().failed, vec!["p"]);
    }

    #[test]
    fn empty_descriptions_are_accepted() {
        let mut manager = TaskManager::new();
        let flat = manager.add_task("");
        let complex = manager.add_complex_task("", &["", "step"]);

        assert_eq!(manager.get_task(flat).unwrap().description(), "");
        let task = manager.get_task(complex).unwrap();
        assert_eq!(task.subtasks().len(), 2);
        assert_eq!(task.subtasks()[0].description(), "");
    }

    #[test]
    fn prompt_lists_previous_results() {
        let prompt = build_task_prompt(
            "top",
            &[PreviousResult {
                description: "step".into(),
                result: None,
            }],
            "now",
        );
        assert!(prompt.contains("1. step\n   Result: None"));
        assert!(prompt.contains("Current task: now"));
    }
}
