//! Tools that let the model manage the owning agent's task tree.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str, Tool, ToolExecutionContext};
use crate::task::{TaskError, TaskId, TaskStatus};

const NO_MANAGER: &str = "Error: Task manager not available in context";

/// Create a new root task.
pub struct CreateTask;

#[async_trait]
impl Tool for CreateTask {
    fn name(&self) -> &str {
        "task.create_task"
    }

    fn description(&self) -> &str {
        "Create a new task in the agent's task manager."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Description of the task"
                }
            },
            "required": ["description"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let description = required_str(&args, "description")?;
        let Some(manager) = ctx.task_manager() else {
            return Ok(NO_MANAGER.to_string());
        };

        let id = manager.lock().await.add_task(description);
        Ok(format!("Task created successfully with ID: {}", id))
    }
}

/// Add a subtask under an existing task.
pub struct AddSubtask;

#[async_trait]
impl Tool for AddSubtask {
    fn name(&self) -> &str {
        "task.add_subtask"
    }

    fn description(&self) -> &str {
        "Add a subtask to an existing task. Defaults to the task currently being executed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Description of the subtask"
                },
                "parent_task_id": {
                    "type": "string",
                    "description": "ID of the parent task (defaults to the current task)"
                }
            },
            "required": ["description"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let description = required_str(&args, "description")?;
        let Some(manager) = ctx.task_manager() else {
            return Ok(NO_MANAGER.to_string());
        };

        let parent = match optional_str(&args, "parent_task_id") {
            Some(raw) => match raw.parse::<TaskId>() {
                Ok(id) => id,
                Err(e) => return Ok(format!("Error: {}", e)),
            },
            None => match ctx.current_task_id() {
                Some(id) => id,
                None => {
                    return Ok(
                        "Error: No parent task ID provided and no current task set in context"
                            .to_string(),
                    )
                }
            },
        };

        let added = manager.lock().await.add_subtask(parent, description);
        Ok(match added {
            Ok(id) => format!("Subtask added successfully with ID: {}", id),
            Err(TaskError::NotFound(id)) => format!("Error: Parent task with ID {} not found", id),
            Err(e) => format!("Error adding subtask: {}", e),
        })
    }
}

/// Move a task to a new status.
pub struct UpdateTaskStatus;

#[async_trait]
impl Tool for UpdateTaskStatus {
    fn name(&self) -> &str {
        "task.update_task_status"
    }

    fn description(&self) -> &str {
        "Update the status of a task, optionally recording its result or error."
    }

    fn parameters_schema(&self) -> Value {
        let statuses: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "ID of the task to update"
                },
                "status": {
                    "type": "string",
                    "enum": statuses,
                    "description": "New status for the task"
                },
                "result": {
                    "type": "string",
                    "description": "Result of the task (for completed tasks)"
                },
                "error": {
                    "type": "string",
                    "description": "Error message (for failed tasks)"
                }
            },
            "required": ["task_id", "status"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let raw_id = required_str(&args, "task_id")?;
        let raw_status = required_str(&args, "status")?;
        let Some(manager) = ctx.task_manager() else {
            return Ok(NO_MANAGER.to_string());
        };

        let status = match raw_status.parse::<TaskStatus>() {
            Ok(status) => status,
            Err(_) => {
                let valid: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
                return Ok(format!(
                    "Error: Invalid status '{}'. Valid statuses: {}",
                    raw_status,
                    valid.join(", ")
                ));
            }
        };
        let task_id = match raw_id.parse::<TaskId>() {
            Ok(id) => id,
            Err(e) => return Ok(format!("Error: {}", e)),
        };

        let updated = manager.lock().await.update_task_status(
            task_id,
            status,
            optional_str(&args, "result").map(str::to_string),
            optional_str(&args, "error").map(str::to_string),
        );
        Ok(match updated {
            Ok(()) => format!("Task {} status updated to {}", task_id, status),
            Err(e) => format!("Error updating task status: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskManager;
    use std::collections::HashMap;

    fn ctx_with_manager() -> ToolExecutionContext {
        ToolExecutionContext::new(HashMap::new()).with_task_manager(TaskManager::new().shared())
    }

    fn id_from(message: &str) -> TaskId {
        message
            .rsplit(' ')
            .next()
            .and_then(|raw| raw.parse().ok())
            .expect("message ends with a task id")
    }

    #[tokio::test]
    async fn without_manager_reports_error() {
        let out = CreateTask
            .execute(json!({"description": "x"}), &ToolExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out, NO_MANAGER);
    }

    #[tokio::test]
    async fn create_add_and_complete() {
        let ctx = ctx_with_manager();
        let created = CreateTask
            .execute(json!({"description": "Write report"}), &ctx)
            .await
            .unwrap();
        assert!(created.starts_with("Task created successfully with ID: "));
        let root = id_from(&created);

        let added = AddSubtask
            .execute(
                json!({"description": "Outline", "parent_task_id": root.to_string()}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(added.starts_with("Subtask added successfully with ID: "));
        let child = id_from(&added);

        let updated = UpdateTaskStatus
            .execute(
                json!({"task_id": child.to_string(), "status": "completed", "result": "done"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(updated, format!("Task {} status updated to completed", child));

        let manager = ctx.task_manager().unwrap().lock().await;
        let task = manager.find_task(child).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.result(), Some("done"));
        // Sole subtask completing finishes the parent too
        assert_eq!(manager.get_task(root).unwrap().status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn add_subtask_defaults_to_current_task() {
        let mut ctx = ctx_with_manager();
        let out = AddSubtask
            .execute(json!({"description": "orphan"}), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("Error: No parent task ID provided"));

        let root = ctx.task_manager().unwrap().lock().await.add_task("root");
        ctx.set_current_task(Some(root));
        let out = AddSubtask
            .execute(json!({"description": "child"}), &ctx)
            .await
            .unwrap();
        assert!(out.starts_with("Subtask added successfully"));
        let manager = ctx.task_manager().unwrap().lock().await;
        assert_eq!(manager.get_task(root).unwrap().subtasks().len(), 1);
    }

    #[tokio::test]
    async fn invalid_status_and_unknown_parent() {
        let ctx = ctx_with_manager();
        let out = UpdateTaskStatus
            .execute(json!({"task_id": TaskId::new().to_string(), "status": "done"}), &ctx)
            .await
            .unwrap();
        assert_eq!(
            out,
            "Error: Invalid status 'done'. Valid statuses: pending, in_progress, completed, failed"
        );

        let missing = TaskId::new();
        let out = AddSubtask
            .execute(
                json!({"description": "x", "parent_task_id": missing.to_string()}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out, format!("Error: Parent task with ID {} not found", missing));
    }
}
