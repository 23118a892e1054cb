//! Task module: the task tree, its manager, and sequential execution.
//!
//! - Status transitions are explicit and validated
//! - A parent completes itself when its last child completes
//! - Execution is strictly serial; each step sees the results before it

mod manager;
pub mod task;

pub use manager::{
    build_task_prompt, execute_task_sequentially, PreviousResult, SharedTaskManager, TaskManager,
    TaskRunner, TaskSummary,
};
pub use task::{Task, TaskError, TaskId, TaskStatus};
