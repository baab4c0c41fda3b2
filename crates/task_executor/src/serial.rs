//! Serial composition of tasks.

use crate::task::{SharedTask, Task, TaskExecutionInfo, TaskType};

/// Runs a list of tasks one after the other inside a single execution.
///
/// Execution stops at the first task that does not succeed and that task's
/// report is returned. When every task succeeds the last report is returned.
pub struct SerialTask {
    tasks: Vec<SharedTask>,
}

impl SerialTask {
    pub fn new(tasks: Vec<SharedTask>) -> Self {
        Self { tasks }
    }

    /// Convenience for the common "save, then record" pair.
    pub fn pair(first: SharedTask, second: SharedTask) -> Self {
        Self::new(vec![first, second])
    }

    /// The wrapped tasks in execution order.
    pub fn tasks(&self) -> &[SharedTask] {
        &self.tasks
    }
}

impl Task for SerialTask {
    fn execute(&self) -> TaskExecutionInfo {
        let mut last = TaskExecutionInfo::success(self.task_type());
        for task in &self.tasks {
            last = task.execute();
            if !last.is_success() {
                tracing::debug!(
                    "Serial execution stopped at {} with {:?}",
                    last.task_type,
                    last.result
                );
                return last;
            }
        }
        last
    }

    fn task_type(&self) -> TaskType {
        self.tasks
            .last()
            .map(|task| task.task_type())
            .unwrap_or(TaskType::Generic)
    }
}
