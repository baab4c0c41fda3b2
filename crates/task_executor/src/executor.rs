//! Executor contract.

use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::task::{SharedListener, SharedTask, TaskExecutionInfo};

/// Opaque identifier of a submitted or scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runs tasks off the caller's thread and reports results to listeners.
///
/// Every method returns immediately. `None` is returned when the executor has
/// been shut down and the task was not accepted.
pub trait TaskExecutor: Send + Sync {
    /// Run `task` as soon as possible.
    fn submit(&self, task: SharedTask, listener: Option<SharedListener>) -> Option<TaskHandle>;

    /// Run `task` once after `delay`.
    fn schedule(
        &self,
        task: SharedTask,
        delay: Duration,
        listener: Option<SharedListener>,
    ) -> Option<TaskHandle>;

    /// Run `task` after `initial_delay` and then every `period`.
    fn schedule_periodic(
        &self,
        task: SharedTask,
        initial_delay: Duration,
        period: Duration,
        listener: Option<SharedListener>,
    ) -> Option<TaskHandle>;

    /// Cancel a pending or recurring task. An execution already in progress
    /// is allowed to finish.
    fn stop_task(&self, handle: &TaskHandle);

    /// Cancel everything and refuse new work.
    fn shutdown(&self);
}

pub(crate) fn notify(listener: Option<&SharedListener>, info: &TaskExecutionInfo) {
    if let Some(listener) = listener {
        listener.task_executed(info);
    }
}
