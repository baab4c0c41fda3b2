//! Task model shared by every executor.

use std::fmt;
use std::sync::Arc;

/// Kind of work a task performs.
///
/// Listeners use the kind to tell results of independent delivery channels apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Read queued impressions from storage and post them
    ImpressionsRecorder,
    /// Read stored impression counts and post them
    ImpressionsCountRecorder,
    /// Read stored unique keys and post them
    UniqueKeysRecorder,
    /// Persist in-memory impression counts
    SaveImpressionsCount,
    /// Persist in-memory unique keys
    SaveUniqueKeys,
    /// Anything else
    Generic,
}

impl TaskType {
    /// Stable name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ImpressionsRecorder => "impressions_recorder",
            TaskType::ImpressionsCountRecorder => "impressions_count_recorder",
            TaskType::UniqueKeysRecorder => "unique_keys_recorder",
            TaskType::SaveImpressionsCount => "save_impressions_count",
            TaskType::SaveUniqueKeys => "save_unique_keys",
            TaskType::Generic => "generic",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    /// The task did its work
    Success,
    /// The task failed but may succeed if run again
    RetryableError,
    /// The task failed and must not be attempted again
    FatalError,
}

/// Report produced by a task and handed to its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExecutionInfo {
    /// Kind of the task that produced this report
    pub task_type: TaskType,
    /// Outcome
    pub result: TaskResult,
    /// Records the task could not deliver
    pub non_sent_records: u64,
    /// Estimated bytes the task could not deliver
    pub non_sent_bytes: u64,
    /// HTTP status of the failed request, when there was one
    pub http_status: Option<u16>,
}

impl TaskExecutionInfo {
    fn new(task_type: TaskType, result: TaskResult) -> Self {
        Self {
            task_type,
            result,
            non_sent_records: 0,
            non_sent_bytes: 0,
            http_status: None,
        }
    }

    /// Successful execution.
    pub fn success(task_type: TaskType) -> Self {
        Self::new(task_type, TaskResult::Success)
    }

    /// Failed execution that may be retried.
    pub fn error(task_type: TaskType) -> Self {
        Self::new(task_type, TaskResult::RetryableError)
    }

    /// Failed execution that must not be retried.
    pub fn fatal(task_type: TaskType) -> Self {
        Self::new(task_type, TaskResult::FatalError)
    }

    /// Attach the amount of data left undelivered.
    pub fn with_non_sent(mut self, records: u64, bytes: u64) -> Self {
        self.non_sent_records = records;
        self.non_sent_bytes = bytes;
        self
    }

    /// Attach the HTTP status of the failed request.
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result == TaskResult::Success
    }

    pub fn is_error(&self) -> bool {
        !self.is_success()
    }

    /// True when the backend asked us to stop trying.
    pub fn do_not_retry(&self) -> bool {
        self.result == TaskResult::FatalError
    }
}

/// A unit of work run by a [`TaskExecutor`](crate::TaskExecutor).
///
/// Tasks run on executor worker threads and may block.
pub trait Task: Send + Sync {
    /// Run the task once.
    fn execute(&self) -> TaskExecutionInfo;

    /// Kind reported when the executor has to synthesize a result.
    fn task_type(&self) -> TaskType;
}

/// Receives the report of every execution of a task it was registered with.
pub trait TaskExecutionListener: Send + Sync {
    fn task_executed(&self, info: &TaskExecutionInfo);
}

/// Shared task reference.
pub type SharedTask = Arc<dyn Task>;

/// Shared listener reference.
pub type SharedListener = Arc<dyn TaskExecutionListener>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_info() {
        let info = TaskExecutionInfo::success(TaskType::ImpressionsRecorder);
        assert!(info.is_success());
        assert!(!info.is_error());
        assert!(!info.do_not_retry());
        assert_eq!(info.non_sent_records, 0);
        assert_eq!(info.http_status, None);
    }

    #[test]
    fn test_error_info_is_retryable() {
        let info = TaskExecutionInfo::error(TaskType::UniqueKeysRecorder).with_non_sent(10, 1500);
        assert!(info.is_error());
        assert!(!info.do_not_retry());
        assert_eq!(info.non_sent_records, 10);
        assert_eq!(info.non_sent_bytes, 1500);
    }

    #[test]
    fn test_fatal_info() {
        let info = TaskExecutionInfo::fatal(TaskType::ImpressionsCountRecorder).with_http_status(401);
        assert!(info.is_error());
        assert!(info.do_not_retry());
        assert_eq!(info.http_status, Some(401));
    }

    #[test]
    fn test_task_type_display() {
        assert_eq!(TaskType::SaveUniqueKeys.to_string(), "save_unique_keys");
        assert_eq!(TaskType::ImpressionsRecorder.as_str(), "impressions_recorder");
    }
}
