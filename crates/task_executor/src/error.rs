//! Error types for task executors.

use thiserror::Error;

/// Errors that can occur while setting up or using an executor.
#[derive(Debug, Error)]
pub enum TaskExecutorError {
    /// No Tokio runtime is available in the calling context
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    /// The executor no longer accepts work
    #[error("Task executor is shut down")]
    ShutDown,
}

/// Result type for executor operations.
pub type TaskExecutorResult<T> = Result<T, TaskExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TaskExecutorError::ShutDown;
        assert_eq!(err.to_string(), "Task executor is shut down");

        let err = TaskExecutorError::NoRuntime("not in a runtime".to_string());
        assert_eq!(err.to_string(), "No Tokio runtime available: not in a runtime");
    }
}
