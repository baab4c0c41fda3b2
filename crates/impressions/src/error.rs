//! Error types for the impressions pipeline.

use thiserror::Error;

use task_executor::TaskExecutorError;

use crate::recorder::RecorderError;

/// Errors that can occur while storing, persisting or delivering impressions.
#[derive(Debug, Error)]
pub enum ImpressionsError {
    /// A storage backend rejected an operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Failed to serialize or deserialize a record
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The backend refused a payload
    #[error(transparent)]
    Recorder(#[from] RecorderError),

    /// No executor could be obtained for background delivery
    #[error(transparent)]
    Executor(#[from] TaskExecutorError),
}

/// Result type for impressions operations.
pub type ImpressionsResult<T> = Result<T, ImpressionsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImpressionsError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "Storage error: disk full");

        let err = ImpressionsError::Config("negative refresh rate".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: negative refresh rate");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err: Result<(), serde_json::Error> = serde_json::from_str::<()>("invalid json");
        let err: ImpressionsError = json_err.unwrap_err().into();
        assert!(matches!(err, ImpressionsError::Serialization(_)));
    }

    #[test]
    fn test_recorder_error_conversion() {
        let err: ImpressionsError = RecorderError::new("boom").with_http_status(500).into();
        assert!(matches!(err, ImpressionsError::Recorder(_)));
        assert!(err.to_string().contains("boom"));
    }
}
