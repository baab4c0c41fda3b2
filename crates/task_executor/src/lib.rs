//! Task Executor
//!
//! Background work model used by the impressions pipeline. Work is expressed as
//! [`Task`]s that report a [`TaskExecutionInfo`] to an optional
//! [`TaskExecutionListener`]. A [`TaskExecutor`] runs them immediately, after a
//! delay, or on a fixed period.
//!
//! Two executors are provided:
//!
//! - [`TokioTaskExecutor`] runs task bodies on the Tokio blocking pool
//! - [`ManualTaskExecutor`] runs nothing until the host drives it
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use task_executor::{
//!     ManualTaskExecutor, Task, TaskExecutionInfo, TaskExecutor, TaskType,
//! };
//!
//! struct Ping;
//!
//! impl Task for Ping {
//!     fn execute(&self) -> TaskExecutionInfo {
//!         TaskExecutionInfo::success(TaskType::Generic)
//!     }
//!
//!     fn task_type(&self) -> TaskType {
//!         TaskType::Generic
//!     }
//! }
//!
//! let executor = ManualTaskExecutor::new();
//! executor.submit(Arc::new(Ping), None);
//! assert_eq!(executor.run_pending(), 1);
//! ```

pub mod error;
pub mod executor;
pub mod manual;
pub mod serial;
pub mod task;
pub mod tokio_executor;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use error::{TaskExecutorError, TaskExecutorResult};
pub use executor::{TaskExecutor, TaskHandle};
pub use manual::ManualTaskExecutor;
pub use serial::SerialTask;
pub use task::{
    SharedListener, SharedTask, Task, TaskExecutionInfo, TaskExecutionListener, TaskResult,
    TaskType,
};
pub use tokio_executor::TokioTaskExecutor;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
