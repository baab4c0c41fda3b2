//! Executor backed by a Tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{TaskExecutorError, TaskExecutorResult};
use crate::executor::{notify, TaskExecutor, TaskHandle};
use crate::lock;
use crate::task::{SharedListener, SharedTask, TaskExecutionInfo};

type Registry = Arc<Mutex<HashMap<TaskHandle, AbortHandle>>>;

/// Production executor.
///
/// Task bodies run on the blocking pool so that storage and network calls never
/// stall the async workers. Scheduled and recurring tasks are driven by Tokio
/// timers and cancelled by aborting their driver.
pub struct TokioTaskExecutor {
    runtime: Handle,
    running: Registry,
    shut_down: AtomicBool,
}

impl TokioTaskExecutor {
    /// Create an executor that spawns onto the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            running: Arc::new(Mutex::new(HashMap::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create an executor bound to the runtime of the calling context.
    pub fn current() -> TaskExecutorResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TaskExecutorError::NoRuntime(e.to_string()))
    }

    /// Number of tasks that are pending or recurring.
    pub fn active_count(&self) -> usize {
        lock(&self.running).len()
    }

    /// Whether [`TaskExecutor::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn check_accepting(&self) -> TaskExecutorResult<()> {
        if self.is_shut_down() {
            return Err(TaskExecutorError::ShutDown);
        }
        Ok(())
    }

    fn spawn_tracked<F>(&self, one_shot: bool, future: F) -> Option<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Err(e) = self.check_accepting() {
            tracing::warn!("Task rejected: {}", e);
            return None;
        }

        let handle = TaskHandle::new();
        let registry = Arc::clone(&self.running);
        let key = handle.clone();

        // Held across spawn so a fast one-shot cannot unregister before it is registered.
        let mut running = lock(&self.running);
        let join = self.runtime.spawn(async move {
            future.await;
            if one_shot {
                lock(&registry).remove(&key);
            }
        });
        running.insert(handle.clone(), join.abort_handle());

        Some(handle)
    }
}

async fn run_task(task: SharedTask, listener: Option<SharedListener>) {
    let task_type = task.task_type();
    let info = match tokio::task::spawn_blocking(move || task.execute()).await {
        Ok(info) => info,
        Err(e) => {
            tracing::error!("Task {} did not complete: {}", task_type, e);
            TaskExecutionInfo::error(task_type)
        }
    };
    notify(listener.as_ref(), &info);
}

impl TaskExecutor for TokioTaskExecutor {
    fn submit(&self, task: SharedTask, listener: Option<SharedListener>) -> Option<TaskHandle> {
        self.spawn_tracked(true, run_task(task, listener))
    }

    fn schedule(
        &self,
        task: SharedTask,
        delay: Duration,
        listener: Option<SharedListener>,
    ) -> Option<TaskHandle> {
        self.spawn_tracked(true, async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            run_task(task, listener).await;
        })
    }

    fn schedule_periodic(
        &self,
        task: SharedTask,
        initial_delay: Duration,
        period: Duration,
        listener: Option<SharedListener>,
    ) -> Option<TaskHandle> {
        if period.is_zero() {
            tracing::warn!("Refusing to schedule {} with a zero period", task.task_type());
            return None;
        }

        self.spawn_tracked(false, async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                run_task(Arc::clone(&task), listener.clone()).await;
            }
        })
    }

    fn stop_task(&self, handle: &TaskHandle) {
        if let Some(abort) = lock(&self.running).remove(handle) {
            abort.abort();
            tracing::debug!("Stopped task {}", handle);
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<AbortHandle> = lock(&self.running).drain().map(|(_, abort)| abort).collect();
        for abort in drained {
            abort.abort();
        }
        tracing::info!("Task executor shut down");
    }
}

impl Drop for TokioTaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskExecutionListener, TaskType};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct CountingTask {
        runs: AtomicUsize,
        info: TaskExecutionInfo,
    }

    impl CountingTask {
        fn new(info: TaskExecutionInfo) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                info,
            })
        }
    }

    impl Task for CountingTask {
        fn execute(&self) -> TaskExecutionInfo {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.info.clone()
        }

        fn task_type(&self) -> TaskType {
            self.info.task_type
        }
    }

    struct ChannelListener(mpsc::UnboundedSender<TaskExecutionInfo>);

    impl TaskExecutionListener for ChannelListener {
        fn task_executed(&self, info: &TaskExecutionInfo) {
            let _ = self.0.send(info.clone());
        }
    }

    fn channel() -> (SharedListener, mpsc::UnboundedReceiver<TaskExecutionInfo>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelListener(tx)), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TaskExecutionInfo>) -> TaskExecutionInfo {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("listener was not called")
            .expect("channel closed")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_runs_task_and_notifies() {
        let executor = TokioTaskExecutor::current().unwrap();
        let task = CountingTask::new(TaskExecutionInfo::success(TaskType::ImpressionsRecorder));
        let (listener, mut rx) = channel();

        assert!(executor.submit(task.clone(), Some(listener)).is_some());

        let info = next(&mut rx).await;
        assert_eq!(info.task_type, TaskType::ImpressionsRecorder);
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_periodic_task_repeats_until_stopped() {
        let executor = TokioTaskExecutor::current().unwrap();
        let task = CountingTask::new(TaskExecutionInfo::success(TaskType::UniqueKeysRecorder));
        let (listener, mut rx) = channel();

        let handle = executor
            .schedule_periodic(
                task.clone(),
                Duration::ZERO,
                Duration::from_millis(20),
                Some(listener),
            )
            .unwrap();

        next(&mut rx).await;
        next(&mut rx).await;
        executor.stop_task(&handle);
        assert_eq!(executor.active_count(), 0);

        let runs = task.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        // At most one execution that was already in flight may land after stop.
        assert!(task.runs.load(Ordering::SeqCst) <= runs + 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stopped_delayed_task_never_runs() {
        let executor = TokioTaskExecutor::current().unwrap();
        let task = CountingTask::new(TaskExecutionInfo::success(TaskType::Generic));

        let handle = executor
            .schedule(task.clone(), Duration::from_millis(200), None)
            .unwrap();
        executor.stop_task(&handle);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_period_is_rejected() {
        let executor = TokioTaskExecutor::current().unwrap();
        let task = CountingTask::new(TaskExecutionInfo::success(TaskType::Generic));
        assert!(executor
            .schedule_periodic(task, Duration::ZERO, Duration::ZERO, None)
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_rejects_new_work() {
        let executor = TokioTaskExecutor::current().unwrap();
        let task = CountingTask::new(TaskExecutionInfo::success(TaskType::Generic));
        executor
            .schedule_periodic(task.clone(), Duration::from_secs(60), Duration::from_secs(60), None)
            .unwrap();

        executor.shutdown();

        assert!(executor.is_shut_down());
        assert_eq!(executor.active_count(), 0);
        assert!(executor.submit(task, None).is_none());
    }

    #[test]
    fn test_current_without_runtime_fails() {
        let result = TokioTaskExecutor::current();
        assert!(matches!(result, Err(TaskExecutorError::NoRuntime(_))));
    }
}
