//! Deterministic executor driven by the caller.
//!
//! Nothing runs until the host asks for it. Submitted and delayed tasks wait in
//! a queue for [`ManualTaskExecutor::run_pending`]. Recurring tasks fire only
//! through [`ManualTaskExecutor::tick_periodic`]. Every submission, schedule and
//! cancellation is recorded so that callers can assert on them.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{TaskExecutorError, TaskExecutorResult};
use crate::executor::{notify, TaskExecutor, TaskHandle};
use crate::lock;
use crate::task::{SharedListener, SharedTask, TaskExecutionInfo, TaskType};

struct QueuedTask {
    handle: TaskHandle,
    task: SharedTask,
    listener: Option<SharedListener>,
}

struct PeriodicTask {
    handle: TaskHandle,
    task: SharedTask,
    listener: Option<SharedListener>,
    initial_delay: Duration,
    period: Duration,
}

#[derive(Default)]
struct State {
    pending: VecDeque<QueuedTask>,
    periodic: Vec<PeriodicTask>,
    submitted: usize,
    delays: Vec<Duration>,
    stopped: Vec<TaskHandle>,
    executed: Vec<TaskType>,
    shut_down: bool,
}

/// Executor for hosts that want to decide when background work happens.
#[derive(Default)]
pub struct ManualTaskExecutor {
    state: Mutex<State>,
}

impl ManualTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_accepting(state: &State) -> TaskExecutorResult<()> {
        if state.shut_down {
            return Err(TaskExecutorError::ShutDown);
        }
        Ok(())
    }

    fn enqueue(&self, task: SharedTask, listener: Option<SharedListener>) -> Option<TaskHandle> {
        let mut state = lock(&self.state);
        if let Err(e) = Self::check_accepting(&state) {
            tracing::warn!("Task {} rejected: {}", task.task_type(), e);
            return None;
        }
        let handle = TaskHandle::new();
        state.pending.push_back(QueuedTask {
            handle: handle.clone(),
            task,
            listener,
        });
        Some(handle)
    }

    fn run_one(&self, task: &SharedTask, listener: Option<&SharedListener>) -> TaskExecutionInfo {
        let info = task.execute();
        lock(&self.state).executed.push(info.task_type);
        notify(listener, &info);
        info
    }

    /// Run every task queued so far, in submission order.
    ///
    /// Tasks queued while this runs wait for the next call. Returns the number
    /// of tasks executed.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<QueuedTask> = lock(&self.state).pending.drain(..).collect();
        for queued in &batch {
            self.run_one(&queued.task, queued.listener.as_ref());
        }
        batch.len()
    }

    /// Keep running queued tasks until the queue is empty or `max_rounds`
    /// calls to [`run_pending`](Self::run_pending) were made.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_rounds {
            let ran = self.run_pending();
            if ran == 0 {
                break;
            }
            total += ran;
        }
        total
    }

    /// Fire one tick of a recurring task. Returns `None` if the handle is not live.
    pub fn tick_periodic(&self, handle: &TaskHandle) -> Option<TaskExecutionInfo> {
        let (task, listener) = {
            let state = lock(&self.state);
            let periodic = state.periodic.iter().find(|p| &p.handle == handle)?;
            (periodic.task.clone(), periodic.listener.clone())
        };
        Some(self.run_one(&task, listener.as_ref()))
    }

    /// Fire one tick of every live recurring task.
    pub fn tick_all_periodic(&self) -> Vec<TaskExecutionInfo> {
        self.periodic_handles()
            .iter()
            .filter_map(|handle| self.tick_periodic(handle))
            .collect()
    }

    /// Tasks waiting for [`run_pending`](Self::run_pending).
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Number of immediate submissions accepted so far.
    pub fn submitted_count(&self) -> usize {
        lock(&self.state).submitted
    }

    /// Number of delayed schedules accepted so far.
    pub fn delayed_count(&self) -> usize {
        lock(&self.state).delays.len()
    }

    /// Delays passed to [`TaskExecutor::schedule`], in call order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        lock(&self.state).delays.clone()
    }

    /// Handles of recurring tasks that have not been stopped.
    pub fn periodic_handles(&self) -> Vec<TaskHandle> {
        lock(&self.state)
            .periodic
            .iter()
            .map(|p| p.handle.clone())
            .collect()
    }

    /// Kind, initial delay and period of every live recurring task.
    pub fn periodic_schedules(&self) -> Vec<(TaskType, Duration, Duration)> {
        lock(&self.state)
            .periodic
            .iter()
            .map(|p| (p.task.task_type(), p.initial_delay, p.period))
            .collect()
    }

    /// Handles passed to [`TaskExecutor::stop_task`], in call order.
    pub fn stopped_handles(&self) -> Vec<TaskHandle> {
        lock(&self.state).stopped.clone()
    }

    /// Kinds reported by every execution so far, in order.
    pub fn executed_task_types(&self) -> Vec<TaskType> {
        lock(&self.state).executed.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.state).shut_down
    }
}

impl TaskExecutor for ManualTaskExecutor {
    fn submit(&self, task: SharedTask, listener: Option<SharedListener>) -> Option<TaskHandle> {
        let handle = self.enqueue(task, listener)?;
        lock(&self.state).submitted += 1;
        Some(handle)
    }

    fn schedule(
        &self,
        task: SharedTask,
        delay: Duration,
        listener: Option<SharedListener>,
    ) -> Option<TaskHandle> {
        let handle = self.enqueue(task, listener)?;
        lock(&self.state).delays.push(delay);
        Some(handle)
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

        let mut state = lock(&self.state);
        if let Err(e) = Self::check_accepting(&state) {
            tracing::warn!("Task {} rejected: {}", task.task_type(), e);
            return None;
        }
        let handle = TaskHandle::new();
        state.periodic.push(PeriodicTask {
            handle: handle.clone(),
            task,
            listener,
            initial_delay,
            period,
        });
        Some(handle)
    }

    fn stop_task(&self, handle: &TaskHandle) {
        let mut state = lock(&self.state);
        state.pending.retain(|q| &q.handle != handle);
        state.periodic.retain(|p| &p.handle != handle);
        state.stopped.push(handle.clone());
    }

    fn shutdown(&self) {
        let mut state = lock(&self.state);
        state.pending.clear();
        state.periodic.clear();
        state.shut_down = true;
    }
}
