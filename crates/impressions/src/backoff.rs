//! Retry with exponential backoff for flush deliveries.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use task_executor::{
    SharedListener, SharedTask, TaskExecutionInfo, TaskExecutionListener, TaskExecutor, TaskHandle,
};

use crate::lock;

/// Exponential delay sequence: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct BackoffCounter {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl BackoffCounter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Retry limits for a [`RetryBackoffTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Executions allowed per start. Zero means no limit.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1800),
            max_attempts: 3,
        }
    }
}

struct TimerState {
    task: Option<SharedTask>,
    listener: Option<SharedListener>,
    counter: BackoffCounter,
    generation: u64,
    executions: u32,
    handle: Option<TaskHandle>,
}

/// Runs a task until it succeeds, is refused permanently, or runs out of attempts.
///
/// The final report goes to the listener exactly once per start. Reports from
/// attempts made before the latest `set_task`, `start` or `stop` are ignored.
pub struct RetryBackoffTimer {
    executor: Arc<dyn TaskExecutor>,
    max_attempts: u32,
    state: Mutex<TimerState>,
    me: Weak<RetryBackoffTimer>,
}

impl RetryBackoffTimer {
    pub fn new(executor: Arc<dyn TaskExecutor>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            executor,
            max_attempts: policy.max_attempts,
            state: Mutex::new(TimerState {
                task: None,
                listener: None,
                counter: BackoffCounter::new(policy.base_delay, policy.max_delay),
                generation: 0,
                executions: 0,
                handle: None,
            }),
            me: me.clone(),
        })
    }

    /// Replace the task. Any retry in progress is abandoned.
    pub fn set_task(&self, task: SharedTask, listener: Option<SharedListener>) {
        let mut state = lock(&self.state);
        self.cancel(&mut state);
        state.task = Some(task);
        state.listener = listener;
    }

    /// Run the task now, restarting the delay sequence.
    pub fn start(&self) {
        let mut state = lock(&self.state);
        self.cancel(&mut state);
        let task = match state.task.clone() {
            Some(task) => task,
            None => {
                tracing::debug!("Retry timer started without a task");
                return;
            }
        };
        state.counter.reset();
        state.executions = 0;
        let listener = self.attempt_listener(state.generation);
        state.handle = self.executor.submit(task, Some(listener));
    }

    /// Abandon the pending attempt, if any.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        self.cancel(&mut state);
    }

    fn cancel(&self, state: &mut TimerState) {
        state.generation += 1;
        if let Some(handle) = state.handle.take() {
            self.executor.stop_task(&handle);
        }
    }

    fn attempt_listener(&self, generation: u64) -> SharedListener {
        Arc::new(AttemptListener {
            timer: self.me.clone(),
            generation,
        })
    }

    fn attempt_finished(&self, generation: u64, info: &TaskExecutionInfo) {
        let mut state = lock(&self.state);
        if generation != state.generation {
            tracing::debug!("Ignoring stale {} report", info.task_type);
            return;
        }
        state.handle = None;
        state.executions += 1;

        let exhausted = self.max_attempts > 0 && state.executions >= self.max_attempts;
        if info.is_success() || info.do_not_retry() || exhausted {
            if exhausted && info.is_error() && !info.do_not_retry() {
                tracing::warn!(
                    "{} still failing after {} attempts, giving up",
                    info.task_type,
                    state.executions
                );
            }
            state.generation += 1;
            let listener = state.listener.clone();
            drop(state);
            if let Some(listener) = listener {
                listener.task_executed(info);
            }
            return;
        }

        let Some(task) = state.task.clone() else {
            return;
        };
        let delay = state.counter.next_delay();
        tracing::debug!("Retrying {} in {:?}", info.task_type, delay);
        let listener = self.attempt_listener(state.generation);
        state.handle = self.executor.schedule(task, delay, Some(listener));
    }
}

struct AttemptListener {
    timer: Weak<RetryBackoffTimer>,
    generation: u64,
}

impl TaskExecutionListener for AttemptListener {
    fn task_executed(&self, info: &TaskExecutionInfo) {
        if let Some(timer) = self.timer.upgrade() {
            timer.attempt_finished(self.generation, info);
        }
    }
}
