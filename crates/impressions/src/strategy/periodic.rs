//! Recurring delivery of one task kind.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use task_executor::{
    SharedListener, SharedTask, TaskExecutionInfo, TaskExecutionListener, TaskExecutor, TaskHandle,
    TaskType,
};

use super::{DeliveryLatch, RecordingState};
use crate::lock;

struct SlotState {
    handle: Option<TaskHandle>,
    state: RecordingState,
}

/// Owns the single recurring schedule of a task kind.
///
/// A report with a fatal result for the kind trips the latch and cancels the
/// schedule. Once latched the slot refuses to start again.
pub struct PeriodicTaskSlot {
    kind: TaskType,
    executor: Arc<dyn TaskExecutor>,
    interval: Duration,
    latch: Arc<DeliveryLatch>,
    slot: Mutex<SlotState>,
    me: Weak<PeriodicTaskSlot>,
}

impl PeriodicTaskSlot {
    /// Create a stopped slot for `kind` that runs every `interval`.
    pub fn new(
        kind: TaskType,
        executor: Arc<dyn TaskExecutor>,
        interval: Duration,
        latch: Arc<DeliveryLatch>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            kind,
            executor,
            interval,
            latch,
            slot: Mutex::new(SlotState {
                handle: None,
                state: RecordingState::Stopped,
            }),
            me: me.clone(),
        })
    }

    /// Schedule `task` every interval, replacing any previous schedule.
    pub fn start(&self, task: SharedTask, listener: SharedListener) {
        let mut slot = lock(&self.slot);
        if self.latch.is_tripped() {
            slot.state = RecordingState::Latched;
            tracing::debug!("Not starting {}: delivery disabled by the backend", self.kind);
            return;
        }
        if let Some(previous) = slot.handle.take() {
            self.executor.stop_task(&previous);
        }
        slot.handle = self
            .executor
            .schedule_periodic(task, Duration::ZERO, self.interval, Some(listener));
        slot.state = if slot.handle.is_some() {
            RecordingState::Running
        } else {
            RecordingState::Stopped
        };
    }

    /// Cancel the live schedule. A latched slot stays latched.
    pub fn stop(&self) {
        let mut slot = lock(&self.slot);
        if let Some(handle) = slot.handle.take() {
            self.executor.stop_task(&handle);
        }
        if slot.state != RecordingState::Latched {
            slot.state = RecordingState::Stopped;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecordingState {
        if self.latch.is_tripped() {
            return RecordingState::Latched;
        }
        lock(&self.slot).state
    }

    /// Kind of task this slot schedules.
    pub fn kind(&self) -> TaskType {
        self.kind
    }

    pub fn latch(&self) -> &Arc<DeliveryLatch> {
        &self.latch
    }

    /// Handle of the live schedule.
    pub fn handle(&self) -> Option<TaskHandle> {
        lock(&self.slot).handle.clone()
    }

    /// Listener that reports to this slot without keeping it alive.
    pub fn listener(&self) -> SharedListener {
        Arc::new(SlotListener {
            slot: self.me.clone(),
        })
    }
}

impl TaskExecutionListener for PeriodicTaskSlot {
    fn task_executed(&self, info: &TaskExecutionInfo) {
        if info.task_type != self.kind || !info.do_not_retry() {
            return;
        }

        self.latch.trip();
        let mut slot = lock(&self.slot);
        slot.state = RecordingState::Latched;
        if let Some(handle) = slot.handle.take() {
            self.executor.stop_task(&handle);
        }
        tracing::error!(
            "{} refused by the backend (status {:?}), periodic delivery disabled",
            self.kind,
            info.http_status
        );
    }
}

struct SlotListener {
    slot: Weak<PeriodicTaskSlot>,
}

impl TaskExecutionListener for SlotListener {
    fn task_executed(&self, info: &TaskExecutionInfo) {
        if let Some(slot) = self.slot.upgrade() {
            slot.task_executed(info);
        }
    }
}
