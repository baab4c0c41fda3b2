//! None mode: only counts and unique keys are kept.

use std::sync::Arc;

use task_executor::{SerialTask, SharedListener, SharedTask, TaskExecutor, TaskType};

use super::periodic::PeriodicTaskSlot;
use super::{DeliveryLatch, PeriodicTracker, ProcessStrategy, RecordingState, TrackingFlag};
use crate::backoff::RetryBackoffTimer;
use crate::counter::ImpressionsCounter;
use crate::factory::ImpressionsTaskFactory;
use crate::impression::Impression;
use crate::unique_keys::UniqueKeysTracker;

pub struct NoneStrategy {
    counter: Arc<ImpressionsCounter>,
    unique_keys: Arc<UniqueKeysTracker>,
    executor: Arc<dyn TaskExecutor>,
    task_factory: Arc<dyn ImpressionsTaskFactory>,
    unique_keys_latch: Arc<DeliveryLatch>,
    unique_keys_listener: SharedListener,
    tracking: TrackingFlag,
}

impl NoneStrategy {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        counter: Arc<ImpressionsCounter>,
        unique_keys: Arc<UniqueKeysTracker>,
        executor: Arc<dyn TaskExecutor>,
        task_factory: Arc<dyn ImpressionsTaskFactory>,
        unique_keys_latch: Arc<DeliveryLatch>,
        unique_keys_listener: SharedListener,
        tracking: TrackingFlag,
    ) -> Self {
        Self {
            counter,
            unique_keys,
            executor,
            task_factory,
            unique_keys_latch,
            unique_keys_listener,
            tracking,
        }
    }

    fn flush_full_tracker(&self) {
        let Some(keys) = self.unique_keys.pop_all_if_full() else {
            return;
        };
        tracing::debug!("Unique keys tracker full, flushing {} keys", keys.len());

        let save = self.task_factory.create_save_unique_keys_task(keys);
        if self.unique_keys_latch.is_tripped() {
            self.executor.submit(save, None);
            return;
        }
        let task: SharedTask = Arc::new(SerialTask::pair(
            save,
            self.task_factory.create_unique_keys_recorder_task(),
        ));
        self.executor
            .submit(task, Some(self.unique_keys_listener.clone()));
    }
}

impl ProcessStrategy for NoneStrategy {
    fn apply(&self, impression: &Impression) {
        if !self.tracking.is_enabled() {
            return;
        }
        self.counter.inc(&impression.flag_name, impression.time, 1);
        self.unique_keys
            .track(&impression.user_key, &impression.flag_name);
        self.flush_full_tracker();
    }

    fn enable_tracking(&self, enable: bool) {
        self.tracking.set(enable);
    }

    fn is_tracking_enabled(&self) -> bool {
        self.tracking.is_enabled()
    }
}

pub struct NoneTracker {
    counter: Arc<ImpressionsCounter>,
    unique_keys: Arc<UniqueKeysTracker>,
    executor: Arc<dyn TaskExecutor>,
    task_factory: Arc<dyn ImpressionsTaskFactory>,
    counts: Arc<PeriodicTaskSlot>,
    unique_keys_slot: Arc<PeriodicTaskSlot>,
    counts_timer: Arc<RetryBackoffTimer>,
    unique_keys_timer: Arc<RetryBackoffTimer>,
    tracking: TrackingFlag,
}

impl NoneTracker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        counter: Arc<ImpressionsCounter>,
        unique_keys: Arc<UniqueKeysTracker>,
        executor: Arc<dyn TaskExecutor>,
        task_factory: Arc<dyn ImpressionsTaskFactory>,
        counts: Arc<PeriodicTaskSlot>,
        unique_keys_slot: Arc<PeriodicTaskSlot>,
        counts_timer: Arc<RetryBackoffTimer>,
        unique_keys_timer: Arc<RetryBackoffTimer>,
        tracking: TrackingFlag,
    ) -> Self {
        Self {
            counter,
            unique_keys,
            executor,
            task_factory,
            counts,
            unique_keys_slot,
            counts_timer,
            unique_keys_timer,
            tracking,
        }
    }

    fn flush_counts(&self) {
        let task: SharedTask = if self.tracking.is_enabled() {
            Arc::new(SerialTask::pair(
                self.task_factory
                    .create_save_impressions_count_task(self.counter.pop_all()),
                self.task_factory.create_impressions_count_recorder_task(),
            ))
        } else {
            self.task_factory.create_impressions_count_recorder_task()
        };
        self.counts_timer.set_task(task, Some(self.counts.listener()));
        self.counts_timer.start();
    }

    fn flush_unique_keys(&self) {
        let task: SharedTask = if self.tracking.is_enabled() {
            Arc::new(SerialTask::pair(
                self.task_factory
                    .create_save_unique_keys_task(self.unique_keys.pop_all()),
                self.task_factory.create_unique_keys_recorder_task(),
            ))
        } else {
            self.task_factory.create_unique_keys_recorder_task()
        };
        self.unique_keys_timer
            .set_task(task, Some(self.unique_keys_slot.listener()));
        self.unique_keys_timer.start();
    }
}

impl PeriodicTracker for NoneTracker {
    fn flush(&self) {
        self.flush_counts();
        self.flush_unique_keys();
    }

    fn start_periodic_recording(&self) {
        self.counts.start(
            self.task_factory.create_impressions_count_recorder_task(),
            self.counts.listener(),
        );
        self.unique_keys_slot.start(
            self.task_factory.create_unique_keys_recorder_task(),
            self.unique_keys_slot.listener(),
        );
    }

    fn stop_periodic_recording(&self) {
        self.counts.stop();
        self.unique_keys_slot.stop();

        if !self.tracking.is_enabled() {
            return;
        }
        let counts = self.counter.pop_all();
        if !counts.is_empty() {
            self.executor.submit(
                self.task_factory.create_save_impressions_count_task(counts),
                None,
            );
        }
        let keys = self.unique_keys.pop_all();
        if !keys.is_empty() {
            self.executor
                .submit(self.task_factory.create_save_unique_keys_task(keys), None);
        }
    }

    fn enable_tracking(&self, enable: bool) {
        self.tracking.set(enable);
    }

    fn recording_state(&self, kind: TaskType) -> Option<RecordingState> {
        match kind {
            TaskType::ImpressionsCountRecorder => Some(self.counts.state()),
            TaskType::UniqueKeysRecorder => Some(self.unique_keys_slot.state()),
            _ => None,
        }
    }
}
