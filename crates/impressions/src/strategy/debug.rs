//! Debug mode: every impression is queued.

use std::sync::Arc;

use task_executor::TaskType;

use super::periodic::PeriodicTaskSlot;
use super::{ImpressionsQueue, PeriodicTracker, ProcessStrategy, RecordingState, TrackingFlag};
use crate::backoff::RetryBackoffTimer;
use crate::impression::Impression;
use crate::observer::ImpressionsObserver;

pub struct DebugStrategy {
    observer: Arc<ImpressionsObserver>,
    queue: Arc<ImpressionsQueue>,
    tracking: TrackingFlag,
}

impl DebugStrategy {
    pub(crate) fn new(
        observer: Arc<ImpressionsObserver>,
        queue: Arc<ImpressionsQueue>,
        tracking: TrackingFlag,
    ) -> Self {
        Self {
            observer,
            queue,
            tracking,
        }
    }
}

impl ProcessStrategy for DebugStrategy {
    fn apply(&self, impression: &Impression) {
        if !self.tracking.is_enabled() {
            return;
        }
        if impression.has_properties() {
            self.queue.push(impression);
        } else {
            let previous = self.observer.test_and_set(impression);
            self.queue.push(&impression.with_previous_time(previous));
        }
    }

    fn enable_tracking(&self, enable: bool) {
        self.tracking.set(enable);
    }

    fn is_tracking_enabled(&self) -> bool {
        self.tracking.is_enabled()
    }
}

pub struct DebugTracker {
    observer: Arc<ImpressionsObserver>,
    queue: Arc<ImpressionsQueue>,
    impressions: Arc<PeriodicTaskSlot>,
    impressions_timer: Arc<RetryBackoffTimer>,
    tracking: TrackingFlag,
}

impl DebugTracker {
    pub(crate) fn new(
        observer: Arc<ImpressionsObserver>,
        queue: Arc<ImpressionsQueue>,
        impressions: Arc<PeriodicTaskSlot>,
        impressions_timer: Arc<RetryBackoffTimer>,
        tracking: TrackingFlag,
    ) -> Self {
        Self {
            observer,
            queue,
            impressions,
            impressions_timer,
            tracking,
        }
    }
}

impl PeriodicTracker for DebugTracker {
    fn flush(&self) {
        self.impressions_timer.set_task(
            self.queue.task_factory.create_impressions_recorder_task(),
            Some(self.queue.listener()),
        );
        self.impressions_timer.start();
    }

    fn start_periodic_recording(&self) {
        self.impressions.start(
            self.queue.task_factory.create_impressions_recorder_task(),
            self.queue.listener(),
        );
    }

    fn stop_periodic_recording(&self) {
        self.impressions.stop();
        if let Err(e) = self.observer.persist() {
            tracing::error!("Could not persist impressions observer: {}", e);
        }
    }

    fn enable_tracking(&self, enable: bool) {
        self.tracking.set(enable);
    }

    fn recording_state(&self, kind: TaskType) -> Option<RecordingState> {
        (kind == TaskType::ImpressionsRecorder).then(|| self.impressions.state())
    }
}
