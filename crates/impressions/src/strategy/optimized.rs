//! Optimized mode: repeats within the dedupe window are counted, not queued.

use std::sync::Arc;

use task_executor::{SerialTask, SharedTask, TaskType};

use super::periodic::PeriodicTaskSlot;
use super::{ImpressionsQueue, PeriodicTracker, ProcessStrategy, RecordingState, TrackingFlag};
use crate::backoff::RetryBackoffTimer;
use crate::counter::ImpressionsCounter;
use crate::impression::Impression;
use crate::observer::ImpressionsObserver;
use crate::stats::{ImpressionStatsRecorder, ImpressionsDataType};

pub struct OptimizedStrategy {
    observer: Arc<ImpressionsObserver>,
    counter: Arc<ImpressionsCounter>,
    queue: Arc<ImpressionsQueue>,
    stats: Arc<dyn ImpressionStatsRecorder>,
    dedupe_time_interval_ms: i64,
    tracking: TrackingFlag,
}

impl OptimizedStrategy {
    pub(crate) fn new(
        observer: Arc<ImpressionsObserver>,
        counter: Arc<ImpressionsCounter>,
        queue: Arc<ImpressionsQueue>,
        stats: Arc<dyn ImpressionStatsRecorder>,
        dedupe_time_interval_ms: u64,
        tracking: TrackingFlag,
    ) -> Self {
        Self {
            observer,
            counter,
            queue,
            stats,
            dedupe_time_interval_ms: i64::try_from(dedupe_time_interval_ms).unwrap_or(i64::MAX),
            tracking,
        }
    }
}

impl ProcessStrategy for OptimizedStrategy {
    fn apply(&self, impression: &Impression) {
        if !self.tracking.is_enabled() {
            return;
        }
        if impression.has_properties() {
            self.queue.push(impression);
            return;
        }

        match self.observer.test_and_set(impression) {
            None => self.queue.push(impression),
            Some(previous)
                if impression.time.saturating_sub(previous) > self.dedupe_time_interval_ms =>
            {
                self.queue.push(&impression.with_previous_time(Some(previous)));
            }
            Some(previous) => {
                self.counter.inc(&impression.flag_name, previous, 1);
                self.stats
                    .record_impression_stats(ImpressionsDataType::Deduped, 1);
            }
        }
    }

    fn enable_tracking(&self, enable: bool) {
        self.tracking.set(enable);
    }

    fn is_tracking_enabled(&self) -> bool {
        self.tracking.is_enabled()
    }
}

pub struct OptimizedTracker {
    observer: Arc<ImpressionsObserver>,
    counter: Arc<ImpressionsCounter>,
    queue: Arc<ImpressionsQueue>,
    impressions: Arc<PeriodicTaskSlot>,
    counts: Arc<PeriodicTaskSlot>,
    impressions_timer: Arc<RetryBackoffTimer>,
    counts_timer: Arc<RetryBackoffTimer>,
    tracking: TrackingFlag,
}

impl OptimizedTracker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        observer: Arc<ImpressionsObserver>,
        counter: Arc<ImpressionsCounter>,
        queue: Arc<ImpressionsQueue>,
        impressions: Arc<PeriodicTaskSlot>,
        counts: Arc<PeriodicTaskSlot>,
        impressions_timer: Arc<RetryBackoffTimer>,
        counts_timer: Arc<RetryBackoffTimer>,
        tracking: TrackingFlag,
    ) -> Self {
        Self {
            observer,
            counter,
            queue,
            impressions,
            counts,
            impressions_timer,
            counts_timer,
            tracking,
        }
    }

    fn flush_counts(&self) {
        let factory = &self.queue.task_factory;
        let task: SharedTask = if self.tracking.is_enabled() {
            Arc::new(SerialTask::pair(
                factory.create_save_impressions_count_task(self.counter.pop_all()),
                factory.create_impressions_count_recorder_task(),
            ))
        } else {
            factory.create_impressions_count_recorder_task()
        };
        self.counts_timer.set_task(task, Some(self.counts.listener()));
        self.counts_timer.start();
    }
}

impl PeriodicTracker for OptimizedTracker {
    fn flush(&self) {
        self.impressions_timer.set_task(
            self.queue.task_factory.create_impressions_recorder_task(),
            Some(self.queue.listener()),
        );
        self.impressions_timer.start();
        self.flush_counts();
    }

    fn start_periodic_recording(&self) {
        let factory = &self.queue.task_factory;
        self.impressions.start(
            factory.create_impressions_recorder_task(),
            self.queue.listener(),
        );
        self.counts.start(
            factory.create_impressions_count_recorder_task(),
            self.counts.listener(),
        );
    }

    fn stop_periodic_recording(&self) {
        self.impressions.stop();
        self.counts.stop();

        if self.tracking.is_enabled() {
            let counts = self.counter.pop_all();
            if !counts.is_empty() {
                self.queue.executor.submit(
                    self.queue.task_factory.create_save_impressions_count_task(counts),
                    None,
                );
            }
        }
        if let Err(e) = self.observer.persist() {
            tracing::error!("Could not persist impressions observer: {}", e);
        }
    }

    fn enable_tracking(&self, enable: bool) {
        self.tracking.set(enable);
    }

    fn recording_state(&self, kind: TaskType) -> Option<RecordingState> {
        match kind {
            TaskType::ImpressionsRecorder => Some(self.impressions.state()),
            TaskType::ImpressionsCountRecorder => Some(self.counts.state()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use task_executor::TaskType;

    use crate::config::{ImpressionsConfig, ImpressionsMode};
    use crate::counter::truncate_time_frame;
    use crate::impression::Impression;
    use crate::stats::ImpressionsDataType;
    use crate::storage::RecordStorage;
    use crate::strategy::RecordingState;
    use crate::test_support::Harness;

    const HOUR: i64 = 3_600_000;

    fn harness() -> Harness {
        Harness::new(ImpressionsConfig::new(ImpressionsMode::Optimized))
    }

    #[test]
    fn test_repeats_inside_window_are_counted() {
        let harness = harness();
        let pair = harness.provider.get_strategy(ImpressionsMode::Optimized);
        let base = 10 * HOUR + 5_000;

        pair.strategy.apply(&Impression::new("key", "flag", "on", base));
        pair.strategy.apply(&Impression::new("key", "flag", "on", base + 1_000));
        pair.strategy.apply(&Impression::new("key", "flag", "on", base + 2_000));
        pair.tracker.stop_periodic_recording();
        harness.executor.run_pending();

        assert_eq!(harness.storages.impressions.count().unwrap(), 1);
        let counts = harness.storages.counts.records();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].time_frame, truncate_time_frame(base));
        assert_eq!(counts[0].count, 2);
        assert_eq!(harness.stats.get(ImpressionsDataType::Deduped), 2);
        assert_eq!(harness.stats.get(ImpressionsDataType::Queued), 1);
    }

    #[test]
    fn test_impressions_with_properties_are_always_queued() {
        let harness = harness();
        let pair = harness.provider.get_strategy(ImpressionsMode::Optimized);
        let impression = Impression::new("key", "flag", "on", 1_000).with_properties("{\"plan\":\"pro\"}");

        pair.strategy.apply(&impression);
        pair.strategy.apply(&impression);

        let queued = harness.storages.impressions.records();
        assert_eq!(queued.len(), 2);
        assert!(queued
            .iter()
            .all(|record| record.properties.as_deref() == Some("{\"plan\":\"pro\"}")));
        assert_eq!(harness.stats.get(ImpressionsDataType::Deduped), 0);
    }

    #[test]
    fn test_custom_dedupe_window() {
        let config = ImpressionsConfig::new(ImpressionsMode::Optimized).with_dedupe_time_interval_ms(500);
        let harness = Harness::new(config);
        let pair = harness.provider.get_strategy(ImpressionsMode::Optimized);

        pair.strategy.apply(&Impression::new("key", "flag", "on", 1_000));
        pair.strategy.apply(&Impression::new("key", "flag", "on", 1_400));
        pair.strategy.apply(&Impression::new("key", "flag", "on", 2_000));

        let queued = harness.storages.impressions.records();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].previous_time, Some(1_400));
    }

    #[test]
    fn test_disabled_then_enabled_does_not_replay() {
        let harness = harness();
        let pair = harness.provider.get_strategy(ImpressionsMode::Optimized);

        pair.tracker.enable_tracking(false);
        for i in 0..5 {
            pair.strategy.apply(&Impression::new("key", "flag", "on", 1_000 + i));
        }
        pair.tracker.enable_tracking(true);
        pair.tracker.stop_periodic_recording();
        harness.executor.run_pending();

        assert_eq!(harness.storages.impressions.count().unwrap(), 0);
        assert_eq!(harness.storages.counts.count().unwrap(), 0);
        assert!(harness.observer_storage.is_empty());
    }

    #[test]
    fn test_flush_saves_then_records_counts() {
        let harness = harness();
        let pair = harness.provider.get_strategy(ImpressionsMode::Optimized);
        pair.strategy.apply(&Impression::new("key", "flag", "on", 1_000));
        pair.strategy.apply(&Impression::new("key", "flag", "on", 2_000));

        pair.tracker.flush();
        harness.executor.run_pending();

        let counts = harness.recorders.counts.payloads();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].per_feature[0].feature, "flag");
        assert_eq!(counts[0].per_feature[0].count, 1);
        assert_eq!(harness.recorders.impressions.calls(), 1);
        assert_eq!(harness.storages.counts.count().unwrap(), 0);
    }

    #[test]
    fn test_start_schedules_impressions_and_counts() {
        let harness = harness();
        let pair = harness.provider.get_strategy(ImpressionsMode::Optimized);

        pair.tracker.start_periodic_recording();

        let mut kinds: Vec<TaskType> = harness
            .executor
            .periodic_schedules()
            .into_iter()
            .map(|(kind, _, _)| kind)
            .collect();
        kinds.sort_by_key(|kind| kind.as_str());
        assert_eq!(
            kinds,
            vec![TaskType::ImpressionsCountRecorder, TaskType::ImpressionsRecorder]
        );
    }

    #[test]
    fn test_refused_counts_stay_latched() {
        let harness = harness();
        let pair = harness.provider.get_strategy(ImpressionsMode::Optimized);
        harness.recorders.counts.fail_with(403);
        pair.strategy.apply(&Impression::new("key", "flag", "on", 1_000));
        pair.strategy.apply(&Impression::new("key", "flag", "on", 2_000));

        pair.tracker.flush();
        harness.executor.run_pending();

        assert_eq!(
            pair.tracker.recording_state(TaskType::ImpressionsCountRecorder),
            Some(RecordingState::Latched)
        );
        assert_eq!(harness.executor.delayed_count(), 0);

        pair.tracker.start_periodic_recording();
        let kinds: Vec<TaskType> = harness
            .executor
            .periodic_schedules()
            .into_iter()
            .map(|(kind, _, _)| kind)
            .collect();
        assert_eq!(kinds, vec![TaskType::ImpressionsRecorder]);
        assert_eq!(
            pair.tracker.recording_state(TaskType::ImpressionsRecorder),
            Some(RecordingState::Running)
        );
        assert_eq!(harness.storages.counts.count().unwrap(), 1);
    }
}
