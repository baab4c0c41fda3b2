//! Impressions
//!
//! Records which treatment each user got for each flag and delivers that
//! telemetry in the background. Three modes trade detail for volume:
//!
//! - **Debug** queues every impression
//! - **Optimized** queues the first impression of a (key, flag, treatment,
//!   label) within the dedupe window and counts the repeats per hour
//! - **None** keeps only hourly counts and the set of flags each key saw
//!
//! [`StrategyImpressionManager`] is the entry point. Delivery runs on a
//! [`task_executor::TaskExecutor`], so the producer never waits on the network.

pub mod backoff;
pub mod config;
pub mod counter;
pub mod error;
pub mod factory;
pub mod hasher;
pub mod impression;
pub mod manager;
pub mod observer;
pub mod recorder;
pub mod stats;
pub mod storage;
pub mod strategy;
pub mod sync_helper;
pub mod tasks;
pub mod unique_keys;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use backoff::{BackoffCounter, RetryBackoffTimer, RetryPolicy};
pub use config::{ImpressionsConfig, ImpressionsMode};
pub use counter::{ImpressionsCountPerFeature, ImpressionsCounter};
pub use error::{ImpressionsError, ImpressionsResult};
pub use factory::{
    DefaultImpressionsTaskFactory, ImpressionsRecorders, ImpressionsStorages, ImpressionsTaskFactory,
};
pub use impression::{DecoratedImpression, Impression, KeyImpression};
pub use manager::{ImpressionManagerBuilder, StrategyImpressionManager};
pub use observer::ImpressionsObserver;
pub use recorder::{HttpRecorder, ImpressionsCount, RecorderError, TestImpressions, UniqueKeys};
pub use stats::{ImpressionStats, ImpressionStatsRecorder, ImpressionStatsSnapshot, ImpressionsDataType};
pub use storage::{
    InMemoryObserverCacheStorage, InMemoryRecordStorage, ObserverCacheStorage, RecordId,
    RecordStorage, StoredRecord,
};
pub use strategy::{
    ImpressionStrategyProvider, PeriodicTracker, ProcessStrategy, RecordingState, StrategyPair,
};
pub use sync_helper::RecorderSyncHelper;
pub use unique_keys::{UniqueKey, UniqueKeysTracker};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wall clock in epoch milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}


#[cfg(test)]
mod integration_tests {
    use std::time::Duration;

    use task_executor::TaskType;

    use super::*;
    use crate::counter::truncate_time_frame;
    use crate::test_support::Harness;

    const SECOND: i64 = 1_000;

    fn tracked(impression: Impression) -> DecoratedImpression {
        DecoratedImpression::new(impression, true)
    }

    #[test]
    fn test_optimized_window_scenario() {
        let harness = Harness::new(ImpressionsConfig::new(ImpressionsMode::Optimized));
        let manager = harness.manager();
        let base = 3_600_000 * 100;

        for offset in [0, 10 * SECOND, 4_000 * SECOND] {
            manager.push_impression(tracked(Impression::new("key", "flag", "on", base + offset)));
        }
        manager.stop_periodic_recording();
        harness.executor.run_pending();

        let queued = harness.storages.impressions.records();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].previous_time, None);
        assert_eq!(queued[1].time, base + 4_000 * SECOND);
        assert_eq!(queued[1].previous_time, Some(base + 10 * SECOND));

        let counts = harness.storages.counts.records();
        assert_eq!(
            counts,
            vec![ImpressionsCountPerFeature {
                feature: "flag".to_string(),
                time_frame: truncate_time_frame(base),
                count: 1,
            }]
        );
        assert_eq!(harness.stats.get(ImpressionsDataType::Queued), 2);
        assert_eq!(harness.stats.get(ImpressionsDataType::Deduped), 1);
    }

    #[test]
    fn test_flush_delivers_every_kind() {
        let harness = Harness::new(ImpressionsConfig::new(ImpressionsMode::Optimized));
        let manager = harness.manager();

        manager.push_impression(tracked(Impression::new("a", "flag", "on", 1_000)));
        manager.push_impression(tracked(Impression::new("a", "flag", "on", 2_000)));
        manager.push_impression(DecoratedImpression::new(
            Impression::new("b", "hidden", "off", 3_000),
            false,
        ));
        manager.flush();
        harness.executor.run_until_idle(5);

        let impressions = harness.recorders.impressions.payloads();
        assert_eq!(impressions.len(), 1);
        assert_eq!(impressions[0][0].feature, "flag");
        assert_eq!(impressions[0][0].impressions.len(), 1);

        let features: Vec<String> = harness
            .recorders
            .counts
            .payloads()
            .into_iter()
            .flat_map(|payload| payload.per_feature)
            .map(|count| count.feature)
            .collect();
        assert!(features.contains(&"flag".to_string()));
        assert!(features.contains(&"hidden".to_string()));

        let keys = harness.recorders.unique_keys.payloads();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].keys[0].key, "b");

        assert_eq!(harness.storages.impressions.count().unwrap(), 0);
        assert_eq!(harness.storages.counts.count().unwrap(), 0);
        assert_eq!(harness.storages.unique_keys.count().unwrap(), 0);
    }

    #[test]
    fn test_failed_flush_retries_with_backoff() {
        let config = ImpressionsConfig::new(ImpressionsMode::Debug).with_retry(1_000, 8_000, 0);
        let harness = Harness::new(config);
        let manager = harness.manager();
        harness.recorders.impressions.fail_with(500);

        manager.push_impression(tracked(Impression::new("key", "flag", "on", 1_000)));
        manager.flush();
        harness.executor.run_pending();

        assert_eq!(harness.recorders.impressions.calls(), 1);
        assert_eq!(harness.executor.scheduled_delays(), vec![Duration::from_secs(1)]);
        assert_eq!(harness.storages.impressions.active_count(), 1);

        harness.executor.run_pending();
        assert_eq!(harness.recorders.impressions.calls(), 2);
        assert_eq!(
            harness.executor.scheduled_delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(
            manager.recording_state(TaskType::ImpressionsRecorder),
            Some(RecordingState::Stopped)
        );

        harness.recorders.impressions.succeed();
        harness.executor.run_pending();
        assert_eq!(harness.recorders.impressions.calls(), 3);
        assert_eq!(harness.storages.impressions.count().unwrap(), 0);
        assert_eq!(harness.executor.pending_count(), 0);
    }

    #[test]
    fn test_observer_survives_restart_through_storage() {
        let harness = Harness::new(ImpressionsConfig::new(ImpressionsMode::Debug));
        let first = harness.manager();
        let now = now_millis();
        first.push_impression(tracked(Impression::new("key", "flag", "on", now)));
        first.stop_periodic_recording();
        assert_eq!(harness.observer_storage.len(), 1);

        let second = harness.manager();
        second.push_impression(tracked(Impression::new("key", "flag", "on", now + 5)));

        let queued = harness.storages.impressions.records();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].previous_time, Some(now));
    }

    #[test]
    fn test_queue_threshold_submits_recorder_early() {
        let config = ImpressionsConfig::new(ImpressionsMode::Debug).with_impressions_queue_size(3);
        let harness = Harness::new(config);
        let manager = harness.manager();

        for i in 0..3 {
            manager.push_impression(tracked(Impression::new(&format!("key-{i}"), "flag", "on", 1_000)));
        }

        assert_eq!(harness.executor.pending_count(), 1);
        harness.executor.run_pending();
        assert_eq!(harness.recorders.impressions.calls(), 1);
        assert_eq!(harness.storages.impressions.count().unwrap(), 0);
    }
}
