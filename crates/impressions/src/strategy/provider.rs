//! Assembles strategy and tracker pairs from configuration.

use std::sync::Arc;

use task_executor::{TaskExecutor, TaskType};

use super::{
    DebugStrategy, DebugTracker, DeliveryLatch, ImpressionsQueue, NoneStrategy, NoneTracker,
    OptimizedStrategy, OptimizedTracker, PeriodicTaskSlot, PeriodicTracker, ProcessStrategy,
    TrackingFlag,
};
use crate::backoff::RetryBackoffTimer;
use crate::config::{ImpressionsConfig, ImpressionsMode};
use crate::counter::ImpressionsCounter;
use crate::factory::ImpressionsTaskFactory;
use crate::impression::KeyImpression;
use crate::observer::ImpressionsObserver;
use crate::stats::ImpressionStatsRecorder;
use crate::storage::{ObserverCacheStorage, RecordStorage};
use crate::sync_helper::RecorderSyncHelper;
use crate::unique_keys::UniqueKeysTracker;

/// A strategy together with the tracker that delivers what it produces.
#[derive(Clone)]
pub struct StrategyPair {
    pub strategy: Arc<dyn ProcessStrategy>,
    pub tracker: Arc<dyn PeriodicTracker>,
}

/// Builds [`StrategyPair`]s.
///
/// Every pair gets its own in-memory state. The delivery latches live here so
/// a kind refused by the backend stays refused for every pair built by the
/// same provider.
pub struct ImpressionStrategyProvider {
    config: ImpressionsConfig,
    executor: Arc<dyn TaskExecutor>,
    task_factory: Arc<dyn ImpressionsTaskFactory>,
    impressions_storage: Arc<dyn RecordStorage<KeyImpression>>,
    observer_storage: Arc<dyn ObserverCacheStorage>,
    stats: Arc<dyn ImpressionStatsRecorder>,
    impressions_latch: Arc<DeliveryLatch>,
    counts_latch: Arc<DeliveryLatch>,
    unique_keys_latch: Arc<DeliveryLatch>,
}

impl ImpressionStrategyProvider {
    pub fn new(
        config: ImpressionsConfig,
        executor: Arc<dyn TaskExecutor>,
        task_factory: Arc<dyn ImpressionsTaskFactory>,
        impressions_storage: Arc<dyn RecordStorage<KeyImpression>>,
        observer_storage: Arc<dyn ObserverCacheStorage>,
        stats: Arc<dyn ImpressionStatsRecorder>,
    ) -> Self {
        Self {
            config: config.validated(),
            executor,
            task_factory,
            impressions_storage,
            observer_storage,
            stats,
            impressions_latch: Arc::new(DeliveryLatch::new()),
            counts_latch: Arc::new(DeliveryLatch::new()),
            unique_keys_latch: Arc::new(DeliveryLatch::new()),
        }
    }

    pub fn config(&self) -> &ImpressionsConfig {
        &self.config
    }

    pub fn get_strategy(&self, mode: ImpressionsMode) -> StrategyPair {
        tracing::debug!("Building {} impressions strategy", mode);
        match mode {
            ImpressionsMode::Debug => self.debug_pair(),
            ImpressionsMode::Optimized => self.optimized_pair(),
            ImpressionsMode::None => self.get_none_strategy(),
        }
    }

    pub fn get_none_strategy(&self) -> StrategyPair {
        let tracking = TrackingFlag::new(self.config.tracking_enabled);
        let counter = Arc::new(ImpressionsCounter::new());
        let unique_keys = Arc::new(UniqueKeysTracker::new(self.config.unique_keys_max_size));
        let counts = self.counts_slot();
        let unique_keys_slot = PeriodicTaskSlot::new(
            TaskType::UniqueKeysRecorder,
            self.executor.clone(),
            self.config.unique_keys_refresh_rate(),
            self.unique_keys_latch.clone(),
        );

        let strategy = NoneStrategy::new(
            counter.clone(),
            unique_keys.clone(),
            self.executor.clone(),
            self.task_factory.clone(),
            self.unique_keys_latch.clone(),
            unique_keys_slot.listener(),
            tracking.clone(),
        );
        let tracker = NoneTracker::new(
            counter,
            unique_keys,
            self.executor.clone(),
            self.task_factory.clone(),
            counts,
            unique_keys_slot,
            self.timer(),
            self.timer(),
            tracking,
        );
        StrategyPair {
            strategy: Arc::new(strategy),
            tracker: Arc::new(tracker),
        }
    }

    fn debug_pair(&self) -> StrategyPair {
        let tracking = TrackingFlag::new(self.config.tracking_enabled);
        let observer = self.observer();
        let (queue, impressions) = self.queue();

        let strategy = DebugStrategy::new(observer.clone(), queue.clone(), tracking.clone());
        let tracker = DebugTracker::new(observer, queue, impressions, self.timer(), tracking);
        StrategyPair {
            strategy: Arc::new(strategy),
            tracker: Arc::new(tracker),
        }
    }

    fn optimized_pair(&self) -> StrategyPair {
        let tracking = TrackingFlag::new(self.config.tracking_enabled);
        let observer = self.observer();
        let counter = Arc::new(ImpressionsCounter::new());
        let (queue, impressions) = self.queue();

        let strategy = OptimizedStrategy::new(
            observer.clone(),
            counter.clone(),
            queue.clone(),
            self.stats.clone(),
            self.config.dedupe_time_interval_ms,
            tracking.clone(),
        );
        let tracker = OptimizedTracker::new(
            observer,
            counter,
            queue,
            impressions,
            self.counts_slot(),
            self.timer(),
            self.timer(),
            tracking,
        );
        StrategyPair {
            strategy: Arc::new(strategy),
            tracker: Arc::new(tracker),
        }
    }

    fn observer(&self) -> Arc<ImpressionsObserver> {
        Arc::new(
            ImpressionsObserver::new(
                self.config.observer_cache_size,
                self.config.observer_expiration(),
                self.observer_storage.clone(),
            )
            .with_executor(self.executor.clone()),
        )
    }

    /// Queue plus the impressions slot, which hears about every recorder run
    /// through the queue's sync helper.
    fn queue(&self) -> (Arc<ImpressionsQueue>, Arc<PeriodicTaskSlot>) {
        let helper = Arc::new(RecorderSyncHelper::new(
            TaskType::ImpressionsRecorder,
            self.impressions_storage.clone(),
            self.config.impressions_queue_size,
            self.config.impressions_chunk_size_bytes,
        ));
        let slot = PeriodicTaskSlot::new(
            TaskType::ImpressionsRecorder,
            self.executor.clone(),
            self.config.impressions_refresh_rate(),
            self.impressions_latch.clone(),
        );
        let weak_slot = Arc::downgrade(&slot);
        helper.add_task_execution_listener(weak_slot);

        let queue = Arc::new(ImpressionsQueue {
            helper,
            executor: self.executor.clone(),
            task_factory: self.task_factory.clone(),
            stats: self.stats.clone(),
            latch: self.impressions_latch.clone(),
        });
        (queue, slot)
    }

    fn counts_slot(&self) -> Arc<PeriodicTaskSlot> {
        PeriodicTaskSlot::new(
            TaskType::ImpressionsCountRecorder,
            self.executor.clone(),
            self.config.impressions_count_refresh_rate(),
            self.counts_latch.clone(),
        )
    }

    fn timer(&self) -> Arc<RetryBackoffTimer> {
        RetryBackoffTimer::new(self.executor.clone(), self.config.retry_policy())
    }
}
