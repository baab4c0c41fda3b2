//! Entry point for producers of impressions.

use std::sync::Arc;

use task_executor::{TaskExecutor, TaskType, TokioTaskExecutor};

use crate::config::{ImpressionsConfig, ImpressionsMode};
use crate::error::{ImpressionsError, ImpressionsResult};
use crate::factory::{
    DefaultImpressionsTaskFactory, ImpressionsRecorders, ImpressionsStorages, ImpressionsTaskFactory,
};
use crate::impression::DecoratedImpression;
use crate::stats::{ImpressionStats, ImpressionStatsRecorder};
use crate::storage::{InMemoryObserverCacheStorage, ObserverCacheStorage};
use crate::strategy::{ImpressionStrategyProvider, RecordingState, StrategyPair};

/// Routes impressions to the configured strategy and drives its delivery.
///
/// In Debug and Optimized mode a second, None-mode pair handles impressions
/// whose flag has tracking disabled: they are counted and key-tracked but their
/// raw record is never sent.
pub struct StrategyImpressionManager {
    active: StrategyPair,
    none: Option<StrategyPair>,
}

impl StrategyImpressionManager {
    /// Create a manager over an active pair and an optional None-mode pair.
    pub fn new(active: StrategyPair, none: Option<StrategyPair>) -> Self {
        Self { active, none }
    }

    /// Build the pairs `mode` needs from `provider`.
    pub fn from_provider(provider: &ImpressionStrategyProvider, mode: ImpressionsMode) -> Self {
        let none = match mode {
            ImpressionsMode::None => None,
            ImpressionsMode::Debug | ImpressionsMode::Optimized => {
                Some(provider.get_none_strategy())
            }
        };
        Self::new(provider.get_strategy(mode), none)
    }

    /// Hand an impression to the strategy that owns it. Never blocks on delivery.
    pub fn push_impression(&self, decorated: DecoratedImpression) {
        let pair = match &self.none {
            Some(none) if !decorated.tracking_enabled => none,
            _ => &self.active,
        };
        pair.strategy.apply(&decorated.impression);
    }

    /// Deliver everything held in memory and storage. Returns immediately.
    pub fn flush(&self) {
        for pair in self.pairs() {
            pair.tracker.flush();
        }
    }

    /// Start the recurring delivery schedules of every pair.
    pub fn start_periodic_recording(&self) {
        for pair in self.pairs() {
            pair.tracker.start_periodic_recording();
        }
    }

    /// Cancel every schedule and persist what is still in memory.
    pub fn stop_periodic_recording(&self) {
        for pair in self.pairs() {
            pair.tracker.stop_periodic_recording();
        }
    }

    /// Turn impression tracking on or off for every pair.
    pub fn enable_tracking(&self, enable: bool) {
        tracing::info!(
            "Impression tracking {}",
            if enable { "enabled" } else { "disabled" }
        );
        for pair in self.pairs() {
            pair.strategy.enable_tracking(enable);
            pair.tracker.enable_tracking(enable);
        }
    }

    pub fn is_tracking_enabled(&self) -> bool {
        self.active.strategy.is_tracking_enabled()
    }

    /// State of the active pair's schedule for `kind`, falling back to the
    /// None pair for kinds only it owns.
    pub fn recording_state(&self, kind: TaskType) -> Option<RecordingState> {
        self.active
            .tracker
            .recording_state(kind)
            .or_else(|| self.none.as_ref()?.tracker.recording_state(kind))
    }

    fn pairs(&self) -> impl Iterator<Item = &StrategyPair> {
        self.none.iter().chain(std::iter::once(&self.active))
    }
}

/// Wires a [`StrategyImpressionManager`] from its collaborators.
///
/// Only the recorders are mandatory, unless a task factory is supplied. Storage
/// defaults to memory, statistics to a fresh [`ImpressionStats`] and the
/// executor to a [`TokioTaskExecutor`] on the current runtime.
#[derive(Default)]
pub struct ImpressionManagerBuilder {
    config: ImpressionsConfig,
    executor: Option<Arc<dyn TaskExecutor>>,
    task_factory: Option<Arc<dyn ImpressionsTaskFactory>>,
    storages: Option<ImpressionsStorages>,
    recorders: Option<ImpressionsRecorders>,
    observer_storage: Option<Arc<dyn ObserverCacheStorage>>,
    stats: Option<Arc<dyn ImpressionStatsRecorder>>,
}

impl ImpressionManagerBuilder {
    /// Create a builder for `config`.
    pub fn new(config: ImpressionsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the executor background work runs on.
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Use custom tasks. The impressions storage given to
    /// [`with_storages`](Self::with_storages) must be the one the factory's
    /// recorder reads from.
    pub fn with_task_factory(mut self, task_factory: Arc<dyn ImpressionsTaskFactory>) -> Self {
        self.task_factory = Some(task_factory);
        self
    }

    /// Set the record storages.
    pub fn with_storages(mut self, storages: ImpressionsStorages) -> Self {
        self.storages = Some(storages);
        self
    }

    /// Set the recorders used by the default task factory.
    pub fn with_recorders(mut self, recorders: ImpressionsRecorders) -> Self {
        self.recorders = Some(recorders);
        self
    }

    /// Set where the dedupe observer persists fingerprints.
    pub fn with_observer_storage(mut self, storage: Arc<dyn ObserverCacheStorage>) -> Self {
        self.observer_storage = Some(storage);
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn ImpressionStatsRecorder>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Validate the config and wire the manager.
    pub fn build(self) -> ImpressionsResult<StrategyImpressionManager> {
        let config = self.config.validated();
        let executor: Arc<dyn TaskExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(TokioTaskExecutor::current()?),
        };
        let storages = self.storages.unwrap_or_else(ImpressionsStorages::in_memory);
        let task_factory: Arc<dyn ImpressionsTaskFactory> = match (self.task_factory, self.recorders) {
            (Some(factory), _) => factory,
            (None, Some(recorders)) => Arc::new(DefaultImpressionsTaskFactory::new(
                storages.clone(),
                recorders,
                &config,
            )),
            (None, None) => {
                return Err(ImpressionsError::Config(
                    "either recorders or a task factory is required".to_string(),
                ))
            }
        };

        let mode = config.mode;
        let provider = ImpressionStrategyProvider::new(
            config,
            executor,
            task_factory,
            storages.impressions,
            self.observer_storage
                .unwrap_or_else(|| Arc::new(InMemoryObserverCacheStorage::new())),
            self.stats.unwrap_or_else(|| Arc::new(ImpressionStats::new())),
        );
        tracing::info!("Impressions manager ready in {} mode", mode);
        Ok(StrategyImpressionManager::from_provider(&provider, mode))
    }
}
