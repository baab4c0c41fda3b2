//! Builds the tasks strategies and trackers hand to the executor.

use std::sync::Arc;

use task_executor::SharedTask;

use crate::config::ImpressionsConfig;
use crate::counter::ImpressionsCountPerFeature;
use crate::impression::{KeyImpression, ESTIMATED_IMPRESSION_SIZE_IN_BYTES};
use crate::recorder::{HttpRecorder, ImpressionsCount, TestImpressions, UniqueKeys};
use crate::storage::{InMemoryRecordStorage, RecordStorage};
use crate::tasks::{
    ImpressionsCountRecorderTask, ImpressionsRecorderTask, RecorderTaskConfig,
    SaveImpressionsCountTask, SaveUniqueKeysTask, UniqueKeysRecorderTask,
};
use crate::unique_keys::UniqueKey;

const ESTIMATED_COUNT_SIZE_IN_BYTES: u64 = 64;
const ESTIMATED_UNIQUE_KEY_SIZE_IN_BYTES: u64 = 100;

/// Creates delivery and persistence tasks.
pub trait ImpressionsTaskFactory: Send + Sync {
    fn create_impressions_recorder_task(&self) -> SharedTask;

    fn create_impressions_count_recorder_task(&self) -> SharedTask;

    fn create_unique_keys_recorder_task(&self) -> SharedTask;

    fn create_save_impressions_count_task(&self, counts: Vec<ImpressionsCountPerFeature>) -> SharedTask;

    fn create_save_unique_keys_task(&self, keys: Vec<UniqueKey>) -> SharedTask;
}

/// Record storages used by the pipeline.
#[derive(Clone)]
pub struct ImpressionsStorages {
    pub impressions: Arc<dyn RecordStorage<KeyImpression>>,
    pub counts: Arc<dyn RecordStorage<ImpressionsCountPerFeature>>,
    pub unique_keys: Arc<dyn RecordStorage<UniqueKey>>,
}

impl ImpressionsStorages {
    /// Volatile storages, useful when nothing has to survive a restart.
    pub fn in_memory() -> Self {
        Self {
            impressions: Arc::new(InMemoryRecordStorage::new()),
            counts: Arc::new(InMemoryRecordStorage::new()),
            unique_keys: Arc::new(InMemoryRecordStorage::new()),
        }
    }
}

/// Backend endpoints, one per payload kind.
#[derive(Clone)]
pub struct ImpressionsRecorders {
    pub impressions: Arc<dyn HttpRecorder<Vec<TestImpressions>>>,
    pub counts: Arc<dyn HttpRecorder<ImpressionsCount>>,
    pub unique_keys: Arc<dyn HttpRecorder<UniqueKeys>>,
}

pub struct DefaultImpressionsTaskFactory {
    storages: ImpressionsStorages,
    recorders: ImpressionsRecorders,
    impressions_config: RecorderTaskConfig,
    counts_config: RecorderTaskConfig,
    unique_keys_config: RecorderTaskConfig,
}

impl DefaultImpressionsTaskFactory {
    pub fn new(
        storages: ImpressionsStorages,
        recorders: ImpressionsRecorders,
        config: &ImpressionsConfig,
    ) -> Self {
        Self {
            storages,
            recorders,
            impressions_config: RecorderTaskConfig::new(
                config.impressions_per_push,
                ESTIMATED_IMPRESSION_SIZE_IN_BYTES,
            ),
            counts_config: RecorderTaskConfig::new(config.counts_per_push, ESTIMATED_COUNT_SIZE_IN_BYTES),
            unique_keys_config: RecorderTaskConfig::new(
                config.unique_keys_per_push,
                ESTIMATED_UNIQUE_KEY_SIZE_IN_BYTES,
            ),
        }
    }

    pub fn storages(&self) -> &ImpressionsStorages {
        &self.storages
    }
}

impl ImpressionsTaskFactory for DefaultImpressionsTaskFactory {
    fn create_impressions_recorder_task(&self) -> SharedTask {
        Arc::new(ImpressionsRecorderTask::new(
            self.recorders.impressions.clone(),
            self.storages.impressions.clone(),
            self.impressions_config,
        ))
    }

    fn create_impressions_count_recorder_task(&self) -> SharedTask {
        Arc::new(ImpressionsCountRecorderTask::new(
            self.recorders.counts.clone(),
            self.storages.counts.clone(),
            self.counts_config,
        ))
    }

    fn create_unique_keys_recorder_task(&self) -> SharedTask {
        Arc::new(UniqueKeysRecorderTask::new(
            self.recorders.unique_keys.clone(),
            self.storages.unique_keys.clone(),
            self.unique_keys_config,
        ))
    }

    fn create_save_impressions_count_task(&self, counts: Vec<ImpressionsCountPerFeature>) -> SharedTask {
        Arc::new(SaveImpressionsCountTask::new(self.storages.counts.clone(), counts))
    }

    fn create_save_unique_keys_task(&self, keys: Vec<UniqueKey>) -> SharedTask {
        Arc::new(SaveUniqueKeysTask::new(self.storages.unique_keys.clone(), keys))
    }
}
