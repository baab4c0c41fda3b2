//! Delivery and persistence tasks.

use std::sync::{Arc, Mutex};

use task_executor::{Task, TaskExecutionInfo, TaskType};

use crate::counter::ImpressionsCountPerFeature;
use crate::impression::KeyImpression;
use crate::lock;
use crate::recorder::{HttpRecorder, ImpressionsCount, TestImpressions, UniqueKeys};
use crate::storage::{RecordId, RecordStorage};
use crate::unique_keys::UniqueKey;

/// Chunking parameters for a recorder task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderTaskConfig {
    /// Records popped and posted per request
    pub records_per_push: usize,
    /// Size attributed to each undelivered record
    pub estimated_record_size_bytes: u64,
}

impl RecorderTaskConfig {
    /// Create a config. At least one record is pushed per request.
    pub fn new(records_per_push: usize, estimated_record_size_bytes: u64) -> Self {
        Self {
            records_per_push: records_per_push.max(1),
            estimated_record_size_bytes,
        }
    }
}

/// Drains a record storage in chunks and posts each chunk.
///
/// Delivered chunks are deleted. Failed chunks are made active again once the
/// storage is drained, so the next run retries them. A non-retryable failure
/// stops the drain immediately.
pub struct RecorderTask<T, P> {
    task_type: TaskType,
    storage: Arc<dyn RecordStorage<T>>,
    recorder: Arc<dyn HttpRecorder<P>>,
    config: RecorderTaskConfig,
    build_payload: fn(Vec<T>) -> P,
}

pub type ImpressionsRecorderTask = RecorderTask<KeyImpression, Vec<TestImpressions>>;
pub type ImpressionsCountRecorderTask = RecorderTask<ImpressionsCountPerFeature, ImpressionsCount>;
pub type UniqueKeysRecorderTask = RecorderTask<UniqueKey, UniqueKeys>;

impl ImpressionsRecorderTask {
    pub fn new(
        recorder: Arc<dyn HttpRecorder<Vec<TestImpressions>>>,
        storage: Arc<dyn RecordStorage<KeyImpression>>,
        config: RecorderTaskConfig,
    ) -> Self {
        Self {
            task_type: TaskType::ImpressionsRecorder,
            storage,
            recorder,
            config,
            build_payload: TestImpressions::group,
        }
    }
}

impl ImpressionsCountRecorderTask {
    pub fn new(
        recorder: Arc<dyn HttpRecorder<ImpressionsCount>>,
        storage: Arc<dyn RecordStorage<ImpressionsCountPerFeature>>,
        config: RecorderTaskConfig,
    ) -> Self {
        Self {
            task_type: TaskType::ImpressionsCountRecorder,
            storage,
            recorder,
            config,
            build_payload: ImpressionsCount::merge,
        }
    }
}

impl UniqueKeysRecorderTask {
    pub fn new(
        recorder: Arc<dyn HttpRecorder<UniqueKeys>>,
        storage: Arc<dyn RecordStorage<UniqueKey>>,
        config: RecorderTaskConfig,
    ) -> Self {
        Self {
            task_type: TaskType::UniqueKeysRecorder,
            storage,
            recorder,
            config,
            build_payload: UniqueKeys::merge,
        }
    }
}

impl<T, P> Task for RecorderTask<T, P>
where
    T: 'static,
    P: 'static,
{
    fn execute(&self) -> TaskExecutionInfo {
        let per_push = self.config.records_per_push;
        let mut failed_ids: Vec<RecordId> = Vec::new();
        let mut non_sent_records = 0u64;
        let mut http_status = None;
        let mut fatal = false;
        let mut storage_failed = false;

        loop {
            let chunk = match self.storage.pop(per_push) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::error!("{}: could not read stored records: {}", self.task_type, e);
                    storage_failed = true;
                    break;
                }
            };
            let popped = chunk.len();
            if popped == 0 {
                break;
            }

            let (ids, records): (Vec<RecordId>, Vec<T>) =
                chunk.into_iter().map(|stored| (stored.id, stored.record)).unzip();
            tracing::debug!("{}: posting {} records", self.task_type, popped);

            match self.recorder.execute(&(self.build_payload)(records)) {
                Ok(()) => {
                    if let Err(e) = self.storage.delete(&ids) {
                        tracing::warn!("{}: could not delete delivered records: {}", self.task_type, e);
                    }
                }
                Err(e) => {
                    non_sent_records += popped as u64;
                    failed_ids.extend(ids);
                    http_status = e.http_status.or(http_status);
                    if e.is_non_retryable() {
                        tracing::error!("{}: delivery refused permanently: {}", self.task_type, e);
                        fatal = true;
                        break;
                    }
                    tracing::warn!(
                        "{}: some records couldn't be sent, keeping them for a later attempt: {}",
                        self.task_type,
                        e
                    );
                }
            }

            if popped < per_push {
                break;
            }
        }

        if !failed_ids.is_empty() {
            if let Err(e) = self.storage.set_active(&failed_ids) {
                tracing::error!("{}: could not restore undelivered records: {}", self.task_type, e);
            }
        }

        let non_sent_bytes = non_sent_records * self.config.estimated_record_size_bytes;
        let info = if fatal {
            TaskExecutionInfo::fatal(self.task_type)
        } else if non_sent_records > 0 || storage_failed {
            TaskExecutionInfo::error(self.task_type)
        } else {
            return TaskExecutionInfo::success(self.task_type);
        };
        let info = info.with_non_sent(non_sent_records, non_sent_bytes);
        match http_status {
            Some(status) => info.with_http_status(status),
            None => info,
        }
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }
}

/// Persists an in-memory snapshot into a record storage.
///
/// The snapshot is consumed by the first successful run so that a retried
/// serial unit does not save it twice.
pub struct SaveTask<T> {
    task_type: TaskType,
    storage: Arc<dyn RecordStorage<T>>,
    records: Mutex<Option<Vec<T>>>,
}

pub type SaveImpressionsCountTask = SaveTask<ImpressionsCountPerFeature>;
pub type SaveUniqueKeysTask = SaveTask<UniqueKey>;

impl SaveImpressionsCountTask {
    pub fn new(
        storage: Arc<dyn RecordStorage<ImpressionsCountPerFeature>>,
        counts: Vec<ImpressionsCountPerFeature>,
    ) -> Self {
        Self {
            task_type: TaskType::SaveImpressionsCount,
            storage,
            records: Mutex::new(Some(counts)),
        }
    }
}

impl SaveUniqueKeysTask {
    pub fn new(storage: Arc<dyn RecordStorage<UniqueKey>>, keys: Vec<UniqueKey>) -> Self {
        Self {
            task_type: TaskType::SaveUniqueKeys,
            storage,
            records: Mutex::new(Some(keys)),
        }
    }
}

impl<T> Task for SaveTask<T>
where
    T: Clone + Send + 'static,
{
    fn execute(&self) -> TaskExecutionInfo {
        let mut pending = lock(&self.records);
        let records = match pending.take() {
            Some(records) if !records.is_empty() => records,
            _ => return TaskExecutionInfo::success(self.task_type),
        };

        let count = records.len();
        match self.storage.insert_all(records.clone()) {
            Ok(()) => {
                tracing::debug!("{}: saved {} records", self.task_type, count);
                TaskExecutionInfo::success(self.task_type)
            }
            Err(e) => {
                tracing::error!("{}: could not save {} records: {}", self.task_type, count, e);
                *pending = Some(records);
                TaskExecutionInfo::error(self.task_type)
            }
        }
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }
}
