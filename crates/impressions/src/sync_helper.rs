//! Threshold tracking for a bounded delivery queue.

use std::sync::{Arc, Mutex, Weak};

use task_executor::{TaskExecutionInfo, TaskExecutionListener, TaskType};

use crate::error::ImpressionsResult;
use crate::lock;
use crate::storage::RecordStorage;

#[derive(Debug, Default)]
struct Pending {
    records: u64,
    bytes: u64,
}

/// Stores records and reports when enough have piled up to deliver them early.
///
/// The helper also listens to the recorder tasks it triggers: records a failed
/// task could not deliver are added back to the pending totals. Every report is
/// then forwarded to the registered listeners.
pub struct RecorderSyncHelper<T> {
    task_type: TaskType,
    storage: Arc<dyn RecordStorage<T>>,
    max_queue_size: u64,
    max_queue_size_bytes: u64,
    pending: Mutex<Pending>,
    listeners: Mutex<Vec<Weak<dyn TaskExecutionListener>>>,
}

impl<T> RecorderSyncHelper<T> {
    pub fn new(
        task_type: TaskType,
        storage: Arc<dyn RecordStorage<T>>,
        max_queue_size: u64,
        max_queue_size_bytes: u64,
    ) -> Self {
        Self {
            task_type,
            storage,
            max_queue_size,
            max_queue_size_bytes,
            pending: Mutex::new(Pending::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Store `record` and return true when the queue should be flushed now.
    ///
    /// The pending totals reset whenever true is returned.
    pub fn push_and_check_if_flush_needed(&self, record: T, size_bytes: u64) -> ImpressionsResult<bool> {
        self.storage.insert(record)?;

        let mut pending = lock(&self.pending);
        pending.records += 1;
        pending.bytes += size_bytes;
        if pending.records >= self.max_queue_size || pending.bytes >= self.max_queue_size_bytes {
            *pending = Pending::default();
            return Ok(true);
        }
        Ok(false)
    }

    /// Records and bytes stored since the last threshold crossing.
    pub fn pending(&self) -> (u64, u64) {
        let pending = lock(&self.pending);
        (pending.records, pending.bytes)
    }

    /// Forward every task report to `listener` for as long as it is alive.
    pub fn add_task_execution_listener(&self, listener: Weak<dyn TaskExecutionListener>) {
        lock(&self.listeners).push(listener);
    }
}

impl<T> TaskExecutionListener for RecorderSyncHelper<T>
where
    T: 'static,
{
    fn task_executed(&self, info: &TaskExecutionInfo) {
        if info.task_type == self.task_type && info.is_error() {
            let mut pending = lock(&self.pending);
            pending.records += info.non_sent_records;
            pending.bytes += info.non_sent_bytes;
        }

        let listeners: Vec<Arc<dyn TaskExecutionListener>> = {
            let mut registered = lock(&self.listeners);
            registered.retain(|listener| listener.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.task_executed(info);
        }
    }
}
