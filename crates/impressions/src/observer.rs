//! Deduplication observer.
//!
//! Remembers when each impression fingerprint was last seen. Lookups hit a
//! bounded in-memory cache first, then the writes not yet persisted, then the
//! persistent observer storage.
//!
//! Writes are buffered and flushed to storage once the buffer holds as many
//! entries as the cache. With an executor the flush runs as a background task;
//! if that task falls behind the producer flushes inline, so the buffer never
//! holds more than twice the cache size.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moka::sync::Cache;
use task_executor::{Task, TaskExecutionInfo, TaskExecutor, TaskType};

use crate::error::ImpressionsResult;
use crate::hasher::fingerprint;
use crate::impression::Impression;
use crate::storage::ObserverCacheStorage;
use crate::{lock, now_millis};

/// Entries seen since the last flush to storage.
///
/// An entry leaves the buffer only after storage accepted it, so a lookup
/// always finds it in one of the two.
struct PendingWrites {
    storage: Arc<dyn ObserverCacheStorage>,
    entries: Mutex<HashMap<u64, i64>>,
    flushing: Mutex<()>,
    limit: usize,
    flush_scheduled: AtomicBool,
}

impl PendingWrites {
    fn flush(&self) -> ImpressionsResult<usize> {
        let _flushing = lock(&self.flushing);
        let snapshot: Vec<(u64, i64)> = lock(&self.entries)
            .iter()
            .map(|(hash, time)| (*hash, *time))
            .collect();
        if snapshot.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.storage.insert_all(&snapshot, now_millis()) {
            self.enforce_limit();
            return Err(e);
        }

        let mut entries = lock(&self.entries);
        for (hash, time) in &snapshot {
            // Newer sightings stay buffered for the next flush.
            if entries.get(hash) == Some(time) {
                entries.remove(hash);
            }
        }
        tracing::debug!("Persisted {} observer entries", snapshot.len());
        Ok(snapshot.len())
    }

    fn enforce_limit(&self) {
        let mut entries = lock(&self.entries);
        let excess = entries.len().saturating_sub(self.limit);
        if excess == 0 {
            return;
        }
        let dropped: Vec<u64> = entries.keys().take(excess).copied().collect();
        for hash in &dropped {
            entries.remove(hash);
        }
        tracing::warn!("Dropped {} unpersisted observer entries", dropped.len());
    }
}

/// Background flush of the observer's pending writes.
struct FlushObserverTask {
    writes: Arc<PendingWrites>,
}

impl Task for FlushObserverTask {
    fn execute(&self) -> TaskExecutionInfo {
        let result = self.writes.flush();
        self.writes.flush_scheduled.store(false, Ordering::Release);
        match result {
            Ok(_) => TaskExecutionInfo::success(TaskType::Generic),
            Err(e) => {
                tracing::warn!("Could not flush impressions observer: {}", e);
                TaskExecutionInfo::error(TaskType::Generic)
            }
        }
    }

    fn task_type(&self) -> TaskType {
        TaskType::Generic
    }
}

pub struct ImpressionsObserver {
    cache: Cache<u64, i64>,
    writes: Arc<PendingWrites>,
    flush_threshold: usize,
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl ImpressionsObserver {
    /// Create an observer and purge persisted entries older than `expiration`.
    ///
    /// Without an executor, buffered writes are flushed on the calling thread.
    pub fn new(cache_size: u64, expiration: Duration, storage: Arc<dyn ObserverCacheStorage>) -> Self {
        let cutoff = now_millis() - expiration.as_millis() as i64;
        match storage.delete_outdated(cutoff) {
            Ok(0) => {}
            Ok(removed) => tracing::debug!("Removed {} outdated observer entries", removed),
            Err(e) => tracing::warn!("Could not purge outdated observer entries: {}", e),
        }

        let flush_threshold = usize::try_from(cache_size).unwrap_or(usize::MAX).max(1);
        Self {
            cache: Cache::builder().max_capacity(cache_size).build(),
            writes: Arc::new(PendingWrites {
                storage,
                entries: Mutex::new(HashMap::new()),
                flushing: Mutex::new(()),
                limit: flush_threshold.saturating_mul(2),
                flush_scheduled: AtomicBool::new(false),
            }),
            flush_threshold,
            executor: None,
        }
    }

    /// Flush buffered writes through `executor` instead of the producer thread.
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Record `impression` and return the time its fingerprint was last seen.
    pub fn test_and_set(&self, impression: &Impression) -> Option<i64> {
        let hash = fingerprint(impression);

        let previous = self
            .cache
            .get(&hash)
            .or_else(|| lock(&self.writes.entries).get(&hash).copied())
            .or_else(|| match self.writes.storage.get(hash) {
                Ok(time) => time,
                Err(e) => {
                    tracing::warn!("Observer storage lookup failed: {}", e);
                    None
                }
            });

        self.cache.insert(hash, impression.time);
        let buffered = {
            let mut entries = lock(&self.writes.entries);
            entries.insert(hash, impression.time);
            entries.len()
        };
        if buffered >= self.flush_threshold {
            self.flush_buffered(buffered);
        }

        previous
    }

    fn flush_buffered(&self, buffered: usize) {
        if let Some(executor) = &self.executor {
            if buffered < self.writes.limit {
                if !self.writes.flush_scheduled.swap(true, Ordering::AcqRel) {
                    let task = Arc::new(FlushObserverTask {
                        writes: self.writes.clone(),
                    });
                    if executor.submit(task, None).is_none() {
                        self.writes.flush_scheduled.store(false, Ordering::Release);
                    }
                }
                return;
            }
            tracing::debug!("Observer flush is behind, flushing {} entries inline", buffered);
        }
        if let Err(e) = self.writes.flush() {
            tracing::warn!("Could not flush impressions observer: {}", e);
        }
    }

    /// Write entries recorded since the last call to persistent storage.
    ///
    /// On failure the entries are kept for the next attempt, up to twice the
    /// cache size.
    pub fn persist(&self) -> ImpressionsResult<usize> {
        self.writes.flush()
    }

    /// Entries waiting for [`persist`](Self::persist).
    pub fn pending_count(&self) -> usize {
        lock(&self.writes.entries).len()
    }
}
