//! Runtime statistics about impression handling.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// What happened to an impression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpressionsDataType {
    /// Stored for delivery
    Queued,
    /// Folded into a count instead of being queued
    Deduped,
    /// Lost because storage refused it
    Dropped,
}

/// Sink for impression statistics.
pub trait ImpressionStatsRecorder: Send + Sync {
    fn record_impression_stats(&self, data_type: ImpressionsDataType, count: u64);
}

/// Point-in-time copy of [`ImpressionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionStatsSnapshot {
    pub queued: u64,
    pub deduped: u64,
    pub dropped: u64,
}

/// Lock-free counters of impression outcomes.
#[derive(Debug, Default)]
pub struct ImpressionStats {
    queued: AtomicU64,
    deduped: AtomicU64,
    dropped: AtomicU64,
}

impl ImpressionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, data_type: ImpressionsDataType) -> u64 {
        self.counter(data_type).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ImpressionStatsSnapshot {
        ImpressionStatsSnapshot {
            queued: self.get(ImpressionsDataType::Queued),
            deduped: self.get(ImpressionsDataType::Deduped),
            dropped: self.get(ImpressionsDataType::Dropped),
        }
    }

    fn counter(&self, data_type: ImpressionsDataType) -> &AtomicU64 {
        match data_type {
            ImpressionsDataType::Queued => &self.queued,
            ImpressionsDataType::Deduped => &self.deduped,
            ImpressionsDataType::Dropped => &self.dropped,
        }
    }
}

impl ImpressionStatsRecorder for ImpressionStats {
    fn record_impression_stats(&self, data_type: ImpressionsDataType, count: u64) {
        self.counter(data_type).fetch_add(count, Ordering::Relaxed);
    }
}
