//! Processing strategies and their periodic trackers.
//!
//! A strategy decides what happens to each impression on the producer thread.
//! Its tracker owns the background side: recurring recorder schedules, flushes
//! with retry, and persistence on stop. Both halves of a pair share one
//! [`TrackingFlag`].

pub mod debug;
pub mod none;
pub mod optimized;
pub mod periodic;
pub mod provider;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use task_executor::{SharedListener, TaskExecutor, TaskType};

use crate::factory::ImpressionsTaskFactory;
use crate::impression::{Impression, KeyImpression, ESTIMATED_IMPRESSION_SIZE_IN_BYTES};
use crate::stats::{ImpressionStatsRecorder, ImpressionsDataType};
use crate::sync_helper::RecorderSyncHelper;

pub use debug::{DebugStrategy, DebugTracker};
pub use none::{NoneStrategy, NoneTracker};
pub use optimized::{OptimizedStrategy, OptimizedTracker};
pub use periodic::PeriodicTaskSlot;
pub use provider::{ImpressionStrategyProvider, StrategyPair};

/// Handles impressions as they are produced.
pub trait ProcessStrategy: Send + Sync {
    fn apply(&self, impression: &Impression);

    fn enable_tracking(&self, enable: bool);

    fn is_tracking_enabled(&self) -> bool;
}

/// Drives background delivery for a strategy.
pub trait PeriodicTracker: Send + Sync {
    /// Deliver everything now, retrying with backoff. Returns immediately.
    fn flush(&self);

    fn start_periodic_recording(&self);

    /// Cancel schedules and persist in-memory data.
    fn stop_periodic_recording(&self);

    fn enable_tracking(&self, enable: bool);

    /// State of the schedule for `kind`, or `None` if this tracker does not own it.
    fn recording_state(&self, kind: TaskType) -> Option<RecordingState>;
}

/// Lifecycle of one periodic task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Stopped,
    Running,
    /// The backend refused delivery; nothing restarts this kind
    Latched,
}

/// Shared on/off switch for impression tracking.
#[derive(Debug, Clone)]
pub struct TrackingFlag(Arc<AtomicBool>);

impl TrackingFlag {
    /// Create a flag in the given state.
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    /// Turn tracking on or off for every holder of this flag.
    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }

    /// Whether impressions are tracked.
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One-way switch set when the backend refuses a task kind for good.
#[derive(Debug, Default)]
pub struct DeliveryLatch(AtomicBool);

impl DeliveryLatch {
    /// Create an untripped latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable the kind for the rest of the process. Cannot be undone.
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the backend refused this kind.
    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Queue side shared by the strategies that store raw impressions.
pub(crate) struct ImpressionsQueue {
    pub(crate) helper: Arc<RecorderSyncHelper<KeyImpression>>,
    pub(crate) executor: Arc<dyn TaskExecutor>,
    pub(crate) task_factory: Arc<dyn ImpressionsTaskFactory>,
    pub(crate) stats: Arc<dyn ImpressionStatsRecorder>,
    pub(crate) latch: Arc<DeliveryLatch>,
}

impl ImpressionsQueue {
    /// Store the impression and submit a recorder early when the queue is full.
    pub(crate) fn push(&self, impression: &Impression) {
        let record = KeyImpression::from(impression);
        let flush_needed = match self
            .helper
            .push_and_check_if_flush_needed(record, ESTIMATED_IMPRESSION_SIZE_IN_BYTES)
        {
            Ok(flush_needed) => flush_needed,
            Err(e) => {
                tracing::warn!("Impression for {} dropped: {}", impression.flag_name, e);
                self.stats
                    .record_impression_stats(ImpressionsDataType::Dropped, 1);
                return;
            }
        };
        self.stats
            .record_impression_stats(ImpressionsDataType::Queued, 1);

        if !flush_needed {
            return;
        }
        if self.latch.is_tripped() {
            tracing::debug!("Impressions queue full but delivery is disabled");
            return;
        }
        self.executor.submit(
            self.task_factory.create_impressions_recorder_task(),
            Some(self.listener()),
        );
    }

    pub(crate) fn listener(&self) -> SharedListener {
        self.helper.clone()
    }
}
