//! Hourly impression counts per flag.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::lock;

/// Length of a counting time frame.
pub const TIME_INTERVAL_MS: i64 = 3_600_000;

/// Align a timestamp to the start of its hour.
pub fn truncate_time_frame(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(TIME_INTERVAL_MS)
}

/// Number of impressions of one flag within one hour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImpressionsCountPerFeature {
    #[serde(rename = "f")]
    pub feature: String,
    /// Hour-aligned timestamp
    #[serde(rename = "m")]
    pub time_frame: i64,
    #[serde(rename = "rc")]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CountKey {
    feature: String,
    time_frame: i64,
}

/// Thread-safe counter of deduplicated impressions.
#[derive(Debug, Default)]
pub struct ImpressionsCounter {
    counts: Mutex<HashMap<CountKey, u64>>,
}

impl ImpressionsCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the count of `flag_name` in the hour of `timestamp_ms`.
    pub fn inc(&self, flag_name: &str, timestamp_ms: i64, amount: u64) {
        let key = CountKey {
            feature: flag_name.to_string(),
            time_frame: truncate_time_frame(timestamp_ms),
        };
        *lock(&self.counts).entry(key).or_insert(0) += amount;
    }

    /// Drain every count accumulated so far.
    pub fn pop_all(&self) -> Vec<ImpressionsCountPerFeature> {
        let drained = std::mem::take(&mut *lock(&self.counts));
        drained
            .into_iter()
            .map(|(key, count)| ImpressionsCountPerFeature {
                feature: key.feature,
                time_frame: key.time_frame,
                count,
            })
            .collect()
    }

    /// True when nothing was counted since the last drain.
    pub fn is_empty(&self) -> bool {
        lock(&self.counts).is_empty()
    }
}
