//! Distinct flags evaluated per user key.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::lock;

/// A user key and the flags it was evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueKey {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "fs")]
    pub features: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Tracked {
    keys: HashMap<String, HashSet<String>>,
    size: usize,
}

/// Bounded tracker of (user key, flag) pairs.
///
/// Reaching the ceiling marks the tracker full. Nothing is dropped: the owner
/// is expected to drain it.
#[derive(Debug)]
pub struct UniqueKeysTracker {
    max_size: usize,
    tracked: Mutex<Tracked>,
}

impl UniqueKeysTracker {
    /// Create a tracker that reports full at `max_size` pairs.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            tracked: Mutex::new(Tracked::default()),
        }
    }

    /// Record that `user_key` saw `flag_name`. Returns true if the pair is new.
    pub fn track(&self, user_key: &str, flag_name: &str) -> bool {
        let mut tracked = lock(&self.tracked);
        let added = tracked
            .keys
            .entry(user_key.to_string())
            .or_default()
            .insert(flag_name.to_string());
        if added {
            tracked.size += 1;
        }
        added
    }

    /// True once the tracked pairs reach the ceiling.
    pub fn is_full(&self) -> bool {
        lock(&self.tracked).size >= self.max_size
    }

    /// Number of tracked pairs.
    pub fn size(&self) -> usize {
        lock(&self.tracked).size
    }

    /// Drain everything and reset fullness.
    pub fn pop_all(&self) -> Vec<UniqueKey> {
        let drained = std::mem::take(&mut *lock(&self.tracked));
        Self::into_records(drained)
    }

    /// Drain only if full. Concurrent callers observe a given batch at most once.
    pub fn pop_all_if_full(&self) -> Option<Vec<UniqueKey>> {
        let mut tracked = lock(&self.tracked);
        if tracked.size < self.max_size {
            return None;
        }
        let drained = std::mem::take(&mut *tracked);
        drop(tracked);
        Some(Self::into_records(drained))
    }

    fn into_records(tracked: Tracked) -> Vec<UniqueKey> {
        tracked
            .keys
            .into_iter()
            .map(|(key, features)| UniqueKey {
                key,
                features: features.into_iter().collect(),
            })
            .collect()
    }
}
