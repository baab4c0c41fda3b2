//! Backend transport contract and payload shapes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::counter::ImpressionsCountPerFeature;
use crate::impression::KeyImpression;
use crate::unique_keys::UniqueKey;

/// A rejected delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Recorder error: {message}")]
pub struct RecorderError {
    pub message: String,
    /// HTTP status returned by the backend, when a response arrived
    pub http_status: Option<u16>,
    do_not_retry: bool,
}

impl RecorderError {
    /// Create a retryable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            http_status: None,
            do_not_retry: false,
        }
    }

    /// Error the backend marked as permanent.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            do_not_retry: true,
            ..Self::new(message)
        }
    }

    /// Set the HTTP status returned by the backend.
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Authentication failures and explicit refusals are never retried.
    pub fn is_non_retryable(&self) -> bool {
        self.do_not_retry || matches!(self.http_status, Some(401) | Some(403))
    }
}

/// Posts a payload to the collection backend. Implementations may block.
pub trait HttpRecorder<P>: Send + Sync {
    fn execute(&self, payload: &P) -> Result<(), RecorderError>;
}

/// Impressions of one flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestImpressions {
    #[serde(rename = "f")]
    pub feature: String,
    #[serde(rename = "i")]
    pub impressions: Vec<KeyImpression>,
}

impl TestImpressions {
    /// Group impressions by flag, ordered by flag name.
    pub fn group(impressions: Vec<KeyImpression>) -> Vec<TestImpressions> {
        let mut by_feature: BTreeMap<String, Vec<KeyImpression>> = BTreeMap::new();
        for impression in impressions {
            by_feature
                .entry(impression.feature.clone())
                .or_default()
                .push(impression);
        }
        by_feature
            .into_iter()
            .map(|(feature, impressions)| TestImpressions {
                feature,
                impressions,
            })
            .collect()
    }
}

/// Count payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImpressionsCount {
    #[serde(rename = "pf")]
    pub per_feature: Vec<ImpressionsCountPerFeature>,
}

impl ImpressionsCount {
    /// Merge entries for the same flag and hour.
    pub fn merge(counts: Vec<ImpressionsCountPerFeature>) -> Self {
        let mut merged: BTreeMap<(String, i64), u64> = BTreeMap::new();
        for count in counts {
            *merged.entry((count.feature, count.time_frame)).or_insert(0) += count.count;
        }
        Self {
            per_feature: merged
                .into_iter()
                .map(|((feature, time_frame), count)| ImpressionsCountPerFeature {
                    feature,
                    time_frame,
                    count,
                })
                .collect(),
        }
    }
}

/// Unique keys payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UniqueKeys {
    pub keys: Vec<UniqueKey>,
}

impl UniqueKeys {
    /// Merge records that share a user key.
    pub fn merge(keys: Vec<UniqueKey>) -> Self {
        let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for key in keys {
            merged.entry(key.key).or_default().extend(key.features);
        }
        Self {
            keys: merged
                .into_iter()
                .map(|(key, features)| UniqueKey { key, features })
                .collect(),
        }
    }
}
