//! Impression types.

use serde::{Deserialize, Serialize};

/// Estimated serialized size of one queued impression, used for byte thresholds.
pub const ESTIMATED_IMPRESSION_SIZE_IN_BYTES: u64 = 150;

/// A single flag evaluation produced by the evaluation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Impression {
    /// Key the flag was evaluated for
    pub user_key: String,
    /// Optional key used for bucketing
    pub bucketing_key: Option<String>,
    /// Evaluated flag
    pub flag_name: String,
    /// Resulting treatment
    pub treatment: String,
    /// Evaluation time in milliseconds since the epoch
    pub time: i64,
    /// Rule label that produced the treatment
    pub label: String,
    /// Flag definition version
    pub change_number: i64,
    /// Time of the previous identical evaluation, when known
    pub previous_time: Option<i64>,
    /// Caller-supplied properties serialized as JSON
    pub properties: Option<String>,
}

impl Impression {
    pub fn new(user_key: &str, flag_name: &str, treatment: &str, time: i64) -> Self {
        Self {
            user_key: user_key.to_string(),
            bucketing_key: None,
            flag_name: flag_name.to_string(),
            treatment: treatment.to_string(),
            time,
            label: String::new(),
            change_number: 0,
            previous_time: None,
            properties: None,
        }
    }

    pub fn with_bucketing_key(mut self, bucketing_key: &str) -> Self {
        self.bucketing_key = Some(bucketing_key.to_string());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_change_number(mut self, change_number: i64) -> Self {
        self.change_number = change_number;
        self
    }

    pub fn with_properties(mut self, properties: &str) -> Self {
        self.properties = Some(properties.to_string());
        self
    }

    /// Copy of this impression carrying the observer's previous timestamp.
    pub fn with_previous_time(&self, previous_time: Option<i64>) -> Self {
        Self {
            previous_time,
            ..self.clone()
        }
    }

    /// Impressions with properties bypass deduplication.
    pub fn has_properties(&self) -> bool {
        self.properties
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }
}

/// An impression plus the tracking decision made at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedImpression {
    pub impression: Impression,
    /// When false the raw impression is never recorded
    pub tracking_enabled: bool,
}

impl DecoratedImpression {
    pub fn new(impression: Impression, tracking_enabled: bool) -> Self {
        Self {
            impression,
            tracking_enabled,
        }
    }
}

/// Stored and transmitted form of a queued impression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyImpression {
    pub key_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucketing_key: Option<String>,
    pub feature: String,
    pub treatment: String,
    pub time: i64,
    pub label: String,
    pub change_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
}

impl From<&Impression> for KeyImpression {
    fn from(impression: &Impression) -> Self {
        Self {
            key_name: impression.user_key.clone(),
            bucketing_key: impression.bucketing_key.clone(),
            feature: impression.flag_name.clone(),
            treatment: impression.treatment.clone(),
            time: impression.time,
            label: impression.label.clone(),
            change_number: impression.change_number,
            previous_time: impression.previous_time,
            properties: impression.properties.clone(),
        }
    }
}
