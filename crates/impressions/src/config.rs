//! Impressions pipeline configuration.
//!
//! Configuration can be built in code with the `with_*` methods or read from a
//! JSON document using camelCase keys. Missing keys take their default value.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;
use crate::error::{ImpressionsError, ImpressionsResult};

/// Shortest allowed refresh rate for any periodic recorder, in seconds.
pub const MIN_REFRESH_RATE_SECS: u64 = 60;

/// Default deduplication window, in milliseconds.
pub const DEFAULT_DEDUPE_TIME_INTERVAL_MS: u64 = 3_600_000;

/// How impressions are processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpressionsMode {
    /// Every impression is queued
    Debug,
    /// Duplicates within the dedupe window are only counted
    #[default]
    Optimized,
    /// Nothing is queued; only counts and unique keys are kept
    None,
}

impl ImpressionsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpressionsMode::Debug => "debug",
            ImpressionsMode::Optimized => "optimized",
            ImpressionsMode::None => "none",
        }
    }
}

impl fmt::Display for ImpressionsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImpressionsMode {
    type Err = ImpressionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(ImpressionsMode::Debug),
            "optimized" => Ok(ImpressionsMode::Optimized),
            "none" => Ok(ImpressionsMode::None),
            other => Err(ImpressionsError::Config(format!(
                "unknown impressions mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImpressionsConfig {
    pub mode: ImpressionsMode,
    pub impressions_refresh_rate_secs: u64,
    pub impressions_count_refresh_rate_secs: u64,
    pub unique_keys_refresh_rate_secs: u64,
    /// Dedupe window; 0 selects the default
    pub dedupe_time_interval_ms: u64,
    /// Tracked (key, flag) pairs before an early unique keys flush
    pub unique_keys_max_size: usize,
    /// Queued impressions before an early flush
    pub impressions_queue_size: u64,
    /// Queued impression bytes before an early flush
    pub impressions_chunk_size_bytes: u64,
    pub impressions_per_push: usize,
    pub counts_per_push: usize,
    pub unique_keys_per_push: usize,
    pub observer_cache_size: u64,
    pub observer_expiration_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Executions per flush; 0 retries until success
    pub retry_max_attempts: u32,
    /// Initial value of the tracking flag
    pub tracking_enabled: bool,
}

impl Default for ImpressionsConfig {
    fn default() -> Self {
        Self {
            mode: ImpressionsMode::Optimized,
            impressions_refresh_rate_secs: 1800,
            impressions_count_refresh_rate_secs: 1800,
            unique_keys_refresh_rate_secs: 900,
            dedupe_time_interval_ms: DEFAULT_DEDUPE_TIME_INTERVAL_MS,
            unique_keys_max_size: 30_000,
            impressions_queue_size: 30_000,
            impressions_chunk_size_bytes: 2 * 1024 * 1024,
            impressions_per_push: 2000,
            counts_per_push: 2000,
            unique_keys_per_push: 2000,
            observer_cache_size: 500,
            observer_expiration_ms: 4 * 3_600_000,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 1_800_000,
            retry_max_attempts: 3,
            tracking_enabled: true,
        }
    }
}

impl ImpressionsConfig {
    pub fn new(mode: ImpressionsMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> ImpressionsResult<Self> {
        Ok(serde_json::from_str::<Self>(json)?.validated())
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. An unparsable file is logged and
    /// also yields the defaults.
    pub fn load_sync(path: &Path) -> ImpressionsResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match Self::from_json_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse impressions config, using defaults: {}",
                    e
                );
                Ok(Self::default())
            }
        }
    }

    /// Copy with out-of-range values replaced.
    pub fn validated(mut self) -> Self {
        for rate in [
            &mut self.impressions_refresh_rate_secs,
            &mut self.impressions_count_refresh_rate_secs,
            &mut self.unique_keys_refresh_rate_secs,
        ] {
            if *rate < MIN_REFRESH_RATE_SECS {
                tracing::warn!(
                    "Refresh rate of {}s is below the minimum, using {}s",
                    rate,
                    MIN_REFRESH_RATE_SECS
                );
                *rate = MIN_REFRESH_RATE_SECS;
            }
        }
        if self.dedupe_time_interval_ms == 0 {
            self.dedupe_time_interval_ms = DEFAULT_DEDUPE_TIME_INTERVAL_MS;
        }
        self.unique_keys_max_size = self.unique_keys_max_size.max(1);
        self.impressions_queue_size = self.impressions_queue_size.max(1);
        self.impressions_chunk_size_bytes = self.impressions_chunk_size_bytes.max(1);
        self.impressions_per_push = self.impressions_per_push.max(1);
        self.counts_per_push = self.counts_per_push.max(1);
        self.unique_keys_per_push = self.unique_keys_per_push.max(1);
        self.observer_cache_size = self.observer_cache_size.max(1);
        self.retry_max_delay_ms = self.retry_max_delay_ms.max(self.retry_base_delay_ms);
        self
    }

    pub fn with_mode(mut self, mode: ImpressionsMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_impressions_refresh_rate_secs(mut self, secs: u64) -> Self {
        self.impressions_refresh_rate_secs = secs;
        self
    }

    pub fn with_impressions_count_refresh_rate_secs(mut self, secs: u64) -> Self {
        self.impressions_count_refresh_rate_secs = secs;
        self
    }

    pub fn with_unique_keys_refresh_rate_secs(mut self, secs: u64) -> Self {
        self.unique_keys_refresh_rate_secs = secs;
        self
    }

    pub fn with_dedupe_time_interval_ms(mut self, ms: u64) -> Self {
        self.dedupe_time_interval_ms = ms;
        self
    }

    pub fn with_unique_keys_max_size(mut self, size: usize) -> Self {
        self.unique_keys_max_size = size;
        self
    }

    pub fn with_impressions_queue_size(mut self, size: u64) -> Self {
        self.impressions_queue_size = size;
        self
    }

    pub fn with_impressions_chunk_size_bytes(mut self, bytes: u64) -> Self {
        self.impressions_chunk_size_bytes = bytes;
        self
    }

    pub fn with_impressions_per_push(mut self, count: usize) -> Self {
        self.impressions_per_push = count;
        self
    }

    pub fn with_counts_per_push(mut self, count: usize) -> Self {
        self.counts_per_push = count;
        self
    }

    pub fn with_unique_keys_per_push(mut self, count: usize) -> Self {
        self.unique_keys_per_push = count;
        self
    }

    pub fn with_observer_cache_size(mut self, size: u64) -> Self {
        self.observer_cache_size = size;
        self
    }

    pub fn with_retry(mut self, base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        self.retry_base_delay_ms = base_delay_ms;
        self.retry_max_delay_ms = max_delay_ms;
        self.retry_max_attempts = max_attempts;
        self
    }

    pub fn with_tracking_enabled(mut self, enabled: bool) -> Self {
        self.tracking_enabled = enabled;
        self
    }

    pub fn impressions_refresh_rate(&self) -> Duration {
        Duration::from_secs(self.impressions_refresh_rate_secs)
    }

    pub fn impressions_count_refresh_rate(&self) -> Duration {
        Duration::from_secs(self.impressions_count_refresh_rate_secs)
    }

    pub fn unique_keys_refresh_rate(&self) -> Duration {
        Duration::from_secs(self.unique_keys_refresh_rate_secs)
    }

    pub fn observer_expiration(&self) -> Duration {
        Duration::from_millis(self.observer_expiration_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_attempts: self.retry_max_attempts,
        }
    }
}
