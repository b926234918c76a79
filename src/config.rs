//! Pipeline tuning configuration.
//!
//! Every constant that trades throughput against failure isolation lives
//! here rather than being hard-coded: chunk sizing and retry caps for the
//! import side, retry/escalation policy for the geocoding side.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the ingestion and geocoding pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub geocode: GeocodeConfig,
}

/// Chunked import tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Data rows per chunk. Keeps per-request payloads in the
    /// tens-of-kilobytes range.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Total attempts per chunk, including the first.
    #[serde(default = "default_chunk_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Fixed pause between chunks to bound burst load on the importer.
    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,
    /// Cap on collected error messages across the whole run.
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
}

/// Geocoding job tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeConfig {
    /// Records fetched per page during a scan.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: u32,
    /// Attempts per record on transient geocoder failures.
    #[serde(default = "default_record_attempts")]
    pub record_retry_attempts: u32,
    /// Backoff before a record's second attempt; doubles per attempt.
    #[serde(default = "default_record_retry_base_delay_ms")]
    pub record_retry_base_delay_ms: u64,
    /// Consecutive records exhausting transient retries before the whole
    /// job is escalated to failed.
    #[serde(default = "default_transient_streak_limit")]
    pub transient_streak_limit: u32,
    /// Re-geocode records that already hold coordinates.
    #[serde(default)]
    pub force_regeocode: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_attempts: default_chunk_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
            max_errors: default_max_errors(),
        }
    }
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            scan_page_size: default_scan_page_size(),
            record_retry_attempts: default_record_attempts(),
            record_retry_base_delay_ms: default_record_retry_base_delay_ms(),
            transient_streak_limit: default_transient_streak_limit(),
            force_regeocode: false,
        }
    }
}

impl ImportConfig {
    /// Backoff duration for the given 1-based attempt number.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms << (attempt.saturating_sub(1)))
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

impl GeocodeConfig {
    /// Backoff duration for the given 1-based attempt number.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.record_retry_base_delay_ms << (attempt.saturating_sub(1)))
    }
}

fn default_chunk_size() -> usize {
    250
}

fn default_chunk_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_inter_chunk_delay_ms() -> u64 {
    100
}

fn default_max_errors() -> usize {
    100
}

fn default_scan_page_size() -> u32 {
    50
}

fn default_record_attempts() -> u32 {
    3
}

fn default_record_retry_base_delay_ms() -> u64 {
    250
}

fn default_transient_streak_limit() -> u32 {
    10
}
