//! Fetch engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the fetch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Minimum amount of data the broker should return for a fetch request;
    /// below this it waits up to `fetch_max_wait_ms` for more to accumulate.
    #[serde(default = "default_fetch_min_bytes")]
    pub fetch_min_bytes: i32,
    /// Maximum time in milliseconds the broker will block before answering
    /// a fetch request when `fetch_min_bytes` is not yet satisfied.
    #[serde(default = "default_fetch_max_wait_ms")]
    pub fetch_max_wait_ms: i32,
    /// Maximum amount of data the broker will return per partition. Must be
    /// at least as large as the maximum message size the broker allows, or
    /// the consumer can get stuck on an unreturnable message.
    #[serde(default = "default_max_partition_fetch_bytes")]
    pub max_partition_fetch_bytes: i32,
    /// Verify the CRC32 of consumed records against on-the-wire corruption.
    #[serde(default = "default_check_crcs")]
    pub check_crcs: bool,
    /// Poll cadence of the background fetch loop in milliseconds.
    #[serde(default = "default_fetcher_timeout_ms")]
    pub fetcher_timeout_ms: u64,
    /// Backoff between attempts in the offset lookup retry loop.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_fetch_min_bytes() -> i32 {
    1
}

fn default_fetch_max_wait_ms() -> i32 {
    500
}

fn default_max_partition_fetch_bytes() -> i32 {
    1024 * 1024 // 1 MiB
}

fn default_check_crcs() -> bool {
    true
}

fn default_fetcher_timeout_ms() -> u64 {
    100
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fetch_min_bytes: default_fetch_min_bytes(),
            fetch_max_wait_ms: default_fetch_max_wait_ms(),
            max_partition_fetch_bytes: default_max_partition_fetch_bytes(),
            check_crcs: default_check_crcs(),
            fetcher_timeout_ms: default_fetcher_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl FetchConfig {
    pub fn fetcher_timeout(&self) -> Duration {
        Duration::from_millis(self.fetcher_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
