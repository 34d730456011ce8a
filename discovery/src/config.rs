use std::time::Duration;

use serde::Deserialize;

/// Tuning for every discovery strategy. Defaults are deliberately
/// conservative towards public RPC rate limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Days back from now searched by the candidate generator
    pub candidate_days: u32,
    /// Hour step between candidate buckets inside one day
    pub candidate_hour_step: u32,
    /// Upper bound on generated candidate keys, default key included
    pub max_candidates: usize,

    /// Point lookups in flight at once
    pub batch_size: usize,
    /// Pause between two lookup batches
    pub batch_delay_ms: u64,

    /// Blocks behind the latest block searched for `PlanCreated` logs
    pub event_lookback_blocks: u64,
    /// Blocks per `eth_getLogs` window
    pub event_window_blocks: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            candidate_days: 7,
            candidate_hour_step: 4,
            max_candidates: 30,
            batch_size: 3,
            batch_delay_ms: 300,
            event_lookback_blocks: 500_000,
            event_window_blocks: 2_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Settings for the long running service around the pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// How often the latest block number is polled
    pub block_poll_interval_ms: u64,
    /// Owners not queried for this long stop being refreshed
    pub owner_idle_ttl_secs: u64,
    pub max_tracked_owners: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            block_poll_interval_ms: 5_000,
            owner_idle_ttl_secs: 15 * 60,
            max_tracked_owners: 1_000,
        }
    }
}

impl RefreshConfig {
    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }

    pub fn owner_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.owner_idle_ttl_secs)
    }
}
