use alloy::primitives::Address;
use sip_core::{contract::LogSource, error::SipError, plan::PlanCreatedLog};

use crate::{config::DiscoveryConfig, metrics};

/// Inclusive block range of one log query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from_block: u64,
    pub to_block: u64,
}

/// Splits `[from_block, to_block]` into consecutive windows of at most
/// `window_size` blocks
pub fn block_windows(from_block: u64, to_block: u64, window_size: u64) -> Vec<BlockWindow> {
    let window_size = window_size.max(1);
    let mut windows = Vec::new();
    let mut start = from_block;

    while start <= to_block {
        let end = start.saturating_add(window_size - 1).min(to_block);
        windows.push(BlockWindow {
            from_block: start,
            to_block: end,
        });
        match end.checked_add(1) {
            Some(next) => start = next,
            None => break,
        }
    }

    windows
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub logs: Vec<PlanCreatedLog>,
    pub windows_scanned: usize,
    pub failed_windows: Vec<(BlockWindow, SipError)>,
}

impl ScanReport {
    pub fn all_failed(&self) -> bool {
        self.windows_scanned > 0 && self.failed_windows.len() == self.windows_scanned
    }
}

/// Replays `PlanCreated` logs for one owner, one window at a time
#[derive(Debug, Clone)]
pub struct EventReplayScanner {
    lookback_blocks: u64,
    window_blocks: u64,
}

impl EventReplayScanner {
    pub fn new(lookback_blocks: u64, window_blocks: u64) -> Self {
        Self {
            lookback_blocks,
            window_blocks: window_blocks.max(1),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.event_lookback_blocks, config.event_window_blocks)
    }

    /// Scans `lookback_blocks` back from `latest_block`. Failed windows are
    /// recorded and skipped.
    pub async fn scan<L: LogSource>(
        &self,
        source: &L,
        owner: Address,
        latest_block: u64,
    ) -> ScanReport {
        let from_block = latest_block.saturating_sub(self.lookback_blocks);
        let windows = block_windows(from_block, latest_block, self.window_blocks);

        tracing::debug!(
            owner = %owner,
            from_block,
            to_block = latest_block,
            windows = windows.len(),
            "Replaying PlanCreated logs"
        );

        let mut report = ScanReport::default();

        for window in windows {
            report.windows_scanned += 1;
            match source
                .plan_created_logs(owner, window.from_block, window.to_block)
                .await
            {
                Ok(logs) => {
                    // the node already filters on the indexed owner, this guards
                    // against sources that do not
                    report
                        .logs
                        .extend(logs.into_iter().filter(|log| log.owner == owner));
                }
                Err(error) => {
                    tracing::warn!(
                        owner = %owner,
                        from_block = window.from_block,
                        to_block = window.to_block,
                        error = %error,
                        "Log window query failed"
                    );
                    metrics::record_failed_window();
                    report.failed_windows.push((window, error));
                }
            }
        }

        tracing::debug!(
            owner = %owner,
            events = report.logs.len(),
            failed_windows = report.failed_windows.len(),
            "Finished log replay"
        );

        report
    }
}

impl Default for EventReplayScanner {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_range_without_overlap() {
        let windows = block_windows(100, 5_099, 2_000);
        assert_eq!(
            windows,
            vec![
                BlockWindow { from_block: 100, to_block: 2_099 },
                BlockWindow { from_block: 2_100, to_block: 4_099 },
                BlockWindow { from_block: 4_100, to_block: 5_099 },
            ]
        );
    }

    #[test]
    fn single_block_range() {
        assert_eq!(
            block_windows(7, 7, 2_000),
            vec![BlockWindow { from_block: 7, to_block: 7 }]
        );
    }

    #[test]
    fn empty_when_range_inverted() {
        assert!(block_windows(10, 9, 2_000).is_empty());
    }

    #[test]
    fn range_ending_at_u64_max_terminates() {
        let windows = block_windows(u64::MAX - 2, u64::MAX, 2);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].to_block, u64::MAX);
    }
}
