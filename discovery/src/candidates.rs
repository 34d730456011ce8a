use std::collections::HashSet;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use sip_core::constants::{DEFAULT_PLAN_KEY, PLAN_KEY_PREFIX};

use crate::config::DiscoveryConfig;

const MS_PER_HOUR: i64 = 60 * 60 * 1000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Last six characters of the checksummed owner address
pub fn owner_fingerprint(owner: &Address) -> String {
    let checksummed = owner.to_checksum(None);
    checksummed[checksummed.len() - 6..].to_string()
}

/// The key a plan created by `owner` at `created_at` is named with
pub fn plan_key_for(owner: &Address, created_at: DateTime<Utc>) -> String {
    plan_key_at_millis(&owner_fingerprint(owner), created_at.timestamp_millis())
}

fn plan_key_at_millis(fingerprint: &str, millis: i64) -> String {
    format!(
        "{PLAN_KEY_PREFIX}_{fingerprint}_{}",
        millis.max(0).div_euclid(1000)
    )
}

/// Guesses plan keys from the naming convention.
///
/// Only keys whose creation second lands exactly on a searched bucket are
/// recoverable this way. Plans created at any other instant are invisible to
/// this strategy and are found through event replay or transaction history.
#[derive(Debug, Clone)]
pub struct CandidateKeyGenerator {
    days: u32,
    hour_step: u32,
    max_candidates: usize,
}

impl CandidateKeyGenerator {
    pub fn new(days: u32, hour_step: u32, max_candidates: usize) -> Self {
        Self {
            days,
            hour_step: hour_step.clamp(1, 24),
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(
            config.candidate_days,
            config.candidate_hour_step,
            config.max_candidates,
        )
    }

    /// Ordered, deduplicated candidates. The default key always comes first.
    pub fn generate(&self, owner: &Address, now: DateTime<Utc>) -> Vec<String> {
        let fingerprint = owner_fingerprint(owner);
        let now_ms = now.timestamp_millis();

        let mut seen = HashSet::new();
        let mut candidates = vec![DEFAULT_PLAN_KEY.to_string()];
        seen.insert(DEFAULT_PLAN_KEY.to_string());

        'days: for day in 0..i64::from(self.days) {
            let day_start = now_ms - day * MS_PER_DAY;
            for hour in (0..24u32).step_by(self.hour_step as usize) {
                if candidates.len() >= self.max_candidates {
                    break 'days;
                }
                let bucket_start = day_start - i64::from(hour) * MS_PER_HOUR;
                let key = plan_key_at_millis(&fingerprint, bucket_start);
                if seen.insert(key.clone()) {
                    candidates.push(key);
                }
            }
        }

        candidates
    }
}

impl Default for CandidateKeyGenerator {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}
