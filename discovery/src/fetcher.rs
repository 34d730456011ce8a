use std::{collections::HashSet, time::Duration};

use alloy::primitives::Address;
use futures::future::join_all;
use serde::Serialize;
use sip_core::{
    contract::PlanReader,
    error::SipError,
    plan::{Plan, PlanLookup},
};

use crate::{config::DiscoveryConfig, metrics};

/// Where a set of candidate keys came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Registry keys plus generated guesses
    Candidates,
    /// `PlanCreated` log replay
    Events,
    /// Decoded create transactions
    History,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Candidates => "candidates",
            Strategy::Events => "events",
            Strategy::History => "history",
        }
    }
}

/// Lookup results for one strategy, split by outcome
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Resolved-active plans in candidate order
    pub plans: Vec<Plan>,
    pub inactive: usize,
    pub not_found: usize,
    pub failures: Vec<(String, SipError)>,
    pub attempted: usize,
}

impl FetchReport {
    /// True when lookups were attempted and none of them got an answer
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failures.len() == self.attempted
    }
}

/// Resolves plan keys through point lookups, `batch_size` at a time with a
/// pause between batches.
#[derive(Debug, Clone)]
pub struct BatchedPlanFetcher {
    batch_size: usize,
    batch_delay: Duration,
}

impl BatchedPlanFetcher {
    pub fn new(batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.batch_size, config.batch_delay())
    }

    pub async fn fetch<R: PlanReader>(
        &self,
        reader: &R,
        owner: Address,
        keys: &[String],
        strategy: Strategy,
    ) -> FetchReport {
        let mut seen = HashSet::new();
        let keys: Vec<&String> = keys.iter().filter(|key| seen.insert(*key)).collect();

        let mut report = FetchReport {
            attempted: keys.len(),
            ..Default::default()
        };

        for (index, batch) in keys.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let lookups = join_all(batch.iter().map(|key| reader.get_plan(owner, key))).await;

            for (key, lookup) in batch.iter().zip(lookups) {
                metrics::record_lookup(strategy.as_str(), lookup.outcome_label());
                match lookup {
                    PlanLookup::Active(plan) => report.plans.push(plan),
                    PlanLookup::Inactive(_) => {
                        tracing::debug!(owner = %owner, plan_key = %key, "Plan is no longer active");
                        report.inactive += 1;
                    }
                    PlanLookup::NotFound => {
                        tracing::trace!(owner = %owner, plan_key = %key, "Plan key does not exist");
                        report.not_found += 1;
                    }
                    PlanLookup::Failed(error) => {
                        tracing::warn!(
                            owner = %owner,
                            plan_key = %key,
                            strategy = strategy.as_str(),
                            error = %error,
                            "Plan lookup failed"
                        );
                        report.failures.push(((*key).clone(), error));
                    }
                }
            }
        }

        tracing::debug!(
            owner = %owner,
            strategy = strategy.as_str(),
            attempted = report.attempted,
            active = report.plans.len(),
            inactive = report.inactive,
            not_found = report.not_found,
            failed = report.failures.len(),
            "Finished plan lookups"
        );

        report
    }
}

impl Default for BatchedPlanFetcher {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}
