use std::collections::{HashMap, HashSet};

use alloy::primitives::{Address, B256};
use sip_core::{error::SipError, plan::Plan};

use crate::{fetcher::Strategy, registry::PlanKeyStore};

/// Active plans one strategy resolved, with creation transactions it knows of
#[derive(Debug, Clone)]
pub struct SourcedPlans {
    pub strategy: Strategy,
    pub plans: Vec<Plan>,
    pub creation_txs: HashMap<String, B256>,
}

impl SourcedPlans {
    pub fn new(strategy: Strategy, plans: Vec<Plan>) -> Self {
        Self {
            strategy,
            plans,
            creation_txs: HashMap::new(),
        }
    }

    pub fn with_creation_txs(mut self, creation_txs: HashMap<String, B256>) -> Self {
        self.creation_txs = creation_txs;
        self
    }
}

/// A key to write back to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub plan_key: String,
    pub creation_tx: Option<B256>,
}

#[derive(Debug, Clone, Default)]
pub struct MergedPlans {
    pub plans: Vec<Plan>,
    pub confirmations: Vec<Confirmation>,
}

/// Merges strategy results by plan key. The first record seen for a key
/// wins; a creation transaction is taken from whichever source knows one.
pub fn merge(sources: Vec<SourcedPlans>) -> MergedPlans {
    let mut seen = HashSet::new();
    let mut merged = MergedPlans::default();
    let mut creation_txs: HashMap<String, B256> = HashMap::new();

    for source in &sources {
        for (key, tx) in &source.creation_txs {
            creation_txs.entry(key.clone()).or_insert(*tx);
        }
    }

    for source in sources {
        for plan in source.plans {
            if !plan.active {
                continue;
            }
            if let Err(e) = plan.validate() {
                tracing::warn!(plan_key = %plan.plan_key, error = %e, "Dropping invalid plan");
                continue;
            }
            if !seen.insert(plan.plan_key.clone()) {
                tracing::trace!(
                    plan_key = %plan.plan_key,
                    strategy = source.strategy.as_str(),
                    "Duplicate plan key"
                );
                continue;
            }

            merged.confirmations.push(Confirmation {
                plan_key: plan.plan_key.clone(),
                creation_tx: creation_txs.get(&plan.plan_key).copied(),
            });
            merged.plans.push(plan);
        }
    }

    merged
}

/// Writes confirmed keys to the registry. Returns how many were new.
pub async fn commit<S: PlanKeyStore>(
    store: &S,
    owner: Address,
    confirmations: &[Confirmation],
) -> Result<usize, SipError> {
    let mut new_keys = 0;
    for confirmation in confirmations {
        if store
            .record(owner, &confirmation.plan_key, confirmation.creation_tx)
            .await?
        {
            new_keys += 1;
        }
    }

    if new_keys > 0 {
        tracing::info!(owner = %owner, new_keys, "Recorded newly discovered plan keys");
    }
    Ok(new_keys)
}
