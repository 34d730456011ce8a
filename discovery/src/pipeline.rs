use std::{collections::HashMap, sync::Arc};

use alloy::primitives::{Address, Selector};
use chrono::Utc;
use serde::Serialize;
use sip_core::{
    contract::{CREATE_PLAN_SELECTOR, LogSource, PlanReader},
    error::SipError,
    plan::{Plan, PlanLookup},
};

use crate::{
    candidates::CandidateKeyGenerator,
    config::DiscoveryConfig,
    events::EventReplayScanner,
    fetcher::{BatchedPlanFetcher, FetchReport, Strategy},
    history::{TransactionHistory, decode_create_plan_keys},
    reconcile::{self, MergedPlans, SourcedPlans},
    registry::PlanKeyStore,
};

/// How one strategy fared in a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOutcome {
    pub strategy: Strategy,
    pub keys: usize,
    pub active: usize,
    pub failed_lookups: usize,
    /// The evidence source itself could not be read
    pub source_error: Option<SipError>,
}

impl StrategyOutcome {
    /// No usable answer: the source failed or every lookup failed
    pub fn failed(&self) -> bool {
        self.source_error.is_some() || (self.keys > 0 && self.failed_lookups == self.keys)
    }

    fn from_report(strategy: Strategy, report: &FetchReport, source_error: Option<SipError>) -> Self {
        Self {
            strategy,
            keys: report.attempted,
            active: report.plans.len(),
            failed_lookups: report.failures.len(),
            source_error,
        }
    }

    fn source_failed(strategy: Strategy, error: SipError) -> Self {
        Self {
            strategy,
            keys: 0,
            active: 0,
            failed_lookups: 0,
            source_error: Some(error),
        }
    }
}

/// Result of collecting evidence for one owner, not yet committed
#[derive(Debug, Clone)]
pub struct DiscoveryRun {
    pub owner: Address,
    pub merged: MergedPlans,
    pub outcomes: Vec<StrategyOutcome>,
}

impl DiscoveryRun {
    pub fn plans(&self) -> &[Plan] {
        &self.merged.plans
    }

    /// Set when every strategy that ran failed
    pub fn total_failure(&self) -> Option<SipError> {
        if self.outcomes.is_empty() || !self.outcomes.iter().all(StrategyOutcome::failed) {
            return None;
        }

        let reasons: Vec<String> = self
            .outcomes
            .iter()
            .map(|o| match &o.source_error {
                Some(e) => format!("{}: {e}", o.strategy.as_str()),
                None => format!("{}: all {} lookups failed", o.strategy.as_str(), o.keys),
            })
            .collect();

        Some(SipError::DiscoveryFailed {
            message: reasons.join("; "),
        })
    }
}

/// Collect then commit, split so a caller can drop stale runs in between
pub trait Discover: Send + Sync {
    fn collect(&self, owner: Address) -> impl Future<Output = DiscoveryRun> + Send;

    fn commit(&self, run: &DiscoveryRun) -> impl Future<Output = Result<usize, SipError>> + Send;
}

/// The three discovery strategies over shared collaborators
pub struct DiscoveryPipeline<R, L, H, S> {
    reader: Arc<R>,
    logs: Arc<L>,
    history: Option<Arc<H>>,
    store: Arc<S>,
    contract: Address,
    create_selector: Selector,
    generator: CandidateKeyGenerator,
    fetcher: BatchedPlanFetcher,
    scanner: EventReplayScanner,
}

impl<R, L, H, S> DiscoveryPipeline<R, L, H, S>
where
    R: PlanReader,
    L: LogSource,
    H: TransactionHistory,
    S: PlanKeyStore,
{
    pub fn new(
        reader: Arc<R>,
        logs: Arc<L>,
        history: Option<Arc<H>>,
        store: Arc<S>,
        contract: Address,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            reader,
            logs,
            history,
            store,
            contract,
            create_selector: CREATE_PLAN_SELECTOR,
            generator: CandidateKeyGenerator::from_config(config),
            fetcher: BatchedPlanFetcher::from_config(config),
            scanner: EventReplayScanner::from_config(config),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Registry keys, then generated guesses
    async fn candidate_strategy(&self, owner: Address) -> (SourcedPlans, StrategyOutcome) {
        let mut keys = Vec::new();
        let mut creation_txs = HashMap::new();
        let mut source_error = None;

        match self.store.plan_keys(owner).await {
            Ok(registered) => {
                for entry in registered {
                    if let Some(tx) = entry.creation_tx {
                        creation_txs.insert(entry.plan_key.clone(), tx);
                    }
                    keys.push(entry.plan_key);
                }
            }
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Failed to read plan key registry");
                source_error = Some(SipError::from(e));
            }
        }

        keys.extend(self.generator.generate(&owner, Utc::now()));

        let report = self
            .fetcher
            .fetch(self.reader.as_ref(), owner, &keys, Strategy::Candidates)
            .await;

        // a registry outage alone is not a failed strategy while guesses still resolve
        let source_error = source_error.filter(|_| report.all_failed());
        let outcome = StrategyOutcome::from_report(Strategy::Candidates, &report, source_error);

        (
            SourcedPlans::new(Strategy::Candidates, report.plans).with_creation_txs(creation_txs),
            outcome,
        )
    }

    async fn event_strategy(&self, owner: Address) -> (SourcedPlans, StrategyOutcome) {
        let latest_block = match self.logs.latest_block().await {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Failed to read latest block");
                return (
                    SourcedPlans::new(Strategy::Events, Vec::new()),
                    StrategyOutcome::source_failed(Strategy::Events, e),
                );
            }
        };

        let scan = self.scanner.scan(self.logs.as_ref(), owner, latest_block).await;
        let scan_error = if scan.all_failed() {
            scan.failed_windows.last().map(|(_, e)| e.clone())
        } else {
            None
        };

        let mut creation_txs = HashMap::new();
        let keys: Vec<String> = scan
            .logs
            .into_iter()
            .map(|log| {
                if let Some(tx) = log.transaction_hash {
                    creation_txs.entry(log.plan_key.clone()).or_insert(tx);
                }
                log.plan_key
            })
            .collect();

        let report = self
            .fetcher
            .fetch(self.reader.as_ref(), owner, &keys, Strategy::Events)
            .await;
        let outcome = StrategyOutcome::from_report(Strategy::Events, &report, scan_error);

        (
            SourcedPlans::new(Strategy::Events, report.plans).with_creation_txs(creation_txs),
            outcome,
        )
    }

    async fn history_strategy(
        &self,
        owner: Address,
        history: &H,
    ) -> (SourcedPlans, StrategyOutcome) {
        let transactions = match history.transactions(owner, self.contract).await {
            Ok(transactions) => transactions,
            Err(e) => {
                tracing::warn!(owner = %owner, error = %e, "Failed to read transaction history");
                return (
                    SourcedPlans::new(Strategy::History, Vec::new()),
                    StrategyOutcome::source_failed(Strategy::History, e),
                );
            }
        };

        let creations = decode_create_plan_keys(&transactions, self.create_selector);
        let creation_txs: HashMap<String, _> = creations
            .iter()
            .map(|c| (c.plan_key.clone(), c.tx_hash))
            .collect();
        let keys: Vec<String> = creations.into_iter().map(|c| c.plan_key).collect();

        let report = self
            .fetcher
            .fetch(self.reader.as_ref(), owner, &keys, Strategy::History)
            .await;
        let outcome = StrategyOutcome::from_report(Strategy::History, &report, None);

        (
            SourcedPlans::new(Strategy::History, report.plans).with_creation_txs(creation_txs),
            outcome,
        )
    }

    /// Runs every strategy and merges what they found. Nothing is written.
    pub async fn collect(&self, owner: Address) -> DiscoveryRun {
        tracing::debug!(owner = %owner, "Starting discovery");

        let history = async {
            match &self.history {
                Some(history) => Some(self.history_strategy(owner, history.as_ref()).await),
                None => None,
            }
        };

        let (candidates, events, history) = tokio::join!(
            self.candidate_strategy(owner),
            self.event_strategy(owner),
            history
        );

        let mut sources = vec![candidates.0, events.0];
        let mut outcomes = vec![candidates.1, events.1];
        if let Some((plans, outcome)) = history {
            sources.push(plans);
            outcomes.push(outcome);
        }

        let merged = reconcile::merge(sources);
        tracing::debug!(owner = %owner, plans = merged.plans.len(), "Discovery collected");

        DiscoveryRun {
            owner,
            merged,
            outcomes,
        }
    }

    /// Records the run's confirmed keys
    pub async fn commit(&self, run: &DiscoveryRun) -> Result<usize, SipError> {
        reconcile::commit(self.store.as_ref(), run.owner, &run.merged.confirmations).await
    }

    /// Collects and commits in one go
    pub async fn discover(&self, owner: Address) -> Result<Vec<Plan>, SipError> {
        let run = self.collect(owner).await;
        if let Some(error) = run.total_failure() {
            return Err(error);
        }
        self.commit(&run).await?;
        Ok(run.merged.plans)
    }

    /// Looks up a single user supplied key and registers it when active
    pub async fn check_plan_key(
        &self,
        owner: Address,
        plan_key: &str,
    ) -> Result<Option<Plan>, SipError> {
        if plan_key.trim().is_empty() {
            return Err(SipError::ValidationError {
                message: "plan key must not be empty".to_string(),
            });
        }

        match self.reader.get_plan(owner, plan_key).await {
            PlanLookup::Active(plan) => {
                self.store.record(owner, plan_key, None).await?;
                tracing::info!(owner = %owner, plan_key = %plan_key, "Registered manually checked plan key");
                Ok(Some(plan))
            }
            PlanLookup::Inactive(_) | PlanLookup::NotFound => Ok(None),
            PlanLookup::Failed(e) => Err(e),
        }
    }
}

impl<R, L, H, S> Discover for DiscoveryPipeline<R, L, H, S>
where
    R: PlanReader,
    L: LogSource,
    H: TransactionHistory,
    S: PlanKeyStore,
{
    async fn collect(&self, owner: Address) -> DiscoveryRun {
        DiscoveryPipeline::collect(self, owner).await
    }

    async fn commit(&self, run: &DiscoveryRun) -> Result<usize, SipError> {
        DiscoveryPipeline::commit(self, run).await
    }
}
