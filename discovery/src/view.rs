use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use sip_core::{error::SipError, plan::Plan};
use url::Url;

const BPS: u64 = 10_000;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Builds block explorer links
#[derive(Debug, Clone)]
pub struct ExplorerLinks {
    base_url: Url,
}

impl ExplorerLinks {
    pub fn new(base_url: &str) -> Result<Self, SipError> {
        let mut base_url = Url::parse(base_url).map_err(|e| SipError::ValidationError {
            message: format!("Invalid explorer url {base_url}: {e}"),
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { base_url })
    }

    fn link(&self, kind: &str, id: &str) -> String {
        format!("{}{kind}/{id}", self.base_url)
    }

    pub fn address(&self, address: Address) -> String {
        self.link("address", &address.to_string())
    }

    pub fn transaction(&self, tx_hash: B256) -> String {
        self.link("tx", &tx_hash.to_string())
    }
}

/// A plan with the values a client displays next to it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    #[serde(flatten)]
    pub plan: Plan,
    pub remaining_amount: U256,
    /// Executed share of the total in basis points
    pub progress_bps: u32,
    pub frequency_days: u64,
    pub is_native: bool,
    pub can_execute: bool,
    pub can_finalize: bool,
    pub contract_link: String,
    pub creation_tx_link: Option<String>,
}

impl PlanView {
    pub fn new(
        plan: Plan,
        contract: Address,
        creation_tx: Option<B256>,
        links: &ExplorerLinks,
        now_secs: u64,
    ) -> Self {
        Self {
            remaining_amount: plan.remaining_amount(),
            progress_bps: progress_bps(&plan),
            frequency_days: plan.frequency_seconds / SECONDS_PER_DAY,
            is_native: plan.is_native(),
            can_execute: now_secs >= plan.next_execution_time,
            can_finalize: now_secs >= plan.maturity_time,
            contract_link: links.address(contract),
            creation_tx_link: creation_tx.map(|tx| links.transaction(tx)),
            plan,
        }
    }
}

fn progress_bps(plan: &Plan) -> u32 {
    if plan.total_amount.is_zero() {
        return 0;
    }
    let scaled = plan.executed_amount.saturating_mul(U256::from(BPS)) / plan.total_amount;
    scaled.min(U256::from(BPS)).saturating_to::<u32>()
}

/// Totals over the active plans of one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub active_plans: usize,
    pub total_committed: U256,
    pub total_executed: U256,
    pub total_remaining: U256,
}

impl PortfolioSummary {
    pub fn from_plans<'a>(plans: impl IntoIterator<Item = &'a Plan>) -> Self {
        plans
            .into_iter()
            .filter(|plan| plan.active)
            .fold(Self::default(), |mut summary, plan| {
                summary.active_plans += 1;
                summary.total_committed = summary.total_committed.saturating_add(plan.total_amount);
                summary.total_executed =
                    summary.total_executed.saturating_add(plan.executed_amount);
                summary.total_remaining =
                    summary.total_remaining.saturating_add(plan.remaining_amount());
                summary
            })
    }
}
