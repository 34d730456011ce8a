use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::SipError;

/// A recurring investment plan as read from the plan manager contract.
///
/// Plans are keyed by `(owner, plan_key)`. The engine only ever observes
/// them; execution and finalization happen on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub plan_key: String,
    /// Funding asset, `Address::ZERO` for the native asset
    pub asset_address: Address,
    pub total_amount: U256,
    pub amount_per_interval: U256,
    pub executed_amount: U256,
    pub frequency_seconds: u64,
    pub next_execution_time: u64,
    pub maturity_time: u64,
    pub destination_address: Address,
    pub active: bool,
}

impl Plan {
    pub fn is_native(&self) -> bool {
        self.asset_address == Address::ZERO
    }

    /// Amount still to be executed. Zero if the record is inconsistent.
    pub fn remaining_amount(&self) -> U256 {
        self.total_amount.saturating_sub(self.executed_amount)
    }

    /// Checks `executed_amount <= total_amount`
    pub fn validate(&self) -> Result<(), SipError> {
        if self.executed_amount > self.total_amount {
            return Err(SipError::InvalidPlanRecord {
                plan_key: self.plan_key.clone(),
                message: format!(
                    "executed amount {} exceeds total amount {}",
                    self.executed_amount, self.total_amount
                ),
            });
        }
        Ok(())
    }
}

/// Outcome of a single `(owner, plan_key)` point lookup
#[derive(Debug, Clone)]
pub enum PlanLookup {
    Active(Plan),
    Inactive(Plan),
    /// The key was never created by this owner
    NotFound,
    Failed(SipError),
}

impl PlanLookup {
    pub fn outcome_label(&self) -> &'static str {
        match self {
            PlanLookup::Active(_) => "active",
            PlanLookup::Inactive(_) => "inactive",
            PlanLookup::NotFound => "not_found",
            PlanLookup::Failed(_) => "failed",
        }
    }
}

/// A decoded `PlanCreated` log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCreatedLog {
    pub owner: Address,
    pub plan_key: String,
    pub total_amount: U256,
    pub amount_per_interval: U256,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
}
