use alloy::{
    primitives::{Address, Bytes, U256},
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};

use crate::contract::SipPlanManager;

/// Write operations against the plan manager. These are encoded for a caller
/// to sign and submit; discovery never sends or retries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SipCommand {
    #[serde(rename_all = "camelCase")]
    CreatePlan {
        plan_key: String,
        amount_per_interval: U256,
        frequency_seconds: u64,
        maturity_time: u64,
        destination_address: Address,
        /// Funded up front as the call value
        total_amount: U256,
    },
    #[serde(rename_all = "camelCase")]
    ExecutePlan { plan_key: String },
    #[serde(rename_all = "camelCase")]
    FinalizePlan { plan_key: String },
}

/// A ready-to-sign contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl SipCommand {
    pub fn plan_key(&self) -> &str {
        match self {
            SipCommand::CreatePlan { plan_key, .. }
            | SipCommand::ExecutePlan { plan_key }
            | SipCommand::FinalizePlan { plan_key } => plan_key,
        }
    }

    pub fn encode(&self, contract: Address) -> EncodedCall {
        match self {
            SipCommand::CreatePlan {
                plan_key,
                amount_per_interval,
                frequency_seconds,
                maturity_time,
                destination_address,
                total_amount,
            } => EncodedCall {
                to: contract,
                data: SipPlanManager::createPlanWithNativeCall {
                    pool: plan_key.clone(),
                    amountPerInterval: *amount_per_interval,
                    frequency: U256::from(*frequency_seconds),
                    maturity: U256::from(*maturity_time),
                    destAddress: *destination_address,
                }
                .abi_encode()
                .into(),
                value: *total_amount,
            },
            SipCommand::ExecutePlan { plan_key } => EncodedCall {
                to: contract,
                data: SipPlanManager::executeSIPCall {
                    pool: plan_key.clone(),
                }
                .abi_encode()
                .into(),
                value: U256::ZERO,
            },
            SipCommand::FinalizePlan { plan_key } => EncodedCall {
                to: contract,
                data: SipPlanManager::finalizeSIPCall {
                    pool: plan_key.clone(),
                }
                .abi_encode()
                .into(),
                value: U256::ZERO,
            },
        }
    }
}
