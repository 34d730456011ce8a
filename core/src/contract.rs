use alloy::{
    primitives::{Address, Selector},
    providers::Provider,
    rpc::types::Filter,
    sol,
    sol_types::{SolCall, SolEvent},
};

use crate::{
    chain::Chain,
    error::{ContractInteractionErrorKind, SipError},
    plan::{Plan, PlanCreatedLog, PlanLookup},
};

sol! {
    #[sol(rpc)]
    contract SipPlanManager {
        struct SipPlan {
            address token;
            uint256 totalAmount;
            uint256 amountPerInterval;
            uint256 frequency;
            uint256 nextExecution;
            uint256 maturity;
            address destAddress;
            uint256 executedAmount;
            bool active;
        }

        event PlanCreated(address indexed user, string pool, uint256 total, uint256 intervalAmount);

        function createPlanWithNative(
            string pool,
            uint256 amountPerInterval,
            uint256 frequency,
            uint256 maturity,
            address destAddress
        ) external payable;

        function executeSIP(string pool) external;

        function finalizeSIP(string pool) external;

        function getPlan(address user, string pool) external view returns (SipPlan memory);
    }
}

/// Selector of `createPlanWithNative(string,uint256,uint256,uint256,address)`
pub const CREATE_PLAN_SELECTOR: Selector = alloy::primitives::FixedBytes(SipPlanManager::createPlanWithNativeCall::SELECTOR);

/// Point lookup against the plan manager
pub trait PlanReader: Send + Sync {
    fn get_plan(&self, owner: Address, plan_key: &str) -> impl Future<Output = PlanLookup> + Send;
}

/// Access to `PlanCreated` logs
pub trait LogSource: Send + Sync {
    fn latest_block(&self) -> impl Future<Output = Result<u64, SipError>> + Send;

    /// Logs for `owner` in the inclusive range `[from_block, to_block]`
    fn plan_created_logs(
        &self,
        owner: Address,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<PlanCreatedLog>, SipError>> + Send;
}

/// Classifies a raw `getPlan` record. An all-zero struct is how the contract
/// answers for a key that was never created.
pub fn classify_record(plan_key: &str, record: SipPlanManager::SipPlan) -> PlanLookup {
    if record.totalAmount.is_zero() && !record.active {
        return PlanLookup::NotFound;
    }

    let plan = Plan {
        plan_key: plan_key.to_string(),
        asset_address: record.token,
        total_amount: record.totalAmount,
        amount_per_interval: record.amountPerInterval,
        executed_amount: record.executedAmount,
        frequency_seconds: record.frequency.saturating_to::<u64>(),
        next_execution_time: record.nextExecution.saturating_to::<u64>(),
        maturity_time: record.maturity.saturating_to::<u64>(),
        destination_address: record.destAddress,
        active: record.active,
    };

    if let Err(e) = plan.validate() {
        return PlanLookup::Failed(e);
    }

    if plan.active {
        PlanLookup::Active(plan)
    } else {
        PlanLookup::Inactive(plan)
    }
}

/// The deployed plan manager on one chain
pub struct SipContract<C: Chain> {
    pub chain: C,
    pub address: Address,
}

impl<C: Chain> SipContract<C> {
    pub fn new(chain: C, address: Address) -> Self {
        Self { chain, address }
    }
}

impl<C: Chain> PlanReader for SipContract<C> {
    async fn get_plan(&self, owner: Address, plan_key: &str) -> PlanLookup {
        let contract = SipPlanManager::new(self.address, self.chain.provider().clone());

        match contract.getPlan(owner, plan_key.to_string()).call().await {
            Ok(record) => classify_record(plan_key, record),
            Err(e) => {
                let error = SipError::contract_call(self.chain.chain_id(), self.address, e);
                match &error {
                    SipError::ContractInteractionError {
                        kind: ContractInteractionErrorKind::ZeroData { .. },
                        ..
                    } => PlanLookup::NotFound,
                    _ => PlanLookup::Failed(error),
                }
            }
        }
    }
}

impl<C: Chain> LogSource for SipContract<C> {
    async fn latest_block(&self) -> Result<u64, SipError> {
        self.chain
            .provider()
            .get_block_number()
            .await
            .map_err(|e| SipError::rpc(&self.chain, &e))
    }

    async fn plan_created_logs(
        &self,
        owner: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PlanCreatedLog>, SipError> {
        let filter = Filter::new()
            .address(self.address)
            .event_signature(SipPlanManager::PlanCreated::SIGNATURE_HASH)
            .topic1(owner.into_word())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .chain
            .provider()
            .get_logs(&filter)
            .await
            .map_err(|e| SipError::rpc(&self.chain, &e))?;

        let mut created = Vec::with_capacity(logs.len());
        for log in logs {
            match log.log_decode::<SipPlanManager::PlanCreated>() {
                Ok(decoded) => {
                    let event = &decoded.inner.data;
                    created.push(PlanCreatedLog {
                        owner: event.user,
                        plan_key: event.pool.clone(),
                        total_amount: event.total,
                        amount_per_interval: event.intervalAmount,
                        block_number: decoded.block_number,
                        transaction_hash: decoded.transaction_hash,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        block_number = ?log.block_number,
                        error = %e,
                        "Skipping undecodable PlanCreated log"
                    );
                }
            }
        }

        Ok(created)
    }
}
