use std::sync::Arc;

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use sip_core::{
    contract::{LogSource, PlanReader},
    error::SipError,
    plan::Plan,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::RefreshConfig,
    history::TransactionHistory,
    pipeline::DiscoveryPipeline,
    refresh::{DiscoverySnapshot, RefreshController, RefreshState, Trigger},
    registry::PlanKeyStore,
    view::{ExplorerLinks, PlanView, PortfolioSummary},
};

/// What the service reports for one owner
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerPlans {
    pub owner: Address,
    pub plans: Vec<PlanView>,
    pub summary: PortfolioSummary,
    pub generation: u64,
    pub state: RefreshState,
    pub last_error: Option<SipError>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Result of a refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub generation: u64,
    /// A run was already in flight; the refresh runs right after it
    pub queued: bool,
}

type Controller<R, L, H, S> = RefreshController<DiscoveryPipeline<R, L, H, S>>;

/// One refresh controller per tracked owner. Owners that are not asked about
/// for a while are dropped and no longer refreshed.
pub struct DiscoveryService<R, L, H, S> {
    pipeline: Arc<DiscoveryPipeline<R, L, H, S>>,
    controllers: Cache<Address, Arc<Controller<R, L, H, S>>>,
    links: ExplorerLinks,
}

impl<R, L, H, S> DiscoveryService<R, L, H, S>
where
    R: PlanReader + 'static,
    L: LogSource + 'static,
    H: TransactionHistory + 'static,
    S: PlanKeyStore + 'static,
{
    pub fn new(
        pipeline: Arc<DiscoveryPipeline<R, L, H, S>>,
        links: ExplorerLinks,
        config: &RefreshConfig,
    ) -> Self {
        let controllers = Cache::builder()
            .max_capacity(config.max_tracked_owners)
            .time_to_idle(config.owner_idle_ttl())
            .build();

        Self {
            pipeline,
            controllers,
            links,
        }
    }

    pub fn pipeline(&self) -> &Arc<DiscoveryPipeline<R, L, H, S>> {
        &self.pipeline
    }

    async fn controller(&self, owner: Address) -> Arc<Controller<R, L, H, S>> {
        let pipeline = self.pipeline.clone();
        self.controllers
            .get_with(owner, async move {
                tracing::debug!(owner = %owner, "Tracking owner");
                Arc::new(RefreshController::for_owner(pipeline, owner))
            })
            .await
    }

    pub fn tracked_owners(&self) -> u64 {
        self.controllers.entry_count()
    }

    /// Current plans of `owner`. The first call for an owner waits for its
    /// first run.
    pub async fn plans(&self, owner: Address) -> OwnerPlans {
        let controller = self.controller(owner).await;

        let snapshot = if controller.snapshot().is_ready() {
            controller.snapshot()
        } else {
            wait_ready(&controller).await
        };

        self.owner_plans(owner, snapshot, controller.state()).await
    }

    /// Starts a refresh, or queues one behind the run in flight
    pub async fn refresh(&self, owner: Address) -> RefreshStatus {
        let controller = self.controller(owner).await;
        // a started run continues detached once its handle is dropped
        let queued = matches!(controller.trigger(), Some(Trigger::Queued));
        RefreshStatus {
            generation: controller.generation(),
            queued,
        }
    }

    /// Refreshes every tracked owner. Owners with a run in flight get one
    /// follow-up run.
    pub fn trigger_all(&self) -> usize {
        let mut triggered = 0;
        for (_, controller) in self.controllers.iter() {
            if controller.trigger().is_some() {
                triggered += 1;
            }
        }
        triggered
    }

    pub async fn check_plan_key(
        &self,
        owner: Address,
        plan_key: &str,
    ) -> Result<Option<PlanView>, SipError> {
        let Some(plan) = self.pipeline.check_plan_key(owner, plan_key).await? else {
            return Ok(None);
        };
        let creation_tx = self.creation_tx(owner, &plan.plan_key).await;
        Ok(Some(self.view(plan, creation_tx)))
    }

    async fn creation_tx(&self, owner: Address, plan_key: &str) -> Option<B256> {
        match self
            .pipeline
            .store()
            .creation_transaction(owner, plan_key)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(owner = %owner, plan_key = %plan_key, error = %e, "Failed to read creation transaction");
                None
            }
        }
    }

    fn view(&self, plan: Plan, creation_tx: Option<B256>) -> PlanView {
        let now = Utc::now().timestamp().max(0) as u64;
        PlanView::new(plan, self.pipeline.contract(), creation_tx, &self.links, now)
    }

    async fn owner_plans(
        &self,
        owner: Address,
        snapshot: DiscoverySnapshot,
        state: RefreshState,
    ) -> OwnerPlans {
        let summary = PortfolioSummary::from_plans(&snapshot.plans);

        let mut plans = Vec::with_capacity(snapshot.plans.len());
        for plan in snapshot.plans {
            let creation_tx = self.creation_tx(owner, &plan.plan_key).await;
            plans.push(self.view(plan, creation_tx));
        }

        OwnerPlans {
            owner,
            plans,
            summary,
            generation: snapshot.generation,
            state,
            last_error: snapshot.last_error,
            refreshed_at: snapshot.refreshed_at,
        }
    }

    /// Triggers a refresh of every tracked owner on each new block
    pub fn spawn_block_listener(
        self: Arc<Self>,
        mut blocks: watch::Receiver<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = blocks.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let block = *blocks.borrow_and_update();
                        let triggered = self.trigger_all();
                        tracing::debug!(block, triggered, "Refreshing tracked owners");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Block listener stopped");
        })
    }
}

async fn wait_ready<D>(controller: &Arc<RefreshController<D>>) -> DiscoverySnapshot
where
    D: crate::pipeline::Discover + 'static,
{
    let mut updates = controller.subscribe();
    // spawned so a dropped request cannot cancel the run
    if controller.state() == RefreshState::Idle && controller.trigger().is_none() {
        return controller.snapshot();
    }

    match updates.wait_for(DiscoverySnapshot::is_ready).await {
        Ok(snapshot) => snapshot.clone(),
        Err(_) => controller.snapshot(),
    }
}
