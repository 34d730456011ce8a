
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::primitives::Address;
use fixtures::{OTHER_OWNER, OWNER, plan, setup_tracing, transport_error};
use sip_core::{
    contract::LogSource,
    error::SipError,
    plan::PlanCreatedLog,
};
use sip_discovery::{
    BlockWatcher, Discover, DiscoveryRun, RefreshController,
    fetcher::Strategy,
    pipeline::StrategyOutcome,
    reconcile::{Confirmation, MergedPlans},
    refresh::{RefreshState, RunOutcome, Trigger},
};
use tokio::sync::Notify;

fn successful_run(owner: Address, key: &str) -> DiscoveryRun {
    DiscoveryRun {
        owner,
        merged: MergedPlans {
            plans: vec![plan(key, 100, 0, true)],
            confirmations: vec![Confirmation {
                plan_key: key.to_string(),
                creation_tx: None,
            }],
        },
        outcomes: vec![StrategyOutcome {
            strategy: Strategy::Candidates,
            keys: 1,
            active: 1,
            failed_lookups: 0,
            source_error: None,
        }],
    }
}

fn failed_run(owner: Address) -> DiscoveryRun {
    DiscoveryRun {
        owner,
        merged: MergedPlans::default(),
        outcomes: vec![
            StrategyOutcome {
                strategy: Strategy::Candidates,
                keys: 30,
                active: 0,
                failed_lookups: 30,
                source_error: None,
            },
            StrategyOutcome {
                strategy: Strategy::Events,
                keys: 0,
                active: 0,
                failed_lookups: 0,
                source_error: Some(transport_error()),
            },
        ],
    }
}

/// First run blocks until released, later runs finish at once
#[derive(Default)]
struct GatedDiscover {
    calls: AtomicUsize,
    release: Notify,
    committed: Mutex<Vec<String>>,
}

impl Discover for GatedDiscover {
    async fn collect(&self, owner: Address) -> DiscoveryRun {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            self.release.notified().await;
        }
        successful_run(owner, &format!("run{call}"))
    }

    async fn commit(&self, run: &DiscoveryRun) -> Result<usize, SipError> {
        let mut committed = self.committed.lock().unwrap();
        for confirmation in &run.merged.confirmations {
            committed.push(confirmation.plan_key.clone());
        }
        Ok(run.merged.confirmations.len())
    }
}

/// Plays back canned runs in order
struct ScriptedDiscover {
    runs: Mutex<VecDeque<DiscoveryRun>>,
}

impl ScriptedDiscover {
    fn new(runs: Vec<DiscoveryRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
        }
    }
}

impl Discover for ScriptedDiscover {
    async fn collect(&self, owner: Address) -> DiscoveryRun {
        let next = self.runs.lock().unwrap().pop_front();
        next.unwrap_or_else(|| successful_run(owner, "fallback"))
    }

    async fn commit(&self, run: &DiscoveryRun) -> Result<usize, SipError> {
        Ok(run.merged.confirmations.len())
    }
}

/// Every collect takes `delay`; tracks how many overlap
struct SlowDiscover {
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowDiscover {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }
}

impl Discover for SlowDiscover {
    async fn collect(&self, owner: Address) -> DiscoveryRun {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        successful_run(owner, "slow")
    }

    async fn commit(&self, run: &DiscoveryRun) -> Result<usize, SipError> {
        Ok(run.merged.confirmations.len())
    }
}

/// Collect is instant, commit takes a while
#[derive(Default)]
struct SlowCommitDiscover {
    commits_started: AtomicUsize,
    committed: Mutex<Vec<String>>,
}

impl Discover for SlowCommitDiscover {
    async fn collect(&self, owner: Address) -> DiscoveryRun {
        let key = if owner == OWNER { "owner_plan" } else { "other_plan" };
        successful_run(owner, key)
    }

    async fn commit(&self, run: &DiscoveryRun) -> Result<usize, SipError> {
        self.commits_started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut committed = self.committed.lock().unwrap();
        for confirmation in &run.merged.confirmations {
            committed.push(confirmation.plan_key.clone());
        }
        Ok(run.merged.confirmations.len())
    }
}

async fn settle(trigger: Option<Trigger>) -> Option<RunOutcome> {
    match trigger {
        Some(Trigger::Started(handle)) => Some(handle.await.expect("Run task should not panic")),
        _ => None,
    }
}

async fn wait_for_calls(discover: &GatedDiscover, calls: usize) {
    for _ in 0..100 {
        if discover.calls.load(Ordering::SeqCst) >= calls {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("discovery was never started");
}

#[tokio::test]
async fn owner_change_discards_inflight_run() {
    setup_tracing();

    let discover = Arc::new(GatedDiscover::default());
    let controller = Arc::new(RefreshController::for_owner(discover.clone(), OWNER));

    let Some(Trigger::Started(first)) = controller.trigger() else {
        panic!("an idle controller should start a run");
    };
    wait_for_calls(&discover, 1).await;
    assert_eq!(controller.state(), RefreshState::Running);

    assert!(matches!(
        controller.set_owner(OTHER_OWNER).await,
        Some(Trigger::Queued)
    ));

    discover.release.notify_one();
    // the stale run is dropped, the queued run for the new owner publishes
    assert!(matches!(
        first.await.unwrap(),
        RunOutcome::Published { plans: 1, .. }
    ));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.owner, Some(OTHER_OWNER));
    assert_eq!(snapshot.plans.len(), 1);
    assert_eq!(snapshot.plans[0].plan_key, "run1");
    assert_eq!(snapshot.generation, controller.generation());

    // the stale run never reached the registry
    assert_eq!(*discover.committed.lock().unwrap(), vec!["run1".to_string()]);
    assert_eq!(controller.state(), RefreshState::Idle);
}

#[tokio::test]
async fn triggers_during_a_run_collapse_into_one_follow_up() {
    let discover = Arc::new(GatedDiscover::default());
    let controller = Arc::new(RefreshController::for_owner(discover.clone(), OWNER));

    let Some(Trigger::Started(first)) = controller.trigger() else {
        panic!("an idle controller should start a run");
    };
    wait_for_calls(&discover, 1).await;
    let generation = controller.generation();

    for _ in 0..3 {
        assert!(matches!(controller.trigger(), Some(Trigger::Queued)));
    }
    assert!(controller.refresh_now().await.is_none());
    // queued triggers leave the running generation current
    assert_eq!(controller.generation(), generation);

    discover.release.notify_one();
    assert!(matches!(
        first.await.unwrap(),
        RunOutcome::Published { .. }
    ));

    assert_eq!(discover.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        *discover.committed.lock().unwrap(),
        vec!["run0".to_string(), "run1".to_string()]
    );
    assert_eq!(controller.snapshot().plans[0].plan_key, "run1");
    assert_eq!(controller.generation(), generation + 1);
}

#[tokio::test]
async fn slow_runs_publish_under_steady_triggers() {
    let discover = Arc::new(SlowDiscover::new(Duration::from_millis(50)));
    let controller = Arc::new(RefreshController::for_owner(discover.clone(), OWNER));

    let mut started = 0;
    for _ in 0..20 {
        if let Some(Trigger::Started(_)) = controller.trigger() {
            started += 1;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let snapshot = controller.snapshot();
    assert!(snapshot.is_ready());
    assert_eq!(snapshot.plans[0].plan_key, "slow");
    assert!(snapshot.last_error.is_none());

    assert_eq!(discover.max_active.load(Ordering::SeqCst), 1);
    assert!(discover.calls.load(Ordering::SeqCst) < 20);
    assert!(started < 20);
}

#[tokio::test]
async fn owner_change_waits_for_inflight_commit() {
    let discover = Arc::new(SlowCommitDiscover::default());
    let controller = Arc::new(RefreshController::for_owner(discover.clone(), OWNER));

    let first = controller.trigger();
    for _ in 0..100 {
        if discover.commits_started.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(discover.commits_started.load(Ordering::SeqCst), 1);

    let follow_up = controller.set_owner(OTHER_OWNER).await;

    // the commit completed and published before the owner moved on
    assert_eq!(
        *discover.committed.lock().unwrap(),
        vec!["owner_plan".to_string()]
    );
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.owner, Some(OTHER_OWNER));
    assert!(snapshot.plans.is_empty());

    settle(follow_up).await;
    settle(first).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.owner, Some(OTHER_OWNER));
    assert_eq!(snapshot.plans[0].plan_key, "other_plan");
    assert_eq!(
        *discover.committed.lock().unwrap(),
        vec!["owner_plan".to_string(), "other_plan".to_string()]
    );
}

#[tokio::test]
async fn total_failure_keeps_last_known_plans() {
    let discover = Arc::new(ScriptedDiscover::new(vec![
        successful_run(OWNER, "good"),
        failed_run(OWNER),
    ]));
    let controller = RefreshController::for_owner(discover, OWNER);

    assert!(matches!(
        controller.refresh_now().await,
        Some(RunOutcome::Published { .. })
    ));
    assert!(matches!(
        controller.refresh_now().await,
        Some(RunOutcome::Failed(SipError::DiscoveryFailed { .. }))
    ));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.plans.len(), 1);
    assert_eq!(snapshot.plans[0].plan_key, "good");
    assert!(matches!(
        snapshot.last_error,
        Some(SipError::DiscoveryFailed { .. })
    ));
    assert!(snapshot.is_ready());
}

#[tokio::test]
async fn recovery_clears_last_error() {
    let discover = Arc::new(ScriptedDiscover::new(vec![
        failed_run(OWNER),
        successful_run(OWNER, "back"),
    ]));
    let controller = RefreshController::for_owner(discover, OWNER);

    controller.refresh_now().await;
    assert!(controller.snapshot().last_error.is_some());
    assert!(controller.snapshot().plans.is_empty());

    controller.refresh_now().await;
    let snapshot = controller.snapshot();
    assert!(snapshot.last_error.is_none());
    assert_eq!(snapshot.plans[0].plan_key, "back");
}

#[tokio::test]
async fn owner_change_resets_published_plans() {
    let discover = Arc::new(ScriptedDiscover::new(vec![
        successful_run(OWNER, "owner_plan"),
        successful_run(OTHER_OWNER, "other_plan"),
    ]));
    let controller = Arc::new(RefreshController::for_owner(discover, OWNER));
    controller.refresh_now().await;
    let before = controller.generation();

    let trigger = controller.set_owner(OTHER_OWNER).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.owner, Some(OTHER_OWNER));
    assert!(snapshot.plans.is_empty());
    assert!(!snapshot.is_ready());
    assert!(controller.generation() > before);

    settle(trigger).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.plans[0].plan_key, "other_plan");
}

#[tokio::test]
async fn subscribers_see_published_snapshots() {
    let discover = Arc::new(ScriptedDiscover::new(vec![successful_run(OWNER, "k")]));
    let controller = Arc::new(RefreshController::for_owner(discover, OWNER));
    let mut updates = controller.subscribe();

    controller.trigger().expect("Owner is set");

    let snapshot = updates
        .wait_for(|s| s.is_ready())
        .await
        .expect("Controller is alive")
        .clone();
    assert_eq!(snapshot.plans.len(), 1);
}

#[tokio::test]
async fn trigger_without_owner_does_nothing() {
    let controller = Arc::new(RefreshController::new(Arc::new(ScriptedDiscover::new(
        Vec::new(),
    ))));
    assert!(controller.trigger().is_none());
    assert!(controller.refresh_now().await.is_none());
    assert_eq!(controller.generation(), 0);
}

struct MovingChain {
    latest: AtomicU64,
}

impl LogSource for MovingChain {
    async fn latest_block(&self) -> Result<u64, SipError> {
        Ok(self.latest.load(Ordering::SeqCst))
    }

    async fn plan_created_logs(
        &self,
        _owner: Address,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<PlanCreatedLog>, SipError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn block_watcher_reports_only_advances() {
    let chain = Arc::new(MovingChain {
        latest: AtomicU64::new(100),
    });
    let watcher = BlockWatcher::new(chain.clone(), Duration::from_millis(10));
    let blocks = watcher.subscribe();

    assert_eq!(watcher.poll_once().await.unwrap(), Some(100));
    assert_eq!(watcher.poll_once().await.unwrap(), None);

    chain.latest.store(101, Ordering::SeqCst);
    assert_eq!(watcher.poll_once().await.unwrap(), Some(101));
    assert_eq!(*blocks.borrow(), 101);
}

#[tokio::test]
async fn block_watcher_stops_on_shutdown() {
    let chain = Arc::new(MovingChain {
        latest: AtomicU64::new(5),
    });
    let watcher = Arc::new(BlockWatcher::new(chain, Duration::from_millis(5)));
    let mut blocks = watcher.subscribe();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = watcher.clone().spawn(shutdown_rx);
    blocks.changed().await.expect("Watcher is alive");
    assert_eq!(*blocks.borrow(), 5);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("Watcher should stop")
        .unwrap();
}
