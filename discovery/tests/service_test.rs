
use std::{sync::Arc, time::Duration};

use alloy::primitives::U256;
use fixtures::{
    CONTRACT, FakeHistory, FakeLogs, FakeReader, OWNER, create_tx, fast_config, plan,
    setup_tracing,
};
use sip_discovery::{
    DiscoveryPipeline, DiscoveryService,
    config::RefreshConfig,
    refresh::RefreshState,
    registry::MemoryPlanKeyStore,
    view::ExplorerLinks,
};

type TestService = DiscoveryService<FakeReader, FakeLogs, FakeHistory, MemoryPlanKeyStore>;

fn service(reader: FakeReader, logs: FakeLogs, history: FakeHistory) -> Arc<TestService> {
    let pipeline = DiscoveryPipeline::new(
        Arc::new(reader),
        Arc::new(logs),
        Some(Arc::new(history)),
        Arc::new(MemoryPlanKeyStore::new()),
        CONTRACT,
        &fast_config(),
    );
    let links = ExplorerLinks::new("https://testnet.snowtrace.io/").expect("Should parse url");
    Arc::new(DiscoveryService::new(
        Arc::new(pipeline),
        links,
        &RefreshConfig::default(),
    ))
}

#[tokio::test]
async fn first_request_waits_for_discovery() {
    setup_tracing();

    let reader = FakeReader::new()
        .with_plan(OWNER, plan("K1", 100, 25, true))
        .with_plan(OWNER, plan("K2", 200, 0, true));
    let logs = FakeLogs::new(1_000).with_log(OWNER, "K1", 100);
    let history = FakeHistory::with(vec![create_tx(9, "K2")]);
    let service = service(reader, logs, history);

    let owner_plans = service.plans(OWNER).await;

    assert!(owner_plans.refreshed_at.is_some());
    assert!(owner_plans.last_error.is_none());
    assert_eq!(owner_plans.plans.len(), 2);
    assert_eq!(owner_plans.summary.active_plans, 2);
    assert_eq!(owner_plans.summary.total_committed, U256::from(300u64));
    assert_eq!(owner_plans.summary.total_executed, U256::from(25u64));

    let k2 = owner_plans
        .plans
        .iter()
        .find(|v| v.plan.plan_key == "K2")
        .expect("K2 should be listed");
    assert_eq!(
        k2.creation_tx_link.as_deref(),
        Some(format!("https://testnet.snowtrace.io/tx/0x{}", "09".repeat(32)).as_str())
    );
}

async fn wait_idle(service: &TestService) {
    for _ in 0..100 {
        if service.plans(OWNER).await.state == RefreshState::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("refresh never settled");
}

#[tokio::test]
async fn refresh_advances_generation() {
    let service = service(FakeReader::new(), FakeLogs::new(1_000), FakeHistory::empty());

    let first = service.plans(OWNER).await;
    wait_idle(&service).await;

    let status = service.refresh(OWNER).await;
    assert!(!status.queued);
    assert!(status.generation > first.generation);
    assert_eq!(service.trigger_all(), 1);
}

#[tokio::test]
async fn manual_check_returns_view() {
    let reader = FakeReader::new().with_plan(OWNER, plan("typed_by_hand", 100, 0, true));
    let service = service(reader, FakeLogs::new(1_000), FakeHistory::empty());

    let view = service
        .check_plan_key(OWNER, "typed_by_hand")
        .await
        .expect("Lookup should succeed")
        .expect("Plan should exist");
    assert_eq!(view.plan.plan_key, "typed_by_hand");
    assert!(view.creation_tx_link.is_none());
    assert_eq!(
        view.contract_link,
        format!("https://testnet.snowtrace.io/address/{CONTRACT}")
    );

    assert!(
        service
            .check_plan_key(OWNER, "unknown")
            .await
            .expect("Lookup should succeed")
            .is_none()
    );

    // the checked key is now part of every discovery run
    let owner_plans = service.plans(OWNER).await;
    assert_eq!(owner_plans.plans.len(), 1);
}
