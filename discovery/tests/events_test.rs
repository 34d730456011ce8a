
use fixtures::{FakeLogs, OTHER_OWNER, OWNER, setup_tracing};
use sip_discovery::events::EventReplayScanner;

#[tokio::test]
async fn window_failure_keeps_other_windows() {
    setup_tracing();

    // range 0..=9_999 in windows of 2_000, the second one fails
    let logs = FakeLogs::new(9_999)
        .with_log(OWNER, "k1", 500)
        .with_log(OWNER, "k_lost", 2_500)
        .with_log(OWNER, "k2", 9_000)
        .with_failing_window(2_000);

    let scanner = EventReplayScanner::new(10_000, 2_000);
    let report = scanner.scan(&logs, OWNER, 9_999).await;

    let keys: Vec<_> = report.logs.iter().map(|l| l.plan_key.as_str()).collect();
    assert_eq!(keys, vec!["k1", "k2"]);
    assert_eq!(report.windows_scanned, 5);
    assert_eq!(report.failed_windows.len(), 1);
    assert_eq!(report.failed_windows[0].0.from_block, 2_000);
    assert_eq!(report.failed_windows[0].0.to_block, 3_999);
    assert!(!report.all_failed());
}

#[tokio::test]
async fn windows_are_sequential_and_bounded_by_lookback() {
    let logs = FakeLogs::new(1_000_000);
    let scanner = EventReplayScanner::new(5_000, 2_000);

    scanner.scan(&logs, OWNER, 1_000_000).await;

    assert_eq!(
        logs.queried(),
        vec![
            (995_000, 996_999),
            (997_000, 998_999),
            (999_000, 1_000_000),
        ]
    );
}

#[tokio::test]
async fn short_chain_starts_at_genesis() {
    let logs = FakeLogs::new(1_500).with_log(OWNER, "k1", 0);
    let report = EventReplayScanner::new(500_000, 2_000)
        .scan(&logs, OWNER, 1_500)
        .await;

    assert_eq!(logs.queried(), vec![(0, 1_500)]);
    assert_eq!(report.logs.len(), 1);
}

#[tokio::test]
async fn other_owners_are_ignored() {
    let logs = FakeLogs::new(100)
        .with_log(OTHER_OWNER, "theirs", 10)
        .with_log(OWNER, "mine", 20);

    let report = EventReplayScanner::new(1_000, 2_000)
        .scan(&logs, OWNER, 100)
        .await;

    assert_eq!(report.logs.len(), 1);
    assert_eq!(report.logs[0].plan_key, "mine");
}

#[tokio::test]
async fn every_window_failing_is_reported() {
    let logs = FakeLogs::new(5_000).with_all_windows_failing();
    let report = EventReplayScanner::new(5_000, 2_000)
        .scan(&logs, OWNER, 5_000)
        .await;

    assert!(report.logs.is_empty());
    assert_eq!(report.failed_windows.len(), 3);
    assert!(report.all_failed());
}
