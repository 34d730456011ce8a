use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry,
};
use std::sync::{Arc, RwLock};

/// Prometheus metrics for discovery runs
pub struct DiscoveryMetrics {
    pub run_duration: HistogramVec,
    pub lookups: IntCounterVec,
    pub failed_windows: IntCounter,
    pub skipped_transactions: IntCounter,
    pub discarded_runs: IntCounter,
}

impl DiscoveryMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let run_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "sip_discovery_run_duration_seconds",
                "Wall time of one discovery run across all strategies"
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["outcome"],
            registry
        )?;

        let lookups = register_int_counter_vec_with_registry!(
            Opts::new(
                "sip_discovery_plan_lookups_total",
                "Point lookups against the plan manager by strategy and outcome"
            ),
            &["strategy", "outcome"],
            registry
        )?;

        let failed_windows = register_int_counter_with_registry!(
            Opts::new(
                "sip_discovery_failed_log_windows_total",
                "Block windows whose log query failed during event replay"
            ),
            registry
        )?;

        let skipped_transactions = register_int_counter_with_registry!(
            Opts::new(
                "sip_discovery_skipped_transactions_total",
                "Create transactions skipped because their call data did not decode"
            ),
            registry
        )?;

        let discarded_runs = register_int_counter_with_registry!(
            Opts::new(
                "sip_discovery_discarded_runs_total",
                "Runs whose results were dropped because a newer generation started"
            ),
            registry
        )?;

        Ok(DiscoveryMetrics {
            run_duration,
            lookups,
            failed_windows,
            skipped_transactions,
            discarded_runs,
        })
    }
}

lazy_static! {
    static ref DEFAULT_DISCOVERY_METRICS_REGISTRY: Registry = Registry::new();

    static ref DEFAULT_DISCOVERY_METRICS: Arc<DiscoveryMetrics> = Arc::new(
        DiscoveryMetrics::new(&DEFAULT_DISCOVERY_METRICS_REGISTRY)
            .expect("Failed to create default discovery metrics"),
    );

    /// Set by the binary at startup, falls back to the default registry
    static ref DISCOVERY_METRICS_INSTANCE: RwLock<Option<Arc<DiscoveryMetrics>>> =
        RwLock::new(None);
}

/// Route discovery metrics into a registry owned by the binary
pub fn initialize_metrics(metrics: DiscoveryMetrics) {
    let mut instance = DISCOVERY_METRICS_INSTANCE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *instance = Some(Arc::new(metrics));
}

fn get_metrics() -> Arc<DiscoveryMetrics> {
    let instance = DISCOVERY_METRICS_INSTANCE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match instance.as_ref() {
        Some(metrics) => metrics.clone(),
        None => DEFAULT_DISCOVERY_METRICS.clone(),
    }
}

/// Prometheus text export of the default registry
pub fn export_default_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = DEFAULT_DISCOVERY_METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_run(outcome: &str, duration_seconds: f64) {
    get_metrics()
        .run_duration
        .with_label_values(&[outcome])
        .observe(duration_seconds);
}

pub fn record_lookup(strategy: &str, outcome: &str) {
    get_metrics()
        .lookups
        .with_label_values(&[strategy, outcome])
        .inc();
}

pub fn record_failed_window() {
    get_metrics().failed_windows.inc();
}

pub fn record_skipped_transaction() {
    get_metrics().skipped_transactions.inc();
}

pub fn record_discarded_run() {
    get_metrics().discarded_runs.inc();
}
