use std::sync::Arc;

use sip_core::{
    chain::SipChainConfig,
    contract::{CREATE_PLAN_SELECTOR, SipContract},
};
use sip_discovery::{
    BlockWatcher, DiscoveryPipeline, DiscoveryService,
    history::RoutescanHistoryBuilder,
    metrics::{DiscoveryMetrics, initialize_metrics},
    registry::RedisPlanKeyRegistry,
    view::ExplorerLinks,
};
use sip_engine::{
    config,
    http::server::{EngineServer, EngineServerState},
};
use tokio::sync::watch;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::get_config()?;

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default levels if RUST_LOG is not set
            "sip_engine=debug,sip_discovery=debug,sip_core=info,tower_http=debug".into()
        }),
    );

    match config.server.log_format {
        config::LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        config::LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let chain = SipChainConfig {
        chain_id: config.chain.chain_id,
        rpc_url: &config.chain.rpc_url,
        rpc_api_key: config.chain.rpc_api_key.as_deref(),
    }
    .to_chain()?;
    tracing::info!(chain_id = config.chain.chain_id, "Chain client initialized");

    let history = if config.history.enabled {
        let history = RoutescanHistoryBuilder::new(&config.history.base_url)?
            .with_ecosystem(config.history.ecosystem.clone())
            .with_limit(config.history.limit)
            .with_client(chain.http_client().clone())
            .with_input_provider(chain.provider.clone(), CREATE_PLAN_SELECTOR)
            .build()?;
        Some(Arc::new(history))
    } else {
        tracing::info!("Transaction history strategy disabled");
        None
    };

    let contract = Arc::new(SipContract::new(chain, config.chain.contract_address));

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let registry = Arc::new(RedisPlanKeyRegistry::new(
        redis_client.get_connection_manager().await?,
        config.redis.namespace.clone(),
    ));
    tracing::info!("Plan key registry initialized");

    let metrics_registry = Arc::new(prometheus::Registry::new());
    initialize_metrics(DiscoveryMetrics::new(&metrics_registry)?);

    let pipeline = DiscoveryPipeline::new(
        contract.clone(),
        contract.clone(),
        history,
        registry,
        config.chain.contract_address,
        &config.discovery,
    );

    let discovery = Arc::new(DiscoveryService::new(
        Arc::new(pipeline),
        ExplorerLinks::new(&config.chain.explorer_url)?,
        &config.refresh,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher = Arc::new(BlockWatcher::new(
        contract.clone(),
        config.refresh.block_poll_interval(),
    ));
    let listener_handle = discovery
        .clone()
        .spawn_block_listener(watcher.subscribe(), shutdown_rx.clone());
    let watcher_handle = watcher.spawn(shutdown_rx);
    tracing::info!("Block watcher started");

    let mut server = EngineServer::new(EngineServerState {
        discovery,
        metrics_registry,
    });

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    server.start(listener)?;

    tracing::info!("Server started, waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutdown signal received");

    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Block watcher already stopped");
    }
    for (name, handle) in [("block watcher", watcher_handle), ("block listener", listener_handle)] {
        if let Err(e) = handle.await {
            tracing::error!("Failed to join {}: {}", name, e);
        }
    }

    if let Err(e) = server.shutdown().await {
        tracing::error!("Error during shutdown: {}", e);
    } else {
        tracing::info!("HTTP server shut down successfully");
    }

    Ok(())
}
