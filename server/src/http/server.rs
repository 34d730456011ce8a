use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use sip_core::{chain::SipChain, contract::SipContract};
use sip_discovery::{DiscoveryService, history::RoutescanHistory, registry::RedisPlanKeyRegistry};
use tokio::{sync::watch, task::JoinHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::routes::{
    admin::metrics::get_metrics,
    api_doc,
    health::health,
    plans::{check_plan, list_plans, refresh_plans},
};

pub type EngineContract = SipContract<SipChain>;

pub type EngineDiscoveryService =
    DiscoveryService<EngineContract, EngineContract, RoutescanHistory, RedisPlanKeyRegistry>;

#[derive(Clone)]
pub struct EngineServerState {
    pub discovery: Arc<EngineDiscoveryService>,
    pub metrics_registry: Arc<prometheus::Registry>,
}

pub struct EngineServer {
    handle: Option<JoinHandle<Result<(), std::io::Error>>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    app: Router,
}

impl EngineServer {
    pub fn new(state: EngineServerState) -> Self {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false);

        let metrics_router = Router::new()
            .route("/metrics", get(get_metrics))
            .with_state(state.metrics_registry.clone());

        let router = Router::new()
            .route("/v1/owners/{owner}/plans", get(list_plans))
            .route("/v1/owners/{owner}/plans/{plan_key}", get(check_plan))
            .route("/v1/owners/{owner}/refresh", post(refresh_plans))
            .route("/health", get(health))
            .route("/api.json", get(api_doc))
            .with_state(state)
            .merge(metrics_router)
            .layer(cors)
            .layer(TraceLayer::new_for_http());

        Self {
            handle: None,
            shutdown_tx: None,
            app: router,
        }
    }

    pub fn start(&mut self, listener: tokio::net::TcpListener) -> Result<(), std::io::Error> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = self.app.clone();
        let address = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            tracing::info!("HTTP server starting on {}", address);

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let mut rx = shutdown_rx;
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                    tracing::info!("HTTP server shutting down");
                })
                .await
        });

        self.handle = Some(handle);
        self.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), std::io::Error> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(true).is_err() {
                tracing::error!("Failed to send shutdown signal to HTTP server");
            }
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(result) => {
                    if let Err(e) = result {
                        tracing::error!("HTTP server error during shutdown: {}", e);
                        return Err(e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to join HTTP server task: {}", e);
                    return Err(std::io::Error::other(format!("Task join error: {e}")));
                }
            }
        }

        Ok(())
    }
}
