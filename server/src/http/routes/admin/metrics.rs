use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder};

/// Prometheus metrics endpoint
///
/// Discovery run, lookup and log window metrics in Prometheus text format
pub async fn get_metrics(
    State(registry): State<Arc<prometheus::Registry>>,
) -> Result<Response, MetricsError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;

    let body = String::from_utf8(buffer).map_err(|e| MetricsError::Utf8Error(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to encode metrics: {0}")]
    EncodingFailed(String),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(String),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Metrics export failed");

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Metrics export failed: {self}"),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_discovery::metrics::DiscoveryMetrics;

    #[tokio::test]
    async fn exports_registered_discovery_metrics() {
        let registry = prometheus::Registry::new();
        let metrics = DiscoveryMetrics::new(&registry).expect("Should register metrics");
        metrics.failed_windows.inc();

        let response = get_metrics(State(Arc::new(registry)))
            .await
            .expect("Should export");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
