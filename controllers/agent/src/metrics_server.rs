//! Metrics and probe endpoints.
//!
//! - GET /metrics: Prometheus text exposition of the shared registry
//! - GET /healthz, GET /readyz: liveness and readiness probes

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the router serving `registry`
pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

/// Serve the endpoints on `addr` until the listener fails
pub async fn serve(addr: SocketAddr, registry: Registry) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("failed to bind metrics server on {}: {}", addr, e)))?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, metrics_router(registry))
        .await
        .map_err(|e| ControllerError::Watch(format!("metrics server error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use cluster_lifecycle::{MetricsApi, PrometheusMetrics};
    use tower::ServiceExt;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_probes_return_ok() {
        let registry = Registry::new();
        for uri in ["/healthz", "/readyz"] {
            let (status, body) = get_body(metrics_router(registry.clone()), uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "ok");
        }
    }

    #[tokio::test]
    async fn test_metrics_exposes_lifecycle_metrics() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();
        metrics
            .cluster_validation_failed(uuid::Uuid::new_v4(), "api-vips-defined")
            .unwrap();

        let (status, body) = get_body(metrics_router(registry), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("cluster_validation_failed_total"));
        assert!(body.contains("validation=\"api-vips-defined\""));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _) = get_body(metrics_router(Registry::new()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
