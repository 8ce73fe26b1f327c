//! HTTP interface for ingestion
//!
//! One route, `POST /write`, accepting Prometheus Remote Write bodies. Every
//! other path or method answers 404.

pub mod ingest;
mod telemetry;

use crate::ingester::Ingester;
use crate::Error;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Maximum request body size
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            max_body_size: 32 * 1024 * 1024, // 32MB
        }
    }
}

/// Build the HTTP API router
pub fn build_http_router(ingester: Arc<Ingester>, config: &ApiServerConfig) -> Router {
    use axum::middleware;
    use axum::routing::post;

    Router::new()
        .route(
            "/write",
            post(ingest::prometheus::handle_remote_write).fallback(not_found),
        )
        .fallback(not_found)
        .with_state(ApiState { ingester })
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(middleware::from_fn(telemetry::http_observability_middleware))
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub ingester: Arc<Ingester>,
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.to_string()).into_response()
    }
}
