//! Health and metrics endpoints

use super::registration::RegistrationService;
use crate::error::{Error, Result};
use crate::metrics::DriverMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// `/healthz` and `/livez` always answer; `/readyz` waits for registration
pub fn health_router(registration: RegistrationService) -> Router {
    Router::new()
        .route("/healthz", get(alive))
        .route("/livez", get(alive))
        .route("/readyz", get(ready))
        .with_state(registration)
}

pub fn metrics_router(metrics: Arc<DriverMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn alive() -> &'static str {
    "ok"
}

async fn ready(State(registration): State<RegistrationService>) -> Response {
    if registration.is_registered() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not registered").into_response()
    }
}

async fn render_metrics(State(metrics): State<Arc<DriverMetrics>>) -> Response {
    match metrics.encode() {
        Ok((content_type, body)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve `app` on a TCP address until shutdown is signalled
pub async fn serve_tcp(
    addr: SocketAddr,
    app: Router,
    name: &'static str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server on {}: {}", name, addr, e)))?;

    info!(server = name, addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!(server = name, "Server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("{} server error: {}", name, e)))
}
