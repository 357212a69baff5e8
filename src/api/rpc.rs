//! Transition RPC Handlers
//!
//! `StartLifecycleTransition` and `EndLifecycleTransition` as JSON
//! endpoints. A response with an `error` field is still a 200: it tells
//! the kubelet to retry the phase. Only protocol errors become HTTP errors.
//! Calls are bounded inside the driver, so a slow cluster still produces a
//! payload error rather than a transport failure.

use super::ApiErrorResponse;
use crate::error::{Error, ErrorClass, Result};
use crate::transition::{
    EndTransitionRequest, LifecycleDriver, StartTransitionRequest, TransitionResponse,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

pub const START_PATH: &str = "/v1alpha1/start-lifecycle-transition";
pub const END_PATH: &str = "/v1alpha1/end-lifecycle-transition";
pub const PROGRESS_PATH: &str = "/v1alpha1/drain-progress";

// =============================================================================
// Driver Router
// =============================================================================

/// Router for the driver socket
pub struct DriverRouter {
    driver: Arc<LifecycleDriver>,
}

impl DriverRouter {
    pub fn new(driver: Arc<LifecycleDriver>) -> Self {
        Self { driver }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = RpcState {
            driver: self.driver,
        };

        Router::new()
            .route(START_PATH, post(start_transition))
            .route(END_PATH, post(end_transition))
            .route(PROGRESS_PATH, get(drain_progress))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

#[derive(Clone)]
struct RpcState {
    driver: Arc<LifecycleDriver>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn start_transition(
    State(state): State<RpcState>,
    Json(request): Json<StartTransitionRequest>,
) -> Response {
    debug!(
        transition = %request.transition_name,
        event = %request.event_name,
        start = %request.start,
        "StartLifecycleTransition"
    );
    respond(state.driver.start_transition(&request).await)
}

async fn end_transition(
    State(state): State<RpcState>,
    Json(request): Json<EndTransitionRequest>,
) -> Response {
    debug!(
        transition = %request.transition_name,
        event = %request.event_name,
        end = %request.end,
        "EndLifecycleTransition"
    );
    respond(state.driver.end_transition(&request).await)
}

async fn drain_progress(State(state): State<RpcState>) -> impl IntoResponse {
    Json(state.driver.progress())
}

fn respond(result: Result<TransitionResponse>) -> Response {
    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &Error) -> Response {
    match err.class() {
        ErrorClass::Protocol => (
            StatusCode::BAD_REQUEST,
            Json(ApiErrorResponse::new("unsupported_transition", err.to_string())),
        )
            .into_response(),
        ErrorClass::Retryable | ErrorClass::Fatal => {
            error!(error = %err, "Transition call failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiErrorResponse::new("internal", err.to_string())),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::domain::ports::PodRecord;
    use crate::drain::{EvictionConfig, ProgressSnapshot};
    use crate::metrics::DriverMetrics;
    use crate::transition::DriverConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde::de::DeserializeOwned;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(cluster: Arc<InMemoryCluster>) -> Router {
        router_with(cluster, DriverConfig::new("w1"))
    }

    fn router_with(cluster: Arc<InMemoryCluster>, config: DriverConfig) -> Router {
        let driver = LifecycleDriver::new(
            config,
            cluster,
            EvictionConfig::default(),
            Arc::new(DriverMetrics::new().unwrap()),
        )
        .unwrap();
        DriverRouter::new(driver).build()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_start_and_end_over_http() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", false);
        let app = router(cluster.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                START_PATH,
                serde_json::json!({
                    "transitionName": "drain.slm.k8s.io-drain",
                    "eventName": "ev-1",
                    "nodeName": "w1",
                    "start": "drain-started"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: TransitionResponse = read_json(response).await;
        assert_eq!(body, TransitionResponse::condition("w1", "drain-started"));
        assert!(cluster.node("w1").unwrap().unschedulable);

        let response = app
            .oneshot(post_json(
                END_PATH,
                serde_json::json!({
                    "transitionName": "drain.slm.k8s.io-drain",
                    "eventName": "ev-1",
                    "nodeName": "w1",
                    "end": "drain-complete"
                }),
            ))
            .await
            .unwrap();
        let body: TransitionResponse = read_json(response).await;
        assert_eq!(body.lifecycle_condition, "drain-complete");
    }

    #[tokio::test]
    async fn test_retryable_failure_is_a_payload() {
        let cluster = InMemoryCluster::new();
        let app = router(cluster);

        let response = app
            .oneshot(post_json(
                START_PATH,
                serde_json::json!({"eventName": "ev-1", "nodeName": "w1", "start": "uncordoning"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = read_json(response).await;
        assert_eq!(body["lifecycleCondition"], "");
        assert!(body["error"].as_str().unwrap().starts_with("uncordon node: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cluster_is_a_payload_error() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", true);
        cluster.set_node_latency(Duration::from_secs(20));
        let config = DriverConfig {
            call_timeout: Duration::from_secs(30),
            ..DriverConfig::new("w1")
        };
        let app = router_with(cluster, config);

        let response = app
            .oneshot(post_json(
                END_PATH,
                serde_json::json!({"eventName": "ev-2", "nodeName": "w1", "end": "maintenance-complete"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: TransitionResponse = read_json(response).await;
        assert_eq!(body.node_name, "w1");
        assert!(body.lifecycle_condition.is_empty());
        assert!(body.error.unwrap().starts_with("Timed out after 30s"));
    }

    #[tokio::test]
    async fn test_unknown_label_is_bad_request() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", false);
        let app = router(cluster);

        let response = app
            .oneshot(post_json(
                END_PATH,
                serde_json::json!({"eventName": "ev-1", "nodeName": "w1", "end": "reboot-complete"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: ApiErrorResponse = read_json(response).await;
        assert_eq!(body.error, "unsupported_transition");
        assert!(body.message.contains("EndLifecycleTransition"));
    }

    #[tokio::test]
    async fn test_progress_endpoint() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", true);
        cluster.add_pod(PodRecord::new("default", "web-0", "w1"));
        let app = router(cluster);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(PROGRESS_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: ProgressSnapshot = read_json(response).await;
        assert_eq!(body.active_event, None);
        assert!(body.eviction_errors.is_empty());
    }
}
