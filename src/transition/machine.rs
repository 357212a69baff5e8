//! Transition State Machine
//!
//! Four phase handlers behind a single dispatch. Start handlers mutate the
//! node and return right away; end handlers re-read live cluster state and
//! either confirm completion or hand back the start condition so the caller
//! polls again. Process memory is never the authority for completion, so
//! any end call is safe to repeat, including against a restarted driver.

use super::{
    EndTransitionRequest, Phase, StartTransitionRequest, TransitionCall, TransitionResponse,
    DRAIN_COMPLETE, DRAIN_STARTED, MAINTENANCE_COMPLETE, UNCORDONING,
};
use crate::domain::ports::ClusterAccessRef;
use crate::drain::{
    DrainProgress, EvictionConfig, EvictionCoordinator, NodeChange, NodeStateOps,
    ProgressSnapshot,
};
use crate::error::{Error, Result};
use crate::metrics::DriverMetrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on one transition call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Node this driver instance manages
    pub node_name: String,
    /// Bound on one start or end call, including every cluster call it makes
    pub call_timeout: Duration,
}

impl DriverConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(Error::Configuration("node name is required".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::Configuration("call timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Drives one node through drain and uncordon
pub struct LifecycleDriver {
    config: DriverConfig,
    nodes: NodeStateOps,
    evictions: Arc<EvictionCoordinator>,
    progress: Arc<DrainProgress>,
    metrics: Arc<DriverMetrics>,
}

impl LifecycleDriver {
    pub fn new(
        config: DriverConfig,
        cluster: ClusterAccessRef,
        eviction_config: EvictionConfig,
        metrics: Arc<DriverMetrics>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let progress = Arc::new(DrainProgress::new());
        let evictions = EvictionCoordinator::new(
            cluster.clone(),
            progress.clone(),
            metrics.clone(),
            eviction_config,
        );

        Ok(Arc::new(Self {
            config,
            nodes: NodeStateOps::new(cluster),
            evictions,
            progress,
            metrics,
        }))
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    /// Handle a start call
    pub async fn start_transition(
        &self,
        request: &StartTransitionRequest,
    ) -> Result<TransitionResponse> {
        let call = self.resolve(Phase::Start, &request.start)?;
        let node = self.target_node(&request.node_name);
        Ok(self.dispatch(call, &request.event_name, node).await)
    }

    /// Handle an end call
    pub async fn end_transition(&self, request: &EndTransitionRequest) -> Result<TransitionResponse> {
        let call = self.resolve(Phase::End, &request.end)?;
        let node = self.target_node(&request.node_name);
        Ok(self.dispatch(call, &request.event_name, node).await)
    }

    /// Run the handler for an already resolved call. A handler that outlives
    /// the call timeout is dropped and answered with a retryable error.
    pub async fn dispatch(&self, call: TransitionCall, event: &str, node: &str) -> TransitionResponse {
        let handler = async {
            match call {
                TransitionCall::DrainStart => self.drain_start(event, node).await,
                TransitionCall::DrainEnd => self.drain_end(event, node).await,
                TransitionCall::UncordonStart => self.uncordon_start(event, node).await,
                TransitionCall::UncordonEnd => self.uncordon_end(event, node).await,
            }
        };

        let timeout = self.config.call_timeout;
        let response = match tokio::time::timeout(timeout, handler).await {
            Ok(response) => response,
            Err(_) => {
                let err = Error::Timeout {
                    operation: format!("{} {}", call.kind(), call.phase().as_str()),
                    timeout,
                };
                warn!(event, node, error = %err, "Transition call timed out");
                TransitionResponse::failed(node, err)
            }
        };

        let outcome = if response.is_error() {
            "error"
        } else {
            response.lifecycle_condition.as_str()
        };
        self.metrics
            .record_transition(call.kind().as_str(), call.phase().as_str(), outcome);

        response
    }

    fn resolve(&self, phase: Phase, label: &str) -> Result<TransitionCall> {
        TransitionCall::resolve(phase, label).inspect_err(|e| {
            warn!(error = %e, "Rejected transition call");
        })
    }

    fn target_node<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.is_empty() {
            &self.config.node_name
        } else {
            requested
        }
    }

    // =========================================================================
    // Drain
    // =========================================================================

    async fn drain_start(&self, event: &str, node: &str) -> TransitionResponse {
        match self.nodes.cordon(node).await {
            Ok(NodeChange::Updated) => info!(event, node, "Node cordoned"),
            Ok(NodeChange::Unchanged) => info!(event, node, "Node already cordoned"),
            Err(e) => {
                warn!(event, node, error = %e, "Failed to cordon node");
                return TransitionResponse::failed(node, format!("cordon node: {}", e));
            }
        }

        self.progress
            .begin(event, |token| self.evictions.spawn_sweep(event, node, token));
        self.metrics.set_active_drain(true);

        TransitionResponse::condition(node, DRAIN_STARTED)
    }

    async fn drain_end(&self, event: &str, node: &str) -> TransitionResponse {
        let pods = match self.evictions.list_eligible(node).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(event, node, error = %e, "Failed to list pods");
                return TransitionResponse::failed(node, format!("list pods: {}", e));
            }
        };
        self.metrics.set_remaining_pods(pods.len());

        if pods.is_empty() {
            let eviction_failures = self.progress.failure_count();
            if self.progress.complete(event) {
                self.metrics.set_active_drain(false);
            }
            info!(event, node, eviction_failures, "All pods evicted, drain complete");
            return TransitionResponse::condition(node, DRAIN_COMPLETE);
        }

        info!(
            event,
            node,
            remaining = pods.len(),
            eviction_failures = self.progress.failure_count(),
            "Waiting for drain to complete"
        );
        TransitionResponse::condition(node, DRAIN_STARTED)
    }

    // =========================================================================
    // Uncordon
    // =========================================================================

    async fn uncordon_start(&self, event: &str, node: &str) -> TransitionResponse {
        match self.nodes.uncordon(node).await {
            Ok(change) => {
                info!(event, node, ?change, "Node uncordoned");
                TransitionResponse::condition(node, UNCORDONING)
            }
            Err(e) => {
                warn!(event, node, error = %e, "Failed to uncordon node");
                TransitionResponse::failed(node, format!("uncordon node: {}", e))
            }
        }
    }

    async fn uncordon_end(&self, event: &str, node: &str) -> TransitionResponse {
        let unschedulable = match self.nodes.is_unschedulable(node).await {
            Ok(flag) => flag,
            Err(e) => {
                warn!(event, node, error = %e, "Failed to read node");
                return TransitionResponse::failed(node, format!("get node: {}", e));
            }
        };

        if !unschedulable {
            info!(event, node, "Node is schedulable, maintenance complete");
            return TransitionResponse::condition(node, MAINTENANCE_COMPLETE);
        }

        info!(event, node, "Node still unschedulable, retrying uncordon");
        if let Err(e) = self.nodes.uncordon(node).await {
            warn!(event, node, error = %e, "Failed to uncordon node");
            return TransitionResponse::failed(node, format!("uncordon node: {}", e));
        }
        TransitionResponse::condition(node, UNCORDONING)
    }

    // =========================================================================
    // Supervision
    // =========================================================================

    /// Diagnostic view of the drain in flight
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    #[cfg(test)]
    pub(crate) async fn wait_for_sweep(&self) -> Option<crate::drain::SweepReport> {
        let handle = self.progress.take_sweep()?;
        handle.await.ok().flatten()
    }

    /// Stop background work before the process exits
    pub fn shutdown(&self) {
        debug!("Cancelling eviction sweep");
        self.progress.cancel_sweep();
    }
}
