//! Kubernetes Cluster Adapter
//!
//! Implements [`ClusterAccess`] on top of a kube-rs client. Every call is
//! bounded by a timeout so a wedged API server cannot stall a handler.

use crate::domain::ports::{
    ClusterAccess, EvictOutcome, NodeRecord, PodPhase, PodRecord, PodRef, MIRROR_POD_ANNOTATION,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Kubernetes adapter
#[derive(Debug, Clone)]
pub struct KubeClusterConfig {
    /// Upper bound for node reads/writes and pod listings
    pub request_timeout: Duration,
    /// Upper bound for a single eviction call
    pub eviction_timeout: Duration,
}

impl Default for KubeClusterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            eviction_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Kubernetes Adapter
// =============================================================================

/// Adapter for the Kubernetes API
pub struct KubeCluster {
    client: Client,
    config: KubeClusterConfig,
}

impl KubeCluster {
    /// Create a new adapter
    pub fn new(client: Client, config: KubeClusterConfig) -> Self {
        Self { client, config }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn all_pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterAccess for KubeCluster {
    async fn get_node(&self, name: &str) -> Result<NodeRecord> {
        let timeout = self.config.request_timeout;
        match bounded("get node", timeout, self.nodes().get(name)).await? {
            Ok(node) => Ok(node_record(&node)),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::NodeNotFound {
                node: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_unschedulable(&self, observed: &NodeRecord, unschedulable: bool) -> Result<()> {
        let timeout = self.config.request_timeout;
        let patch = unschedulable_patch(observed, unschedulable);
        let nodes = self.nodes();
        let params = PatchParams::default();
        let merge = Patch::Merge(&patch);
        let request = nodes.patch(&observed.name, &params, &merge);

        match bounded("update node", timeout, request).await? {
            Ok(_) => {
                debug!(node = %observed.name, unschedulable, "Node updated");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Err(Error::Conflict {
                kind: "Node".into(),
                name: observed.name.clone(),
            }),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::NodeNotFound {
                node: observed.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodRecord>> {
        let timeout = self.config.request_timeout;
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let pods = self.all_pods();
        let list = bounded("list pods", timeout, pods.list(&params)).await??;

        Ok(list.items.iter().map(pod_record).collect())
    }

    async fn evict(&self, pod: &PodRef, grace_period_seconds: Option<u32>) -> Result<EvictOutcome> {
        let timeout = self.config.eviction_timeout;
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds,
                ..Default::default()
            }),
            ..Default::default()
        };
        let pods = self.pods(&pod.namespace);

        match bounded("evict pod", timeout, pods.evict(&pod.name, &params)).await? {
            Ok(_) => Ok(EvictOutcome::Evicted),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(EvictOutcome::AlreadyGone),
            Err(kube::Error::Api(e)) if e.code == 429 => Err(Error::Eviction {
                pod: pod.to_string(),
                reason: format!("blocked by disruption budget: {}", e.message),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Run `fut`, failing with `Error::Timeout` once `timeout` elapses
async fn bounded<F: Future>(operation: &str, timeout: Duration, fut: F) -> Result<F::Output> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout {
            operation: operation.to_string(),
            timeout,
        })
}

/// Merge patch that flips spec.unschedulable. Carrying the observed
/// resourceVersion makes the API server reject stale writes with 409.
fn unschedulable_patch(observed: &NodeRecord, unschedulable: bool) -> serde_json::Value {
    let mut patch = serde_json::json!({
        "spec": { "unschedulable": unschedulable }
    });
    if let Some(version) = &observed.resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": version });
    }
    patch
}

fn node_record(node: &Node) -> NodeRecord {
    NodeRecord {
        name: node.name_any(),
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false),
        resource_version: node.resource_version(),
    }
}

fn pod_record(pod: &Pod) -> PodRecord {
    let meta = &pod.metadata;

    PodRecord {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
        owner_kinds: meta
            .owner_references
            .iter()
            .flatten()
            .map(|owner| owner.kind.clone())
            .collect(),
        deletion_timestamp: meta.deletion_timestamp.as_ref().map(|t| t.0),
        phase: PodPhase::from(
            pod.status
                .as_ref()
                .and_then(|status| status.phase.as_deref()),
        ),
        mirror: meta
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(MIRROR_POD_ANNOTATION)),
    }
}
