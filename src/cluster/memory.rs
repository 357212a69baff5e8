//! In-Memory Cluster
//!
//! A [`ClusterAccess`] implementation that keeps nodes and pods in process.
//! It honours the same contract as the Kubernetes adapter (versioned node
//! writes, idempotent evictions) and lets callers inject failures, which is
//! what the state machine tests are built on.

use crate::domain::ports::{ClusterAccess, EvictOutcome, NodeRecord, PodRecord, PodRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, NodeRecord>,
    pods: BTreeMap<PodRef, PodRecord>,
    /// Pod key -> reason every eviction of that pod fails with
    eviction_failures: BTreeMap<String, String>,
    list_failure: Option<String>,
    update_failure: Option<String>,
    /// Added before every node read and write
    node_latency: Option<Duration>,
    /// Evictions never answer
    evictions_stalled: bool,
    node_writes: u64,
    evicted: Vec<PodRef>,
    /// Grace periods passed to evict, in call order
    grace_periods: Vec<Option<u32>>,
}

/// Cluster state held in memory
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
}

impl InMemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add or replace a node
    pub fn add_node(&self, name: &str, unschedulable: bool) {
        self.state.write().nodes.insert(
            name.to_string(),
            NodeRecord {
                name: name.to_string(),
                unschedulable,
                resource_version: Some("1".into()),
            },
        );
    }

    /// Add or replace a pod
    pub fn add_pod(&self, pod: PodRecord) {
        self.state.write().pods.insert(pod.pod_ref(), pod);
    }

    /// Flip a node's flag the way another actor would, bumping its version
    pub fn set_node_flag(&self, name: &str, unschedulable: bool) {
        if let Some(node) = self.state.write().nodes.get_mut(name) {
            node.unschedulable = unschedulable;
            node.resource_version = Some(next_version(node.resource_version.as_deref()));
        }
    }

    /// Make every eviction of `pod` fail with `reason`
    pub fn fail_evictions_for(&self, pod: &PodRef, reason: &str) {
        self.state
            .write()
            .eviction_failures
            .insert(pod.key(), reason.to_string());
    }

    /// Make pod listings fail until cleared with `None`
    pub fn fail_listing(&self, reason: Option<&str>) {
        self.state.write().list_failure = reason.map(str::to_string);
    }

    /// Make node writes fail until cleared with `None`
    pub fn fail_node_updates(&self, reason: Option<&str>) {
        self.state.write().update_failure = reason.map(str::to_string);
    }

    /// Delay every node read and write by `latency`
    pub fn set_node_latency(&self, latency: Duration) {
        self.state.write().node_latency = Some(latency);
    }

    /// Make evictions hang until the caller gives up on them
    pub fn stall_evictions(&self) {
        self.state.write().evictions_stalled = true;
    }

    pub fn node(&self, name: &str) -> Option<NodeRecord> {
        self.state.read().nodes.get(name).cloned()
    }

    /// Number of accepted node writes
    pub fn node_writes(&self) -> u64 {
        self.state.read().node_writes
    }

    /// Pods evicted so far, in eviction order
    pub fn evicted(&self) -> Vec<PodRef> {
        self.state.read().evicted.clone()
    }

    /// Grace periods passed to evict, in call order
    pub fn grace_periods(&self) -> Vec<Option<u32>> {
        self.state.read().grace_periods.clone()
    }

    async fn node_delay(&self) {
        let latency = self.state.read().node_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ClusterAccess for InMemoryCluster {
    async fn get_node(&self, name: &str) -> Result<NodeRecord> {
        self.node_delay().await;
        self.node(name).ok_or_else(|| Error::NodeNotFound {
            node: name.to_string(),
        })
    }

    async fn set_unschedulable(&self, observed: &NodeRecord, unschedulable: bool) -> Result<()> {
        self.node_delay().await;
        let mut state = self.state.write();
        if let Some(reason) = &state.update_failure {
            return Err(Error::Cluster(reason.clone()));
        }

        let node = state
            .nodes
            .get_mut(&observed.name)
            .ok_or_else(|| Error::NodeNotFound {
                node: observed.name.clone(),
            })?;

        if observed.resource_version.is_some() && node.resource_version != observed.resource_version {
            return Err(Error::Conflict {
                kind: "Node".into(),
                name: observed.name.clone(),
            });
        }

        node.unschedulable = unschedulable;
        node.resource_version = Some(next_version(node.resource_version.as_deref()));
        state.node_writes += 1;
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodRecord>> {
        let state = self.state.read();
        if let Some(reason) = &state.list_failure {
            return Err(Error::Cluster(reason.clone()));
        }

        Ok(state
            .pods
            .values()
            .filter(|pod| pod.node_name.as_deref() == Some(node_name))
            .cloned()
            .collect())
    }

    async fn evict(&self, pod: &PodRef, grace_period_seconds: Option<u32>) -> Result<EvictOutcome> {
        let stalled = self.state.read().evictions_stalled;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.write();
        state.grace_periods.push(grace_period_seconds);

        if let Some(reason) = state.eviction_failures.get(&pod.key()) {
            return Err(Error::Eviction {
                pod: pod.to_string(),
                reason: reason.clone(),
            });
        }

        // Evicted pods terminate immediately here.
        if state.pods.remove(pod).is_none() {
            debug!(pod = %pod, "Pod already gone");
            return Ok(EvictOutcome::AlreadyGone);
        }
        state.evicted.push(pod.clone());
        Ok(EvictOutcome::Evicted)
    }
}

fn next_version(current: Option<&str>) -> String {
    let n = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (n + 1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", false);

        let observed = cluster.get_node("w1").await.unwrap();
        cluster.set_node_flag("w1", true);

        let result = cluster.set_unschedulable(&observed, true).await;
        assert_matches!(result, Err(Error::Conflict { .. }));
        assert_eq!(cluster.node_writes(), 0);
    }

    #[tokio::test]
    async fn test_evict_missing_pod_is_success() {
        let cluster = InMemoryCluster::new();
        let outcome = cluster
            .evict(&PodRef::new("default", "ghost"), None)
            .await
            .unwrap();
        assert_eq!(outcome, EvictOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_node() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod(PodRecord::new("default", "a", "w1"));
        cluster.add_pod(PodRecord::new("default", "b", "w2"));

        let pods = cluster.list_pods_on_node("w1").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "a");
    }

    #[tokio::test]
    async fn test_missing_node() {
        let cluster = InMemoryCluster::new();
        assert_matches!(
            cluster.get_node("w9").await,
            Err(Error::NodeNotFound { node }) if node == "w9"
        );
    }
}
