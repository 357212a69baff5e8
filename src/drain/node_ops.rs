//! Node State Operations
//!
//! Cordon and uncordon as single read-modify-write cycles. A write is only
//! issued when the flag actually has to change; conflicts are returned to
//! the caller, which retries on its next poll.

use crate::domain::ports::ClusterAccessRef;
use crate::error::Result;
use tracing::debug;

/// What a cordon/uncordon call did to the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChange {
    /// The flag already had the desired value; nothing was written
    Unchanged,
    /// The flag was written
    Updated,
}

/// Cordon/uncordon primitives over the cluster port
#[derive(Clone)]
pub struct NodeStateOps {
    cluster: ClusterAccessRef,
}

impl NodeStateOps {
    pub fn new(cluster: ClusterAccessRef) -> Self {
        Self { cluster }
    }

    /// Mark the node unschedulable
    pub async fn cordon(&self, node_name: &str) -> Result<NodeChange> {
        self.set_unschedulable(node_name, true).await
    }

    /// Mark the node schedulable
    pub async fn uncordon(&self, node_name: &str) -> Result<NodeChange> {
        self.set_unschedulable(node_name, false).await
    }

    /// Read the node's current unschedulable flag
    pub async fn is_unschedulable(&self, node_name: &str) -> Result<bool> {
        Ok(self.cluster.get_node(node_name).await?.unschedulable)
    }

    async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<NodeChange> {
        let node = self.cluster.get_node(node_name).await?;
        if node.unschedulable == unschedulable {
            debug!(node = node_name, unschedulable, "Node already in desired state");
            return Ok(NodeChange::Unchanged);
        }

        self.cluster.set_unschedulable(&node, unschedulable).await?;
        Ok(NodeChange::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::error::Error;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_cordon_is_idempotent() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", false);
        let ops = NodeStateOps::new(cluster.clone());

        assert_eq!(ops.cordon("w1").await.unwrap(), NodeChange::Updated);
        assert_eq!(ops.cordon("w1").await.unwrap(), NodeChange::Unchanged);

        assert!(cluster.node("w1").unwrap().unschedulable);
        assert_eq!(cluster.node_writes(), 1);
    }

    #[tokio::test]
    async fn test_uncordon_is_idempotent() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", true);
        let ops = NodeStateOps::new(cluster.clone());

        assert_eq!(ops.uncordon("w1").await.unwrap(), NodeChange::Updated);
        assert_eq!(ops.uncordon("w1").await.unwrap(), NodeChange::Unchanged);

        assert!(!cluster.node("w1").unwrap().unschedulable);
        assert_eq!(cluster.node_writes(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let cluster = InMemoryCluster::new();
        cluster.add_node("w1", false);
        cluster.fail_node_updates(Some("etcdserver: request timed out"));
        let ops = NodeStateOps::new(cluster.clone());

        assert_matches!(ops.cordon("w1").await, Err(Error::Cluster(_)));
        assert!(!cluster.node("w1").unwrap().unschedulable);
    }

    #[tokio::test]
    async fn test_missing_node_surfaces() {
        let cluster = InMemoryCluster::new();
        let ops = NodeStateOps::new(cluster);

        assert_matches!(ops.uncordon("w1").await, Err(Error::NodeNotFound { .. }));
    }
}
