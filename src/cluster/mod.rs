//! Cluster Adapters
//!
//! Implementations of the [`ClusterAccess`](crate::domain::ClusterAccess) port.

pub mod k8s;
pub mod memory;

pub use k8s::{KubeCluster, KubeClusterConfig};
pub use memory::InMemoryCluster;
