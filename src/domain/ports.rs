//! Domain Ports - Cluster access seam for the drain driver
//!
//! The state machine never talks to the Kubernetes API directly. It goes
//! through [`ClusterAccess`], which exposes exactly the four operations a
//! drain needs. Adapters implement this trait to provide concrete
//! functionality.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Annotation the kubelet sets on mirror pods of static manifests
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Owner kind whose pods are never evicted
pub const DAEMON_SET_KIND: &str = "DaemonSet";

// =============================================================================
// Node Types
// =============================================================================

/// The slice of a Node this driver cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node name
    pub name: String,
    /// spec.unschedulable
    pub unschedulable: bool,
    /// Version observed on read; writes are rejected if it went stale
    pub resource_version: Option<String>,
}

// =============================================================================
// Pod Types
// =============================================================================

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Whether the pod has finished and will not run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl From<Option<&str>> for PodPhase {
    fn from(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Namespace and name of a pod
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key used in the progress error map
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Observed state of a pod, as far as eviction eligibility is concerned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    /// Node the pod is bound to
    pub node_name: Option<String>,
    /// Kinds of all owner references
    pub owner_kinds: Vec<String>,
    /// Set once the pod is terminating
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub phase: PodPhase,
    /// Carries the mirror pod annotation
    pub mirror: bool,
}

impl PodRecord {
    /// A running, unowned pod bound to `node`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            node_name: Some(node.into()),
            owner_kinds: Vec::new(),
            deletion_timestamp: None,
            phase: PodPhase::Running,
            mirror: false,
        }
    }

    pub fn with_owner(mut self, kind: impl Into<String>) -> Self {
        self.owner_kinds.push(kind.into());
        self
    }

    pub fn with_phase(mut self, phase: PodPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn mirrored(mut self) -> Self {
        self.mirror = true;
        self
    }

    pub fn terminating(mut self, at: DateTime<Utc>) -> Self {
        self.deletion_timestamp = Some(at);
        self
    }

    pub fn pod_ref(&self) -> PodRef {
        PodRef::new(self.namespace.clone(), self.name.clone())
    }

    pub fn is_owned_by(&self, kind: &str) -> bool {
        self.owner_kinds.iter().any(|k| k == kind)
    }
}

/// Result of a successful eviction call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    /// Eviction accepted by the API server
    Evicted,
    /// The pod no longer existed
    AlreadyGone,
}

// =============================================================================
// Cluster Access Port
// =============================================================================

/// Port for the cluster operations a drain needs
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Read a node. Missing nodes are `Error::NodeNotFound`.
    async fn get_node(&self, name: &str) -> Result<NodeRecord>;

    /// Write spec.unschedulable, conditioned on the version in `observed`
    async fn set_unschedulable(&self, observed: &NodeRecord, unschedulable: bool) -> Result<()>;

    /// List every pod bound to a node
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<PodRecord>>;

    /// Request eviction of a pod. `None` keeps the pod's own grace period.
    async fn evict(&self, pod: &PodRef, grace_period_seconds: Option<u32>) -> Result<EvictOutcome>;
}

pub type ClusterAccessRef = Arc<dyn ClusterAccess>;
