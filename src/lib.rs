//! Node Drain Driver
//!
//! A kubelet lifecycle driver that drains a node before maintenance and
//! returns it to service afterwards. The kubelet drives two published
//! transitions through start/end calls on a node-local socket:
//!
//! ```text
//!   drain:     drain-started  ──▶ drain-complete
//!   uncordon:  uncordoning    ──▶ maintenance-complete
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  kubelet ── slm.sock (rpc) ──┐      plugins_registry/*-reg.sock      │
//! │                              ▼                                       │
//! │                  ┌───────────────────────┐                           │
//! │                  │   LifecycleDriver     │  four phase handlers      │
//! │                  └──────┬──────────┬─────┘                           │
//! │                         │          │                                 │
//! │            ┌────────────┴──┐   ┌───┴──────────────────┐              │
//! │            │ NodeStateOps  │   │ EvictionCoordinator  │ background   │
//! │            │ cordon/uncord │   │ sweep + DrainProgress│ sweep        │
//! │            └────────────┬──┘   └───┬──────────────────┘              │
//! │                         └────┬─────┘                                 │
//! │                     ┌────────┴────────┐                              │
//! │                     │  ClusterAccess  │  kube-rs / in-memory         │
//! │                     └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`transition`]: transition kinds, wire types and the state machine
//! - [`drain`]: pod filter, cordon/uncordon, eviction sweep, progress state
//! - [`cluster`]: `ClusterAccess` adapters
//! - [`api`]: driver, registration, health and metrics endpoints
//! - [`crd`]: the `LifecycleTransition` resource
//! - [`domain`]: core domain types and the cluster port
//! - [`error`]: error types and handling

pub mod api;
pub mod cluster;
pub mod crd;
pub mod domain;
pub mod drain;
pub mod error;
pub mod metrics;
pub mod transition;

pub use api::{DriverServer, DriverServerConfig, RegistrationService};
pub use cluster::{InMemoryCluster, KubeCluster, KubeClusterConfig};
pub use crd::{LifecycleTransition, LifecycleTransitionSpec};
pub use domain::ports::{ClusterAccess, ClusterAccessRef, NodeRecord, PodRecord, PodRef};
pub use drain::{EvictionConfig, EvictionCoordinator, NodeStateOps, SweepReport};
pub use error::{Error, ErrorClass, Result};
pub use metrics::DriverMetrics;
pub use transition::{
    DriverConfig, LifecycleDriver, Phase, TransitionCall, TransitionKind, TransitionResponse,
};

/// Driver version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default driver name, used for socket and transition names
pub const DEFAULT_DRIVER_NAME: &str = "drain.slm.k8s.io";
