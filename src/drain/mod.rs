//! Drain building blocks
//!
//! Pod eligibility, cordon/uncordon, the eviction sweep and the shared
//! progress state. The transition state machine composes these.

pub mod eviction;
pub mod filter;
pub mod node_ops;
pub mod progress;

pub use eviction::{grace_period_from_flag, EvictionConfig, EvictionCoordinator, SWEEP_DEADLINE};
pub use filter::{is_evictable, skip_reason, SkipReason};
pub use node_ops::{NodeChange, NodeStateOps};
pub use progress::{DrainProgress, ProgressSnapshot, SweepJoinHandle, SweepReport};
