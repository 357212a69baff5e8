//! Custom Resource Definitions
//!
//! - LifecycleTransition: a start/end condition pair offered by a driver

pub mod lifecycle_transition;

pub use lifecycle_transition::*;
