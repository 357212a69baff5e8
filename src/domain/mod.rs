//! Domain layer - Core types and port definitions
//!
//! This module defines the cluster access trait (port) that adapters
//! implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
