//! Lifecycle Transitions
//!
//! The two transitions this driver supports and the wire types of the
//! start/end calls. A request's condition label is resolved once, at entry,
//! into a [`TransitionCall`]; everything past that point is an exhaustive
//! match.

pub mod machine;

pub use machine::{DriverConfig, LifecycleDriver};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Start condition of the drain transition
pub const DRAIN_STARTED: &str = "drain-started";
/// End condition of the drain transition
pub const DRAIN_COMPLETE: &str = "drain-complete";
/// Start condition of the uncordon transition
pub const UNCORDONING: &str = "uncordoning";
/// End condition of the uncordon transition
pub const MAINTENANCE_COMPLETE: &str = "maintenance-complete";

// =============================================================================
// Transition Kinds
// =============================================================================

/// The transitions published by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Drain,
    Uncordon,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 2] = [TransitionKind::Drain, TransitionKind::Uncordon];

    pub fn start_condition(&self) -> &'static str {
        match self {
            TransitionKind::Drain => DRAIN_STARTED,
            TransitionKind::Uncordon => UNCORDONING,
        }
    }

    pub fn end_condition(&self) -> &'static str {
        match self {
            TransitionKind::Drain => DRAIN_COMPLETE,
            TransitionKind::Uncordon => MAINTENANCE_COMPLETE,
        }
    }

    /// Short name used in metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Drain => "drain",
            TransitionKind::Uncordon => "uncordon",
        }
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phase of a transition call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Start,
    End,
}

impl Phase {
    /// Short name used in metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::End => "end",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Start => write!(f, "StartLifecycleTransition"),
            Phase::End => write!(f, "EndLifecycleTransition"),
        }
    }
}

/// One of the four phase handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCall {
    DrainStart,
    DrainEnd,
    UncordonStart,
    UncordonEnd,
}

impl TransitionCall {
    /// Resolve a call from its phase and the condition label it carries
    pub fn resolve(phase: Phase, label: &str) -> Result<Self> {
        match (phase, label) {
            (Phase::Start, DRAIN_STARTED) => Ok(TransitionCall::DrainStart),
            (Phase::Start, UNCORDONING) => Ok(TransitionCall::UncordonStart),
            (Phase::End, DRAIN_COMPLETE) => Ok(TransitionCall::DrainEnd),
            (Phase::End, MAINTENANCE_COMPLETE) => Ok(TransitionCall::UncordonEnd),
            _ => Err(Error::UnsupportedTransition {
                phase,
                label: label.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> TransitionKind {
        match self {
            TransitionCall::DrainStart | TransitionCall::DrainEnd => TransitionKind::Drain,
            TransitionCall::UncordonStart | TransitionCall::UncordonEnd => TransitionKind::Uncordon,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            TransitionCall::DrainStart | TransitionCall::UncordonStart => Phase::Start,
            TransitionCall::DrainEnd | TransitionCall::UncordonEnd => Phase::End,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Body of a start call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartTransitionRequest {
    pub transition_name: String,
    pub event_name: String,
    pub node_name: String,
    /// Start condition of the transition being started
    pub start: String,
}

/// Body of an end call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndTransitionRequest {
    pub transition_name: String,
    pub event_name: String,
    pub node_name: String,
    /// End condition of the transition being polled
    pub end: String,
}

/// Answer to a start or end call.
///
/// An empty condition with an error means "retry the same phase". An error
/// here is never a transport failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub node_name: String,
    pub lifecycle_condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransitionResponse {
    /// Successful answer carrying `condition`
    pub fn condition(node_name: &str, condition: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            lifecycle_condition: condition.to_string(),
            error: None,
        }
    }

    /// Retryable failure; no condition is reported
    pub fn failed(node_name: &str, error: impl std::fmt::Display) -> Self {
        Self {
            node_name: node_name.to_string(),
            lifecycle_condition: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
