//! Error types for the Node Drain Driver
//!
//! Every failure falls into one of three classes: protocol errors (a request
//! names a transition this driver never published), retryable operational
//! errors (cluster calls that failed and will be re-attempted on the next
//! poll), and fatal startup errors.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::transition::Phase;

/// Unified error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("driver does not support transition {label:?} in {phase}")]
    UnsupportedTransition { phase: Phase, label: String },

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Node not found: {node}")]
    NodeNotFound { node: String },

    #[error("Write conflict on {kind}/{name}: object was modified since it was read")]
    Conflict { kind: String, name: String },

    #[error("Eviction of pod {pod} failed: {reason}")]
    Eviction { pod: String, reason: String },

    #[error("Cluster API error: {0}")]
    Cluster(String),

    #[error("Timed out after {timeout:?} during {operation}")]
    Timeout { operation: String, timeout: Duration },

    // =========================================================================
    // Startup Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Plugin registration failed: {0}")]
    Registration(String),

    #[error("Socket error at {}: {source}", path.display())]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a caller should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Mismatch between published transitions and request routing.
    /// Retrying the same call cannot succeed.
    Protocol,
    /// Operational failure; the caller re-issues the same phase.
    Retryable,
    /// Aborts process startup.
    Fatal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::UnsupportedTransition { .. } => ErrorClass::Protocol,

            Error::Kube(_)
            | Error::NodeNotFound { .. }
            | Error::Conflict { .. }
            | Error::Eviction { .. }
            | Error::Cluster(_)
            | Error::Timeout { .. } => ErrorClass::Retryable,

            Error::Configuration(_)
            | Error::Registration(_)
            | Error::Socket { .. }
            | Error::Metrics(_)
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::Io(_)
            | Error::Internal(_) => ErrorClass::Fatal,
        }
    }
}

/// Result type alias for the driver
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = Error::UnsupportedTransition {
            phase: Phase::Start,
            label: "reboot-started".into(),
        };
        assert_eq!(err.class(), ErrorClass::Protocol);

        let err = Error::Conflict {
            kind: "Node".into(),
            name: "w1".into(),
        };
        assert_eq!(err.class(), ErrorClass::Retryable);

        let err = Error::Configuration("--node-name is required".into());
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = Error::Timeout {
            operation: "uncordon end".into(),
            timeout: Duration::from_secs(120),
        };
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert_eq!(err.to_string(), "Timed out after 120s during uncordon end");
    }

    #[test]
    fn test_unsupported_transition_message() {
        let err = Error::UnsupportedTransition {
            phase: Phase::End,
            label: "reboot-complete".into(),
        };
        assert_eq!(
            err.to_string(),
            "driver does not support transition \"reboot-complete\" in EndLifecycleTransition"
        );
    }
}
