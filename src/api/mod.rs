//! Driver API
//!
//! HTTP/JSON served on node-local sockets:
//! - `rpc`: the start/end transition calls issued by the kubelet
//! - `registration`: the plugin registration handshake
//! - `ops`: health and metrics over TCP
//! - `server`: socket setup and the serving loop

pub mod ops;
pub mod registration;
pub mod rpc;
pub mod server;

pub use registration::{PluginInfo, RegistrationService, RegistrationState, RegistrationStatus};
pub use rpc::DriverRouter;
pub use server::{listen_unix, DriverServer, DriverServerConfig};

use serde::{Deserialize, Serialize};

/// Error body returned for failed calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
