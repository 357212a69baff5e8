//! Plugin Registration
//!
//! The kubelet's plugin watcher finds the registration socket, asks for the
//! plugin info and reports back whether registration succeeded. A rejected
//! registration is fatal: the driver cannot serve transitions the kubelet
//! will never route to it.

use super::ApiErrorResponse;
use crate::error::Error;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Plugin type announced to the kubelet
pub const PLUGIN_TYPE: &str = "SLMPlugin";

/// Protocol versions this driver serves
pub const SUPPORTED_VERSIONS: &[&str] = &["v1alpha1.SLMPlugin"];

pub const INFO_PATH: &str = "/v1/info";
pub const STATUS_PATH: &str = "/v1/status";

/// Answer to the kubelet's info request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    /// Path of the driver socket
    pub endpoint: String,
    pub supported_versions: Vec<String>,
}

/// Registration outcome reported by the kubelet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationStatus {
    pub plugin_registered: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Pending,
    Registered,
    Failed(String),
}

/// Serves the registration socket and tracks the handshake outcome
#[derive(Clone)]
pub struct RegistrationService {
    info: Arc<PluginInfo>,
    state: Arc<watch::Sender<RegistrationState>>,
}

impl RegistrationService {
    pub fn new(driver_name: &str, endpoint: &Path) -> Self {
        let (state, _) = watch::channel(RegistrationState::Pending);
        Self {
            info: Arc::new(PluginInfo {
                plugin_type: PLUGIN_TYPE.to_string(),
                name: driver_name.to_string(),
                endpoint: endpoint.display().to_string(),
                supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            }),
            state: Arc::new(state),
        }
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> RegistrationState {
        self.state.borrow().clone()
    }

    pub fn is_registered(&self) -> bool {
        matches!(*self.state.borrow(), RegistrationState::Registered)
    }

    /// Apply the kubelet's status report
    pub fn report(&self, status: &RegistrationStatus) -> RegistrationState {
        let next = if status.plugin_registered {
            info!(driver = %self.info.name, "Plugin registered with kubelet");
            RegistrationState::Registered
        } else {
            error!(driver = %self.info.name, error = %status.error, "Plugin registration failed");
            RegistrationState::Failed(status.error.clone())
        };
        self.state.send_replace(next.clone());
        next
    }

    /// Resolves once the kubelet has rejected the registration
    pub async fn failure(&self) -> Error {
        let mut rx = self.state.subscribe();
        let error = match rx
            .wait_for(|state| matches!(state, RegistrationState::Failed(_)))
            .await
        {
            Ok(state) => match &*state {
                RegistrationState::Failed(reason) => Error::Registration(reason.clone()),
                _ => Error::Internal("unexpected registration state".into()),
            },
            Err(_) => Error::Internal("registration state closed".into()),
        };
        error
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route(INFO_PATH, get(plugin_info))
            .route(STATUS_PATH, post(registration_status))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }
}

async fn plugin_info(State(service): State<RegistrationService>) -> impl IntoResponse {
    Json(service.info().clone())
}

async fn registration_status(
    State(service): State<RegistrationService>,
    Json(status): Json<RegistrationStatus>,
) -> Response {
    match service.report(&status) {
        RegistrationState::Failed(reason) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiErrorResponse::new("registration_failed", reason)),
        )
            .into_response(),
        _ => StatusCode::OK.into_response(),
    }
}
