//! Driver Server
//!
//! Binds the driver and registration sockets and runs them next to the
//! health and metrics servers until shutdown or a rejected registration.

use super::ops::{health_router, metrics_router, serve_tcp};
use super::registration::RegistrationService;
use super::rpc::DriverRouter;
use crate::error::{Error, Result};
use crate::metrics::DriverMetrics;
use crate::transition::LifecycleDriver;
use axum::Router;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// File name of the driver socket inside the driver's data directory
pub const DRIVER_SOCKET_NAME: &str = "slm.sock";

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the driver server
#[derive(Debug, Clone)]
pub struct DriverServerConfig {
    /// Driver name; names both sockets
    pub driver_name: String,
    /// Kubelet plugin data directory
    pub datadir: PathBuf,
    /// Kubelet plugin registration directory
    pub registration_dir: PathBuf,
    /// Health server bind address
    pub health_addr: SocketAddr,
    /// Metrics server bind address
    pub metrics_addr: SocketAddr,
}

impl Default for DriverServerConfig {
    fn default() -> Self {
        Self {
            driver_name: "drain.slm.k8s.io".to_string(),
            datadir: PathBuf::from("/var/lib/kubelet/plugins"),
            registration_dir: PathBuf::from("/var/lib/kubelet/plugins_registry"),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl DriverServerConfig {
    /// `<datadir>/<driver>/slm.sock`
    pub fn driver_socket(&self) -> PathBuf {
        self.datadir.join(&self.driver_name).join(DRIVER_SOCKET_NAME)
    }

    /// `<registration dir>/<driver>-reg.sock`
    pub fn registration_socket(&self) -> PathBuf {
        self.registration_dir
            .join(format!("{}-reg.sock", self.driver_name))
    }
}

// =============================================================================
// Driver Server
// =============================================================================

pub struct DriverServer {
    config: DriverServerConfig,
    driver: Arc<LifecycleDriver>,
    metrics: Arc<DriverMetrics>,
    registration: RegistrationService,
    shutdown_tx: broadcast::Sender<()>,
}

impl DriverServer {
    pub fn new(
        config: DriverServerConfig,
        driver: Arc<LifecycleDriver>,
        metrics: Arc<DriverMetrics>,
    ) -> Self {
        let registration = RegistrationService::new(&config.driver_name, &config.driver_socket());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            driver,
            metrics,
            registration,
            shutdown_tx,
        }
    }

    pub fn registration(&self) -> &RegistrationService {
        &self.registration
    }

    /// Serve until shutdown is triggered, a server fails, or the kubelet
    /// rejects the registration
    pub async fn run(&self) -> Result<()> {
        let driver_socket = self.config.driver_socket();
        let registration_socket = self.config.registration_socket();

        let driver_listener = listen_unix(&driver_socket)?;
        let registration_listener = listen_unix(&registration_socket)?;

        info!(
            driver = %self.config.driver_name,
            node = self.driver.node_name(),
            socket = %driver_socket.display(),
            registration = %registration_socket.display(),
            "Starting drain driver server"
        );

        let driver_app = DriverRouter::new(self.driver.clone()).build();
        let driver_task = tokio::spawn(serve_unix(
            driver_listener,
            driver_app,
            "driver",
            self.shutdown_tx.subscribe(),
        ));
        let registration_task = tokio::spawn(serve_unix(
            registration_listener,
            self.registration.router(),
            "registration",
            self.shutdown_tx.subscribe(),
        ));
        let health_task = tokio::spawn(serve_tcp(
            self.config.health_addr,
            health_router(self.registration.clone()),
            "health",
            self.shutdown_tx.subscribe(),
        ));
        let metrics_task = tokio::spawn(serve_tcp(
            self.config.metrics_addr,
            metrics_router(self.metrics.clone()),
            "metrics",
            self.shutdown_tx.subscribe(),
        ));

        let outcome = tokio::select! {
            err = self.registration.failure() => Err(err),
            result = driver_task => joined("driver", result),
            result = registration_task => joined("registration", result),
            result = health_task => joined("health", result),
            result = metrics_task => joined("metrics", result),
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Driver server stopped");
        }

        self.shutdown();
        self.driver.shutdown();
        remove_socket(&driver_socket);
        remove_socket(&registration_socket);

        outcome
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Bind a Unix socket, creating its directory and removing a stale socket
/// left behind by a previous run
pub fn listen_unix(path: &Path) -> Result<UnixListener> {
    let socket_error = |source: std::io::Error| Error::Socket {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(socket_error)?;
    }

    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(socket_error(e)),
    }

    UnixListener::bind(path).map_err(socket_error)
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove socket");
        }
    }
}

async fn serve_unix(
    listener: UnixListener,
    app: Router,
    name: &'static str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!(server = name, "Server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("{} server error: {}", name, e)))
}

fn joined(name: &str, result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.map_err(|e| Error::Internal(format!("{} server task failed: {}", name, e)))?
}
