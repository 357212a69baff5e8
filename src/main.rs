//! Node Drain Driver
//!
//! Runs as a kubelet plugin on every node. Publishes the drain and
//! maintenance-complete transitions, registers with the kubelet and serves
//! the transition calls for the node it runs on.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use node_drain_driver::crd::{publish, render_yaml, transition_definitions};
use node_drain_driver::drain::grace_period_from_flag;
use node_drain_driver::{
    ClusterAccessRef, DriverConfig, DriverMetrics, DriverServer, DriverServerConfig, Error,
    EvictionConfig, KubeCluster, KubeClusterConfig, LifecycleDriver, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Node Drain Driver - drains a node through kubelet lifecycle transitions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to kubeconfig. Uses in-cluster config if empty.
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Name of the driver; used for socket and transition names
    #[arg(long, default_value = node_drain_driver::DEFAULT_DRIVER_NAME, global = true)]
    driver_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the driver as a kubelet plugin
    KubeletPlugin(KubeletPluginArgs),
    /// Print the published LifecycleTransitions as YAML and exit
    PrintTransitions(PrintTransitionsArgs),
}

#[derive(Args, Debug)]
struct KubeletPluginArgs {
    /// Name of the node this driver manages
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Kubelet plugin data directory
    #[arg(long, default_value = "/var/lib/kubelet/plugins")]
    datadir: PathBuf,

    /// Kubelet plugin registration directory
    #[arg(long, default_value = "/var/lib/kubelet/plugins_registry")]
    plugin_registration_path: PathBuf,

    /// Timeout for a single pod eviction, in seconds
    #[arg(long, default_value = "30")]
    eviction_timeout_secs: u64,

    /// Grace period for evicted pods in seconds; negative uses each pod's own
    #[arg(long, default_value = "-1", allow_negative_numbers = true)]
    grace_period: i64,

    /// Expected drain duration advertised on the transitions, in seconds
    #[arg(long, default_value = "300")]
    sla_secs: u64,

    /// Timeout for node and pod API requests, in seconds
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,

    /// Timeout for one start or end call, in seconds
    #[arg(long, default_value = "120")]
    call_timeout_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,
}

#[derive(Args, Debug)]
struct PrintTransitionsArgs {
    /// Expected drain duration advertised on the transitions, in seconds
    #[arg(long, default_value = "300")]
    sla_secs: u64,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::PrintTransitions(args) => {
            let definitions =
                transition_definitions(&cli.driver_name, Duration::from_secs(args.sla_secs));
            print!("{}", render_yaml(&definitions)?);
            Ok(())
        }
        Command::KubeletPlugin(args) => {
            init_logging(&cli);
            run_plugin(&cli, args).await
        }
    }
}

async fn run_plugin(cli: &Cli, args: &KubeletPluginArgs) -> Result<()> {
    info!("Starting Node Drain Driver");
    info!("  Version: {}", node_drain_driver::VERSION);
    info!("  Driver: {}", cli.driver_name);
    info!("  Node: {}", args.node_name);

    let driver_config = DriverConfig {
        call_timeout: Duration::from_secs(args.call_timeout_secs),
        ..DriverConfig::new(&args.node_name)
    };
    driver_config.validate()?;
    let grace_period_seconds = grace_period_from_flag(args.grace_period)?;
    let server_config = DriverServerConfig {
        driver_name: cli.driver_name.clone(),
        datadir: args.datadir.clone(),
        registration_dir: args.plugin_registration_path.clone(),
        health_addr: parse_addr("health", &args.health_addr)?,
        metrics_addr: parse_addr("metrics", &args.metrics_addr)?,
    };

    let client = kube_client(cli.kubeconfig.as_ref()).await?;

    let definitions = transition_definitions(&cli.driver_name, Duration::from_secs(args.sla_secs));
    publish(client.clone(), &definitions).await?;

    let metrics = Arc::new(DriverMetrics::new()?);
    let cluster: ClusterAccessRef = Arc::new(KubeCluster::new(
        client,
        KubeClusterConfig {
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            eviction_timeout: Duration::from_secs(args.eviction_timeout_secs),
        },
    ));
    let driver = LifecycleDriver::new(
        driver_config,
        cluster,
        EvictionConfig {
            grace_period_seconds,
            ..Default::default()
        },
        metrics.clone(),
    )?;

    let server = Arc::new(DriverServer::new(server_config, driver, metrics));
    let signal_server = server.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_server.shutdown();
    });

    server.run().await?;

    info!("Driver shutdown complete");
    Ok(())
}

fn parse_addr(name: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address {}: {}", name, addr, e)))
}

// =============================================================================
// Kubernetes Client
// =============================================================================

async fn kube_client(kubeconfig: Option<&PathBuf>) -> Result<kube::Client> {
    let config = match kubeconfig.filter(|path| !path.as_os_str().is_empty()) {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                Error::Configuration(format!("read kubeconfig {}: {}", path.display(), e))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default())
                .await
                .map_err(|e| Error::Configuration(format!("create out-of-cluster config: {}", e)))?
        }
        None => kube::Config::incluster()
            .map_err(|e| Error::Configuration(format!("create in-cluster config: {}", e)))?,
    };

    Ok(kube::Client::try_from(config)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,kube=info,tower=warn,tower_http=info,axum=info",
            level
        ))
    });

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Signals
// =============================================================================

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = terminate => info!(signal = "SIGTERM", "Received signal, shutting down"),
        _ = interrupt => info!(signal = "SIGINT", "Received signal, shutting down"),
    }
}
