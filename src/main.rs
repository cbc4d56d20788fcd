//! vgmanager
//!
//! Node agent reconciling LVMVolumeGroup resources into host volume groups.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            vgmanager                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Kubernetes  │───▶│ VgReconciler │───▶│  Host tools  │       │
//! │  │   watcher    │    │              │    │ lvm / lsblk  │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             ▼                                    │
//! │                      /etc/topolvm/lvmd.yaml                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgmanager::adapters::{
    HostDmsetup, HostExecutor, HostLsblk, HostWipefs, KubeClusterStore, KubeEventSink,
};
use vgmanager::controller::{self, Ports, ReconcilerConfig, VgReconciler};
use vgmanager::devices::{SymlinkResolver, DEFAULT_MIN_DEVICE_SIZE};
use vgmanager::domain::CommandExecutor;
use vgmanager::error::{Error, Result};
use vgmanager::lvm::HostLvm;
use vgmanager::lvmd::{FileRegistry, DEFAULT_CONFIG_PATH, DEFAULT_SOCKET};
use vgmanager::metrics;

// =============================================================================
// CLI Arguments
// =============================================================================

/// vgmanager - Per-node LVM volume group manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the node this agent runs on
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Namespace of the LVMVolumeGroup resources
    #[arg(long, env = "NAMESPACE", default_value = "openshift-storage")]
    namespace: String,

    /// Path of the lvmd device-class config file
    #[arg(long, env = "LVMD_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    lvmd_config_path: String,

    /// lvmd socket written into a freshly created config
    #[arg(long, env = "LVMD_SOCKET", default_value = DEFAULT_SOCKET)]
    lvmd_socket: String,

    /// Smallest device considered for a volume group, in bytes
    #[arg(long, env = "MIN_DEVICE_SIZE", default_value_t = DEFAULT_MIN_DEVICE_SIZE)]
    min_device_size: u64,

    /// Run host commands in the host namespaces through nsenter
    #[arg(long, env = "EXECUTE_ON_HOST")]
    execute_on_host: bool,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting vgmanager");
    info!("  Node: {}", args.node_name);
    info!("  Namespace: {}", args.namespace);
    info!("  lvmd config: {}", args.lvmd_config_path);
    info!("  Minimum device size: {} bytes", args.min_device_size);
    info!("  Execute on host: {}", args.execute_on_host);

    let client = Client::try_default().await.map_err(|e| {
        error!("Failed to create Kubernetes client: {}", e);
        Error::Internal(format!("Kubernetes client creation failed: {}", e))
    })?;

    info!("Connected to Kubernetes cluster");

    let executor: Arc<dyn CommandExecutor> = Arc::new(HostExecutor::new(args.execute_on_host));
    let ports = Ports {
        lvm: Arc::new(HostLvm::new(executor.clone())),
        lsblk: Arc::new(HostLsblk::new(executor.clone())),
        wipefs: Arc::new(HostWipefs::new(executor.clone())),
        dmsetup: Arc::new(HostDmsetup::new(executor)),
        resolver: Arc::new(SymlinkResolver),
        registry: Arc::new(FileRegistry::new(&args.lvmd_config_path)),
        cluster: Arc::new(KubeClusterStore::new(client.clone())),
        events: Arc::new(KubeEventSink::new(client.clone(), &args.node_name)),
    };

    let config = ReconcilerConfig {
        node_name: args.node_name.clone(),
        namespace: args.namespace.clone(),
        lvmd_socket: args.lvmd_socket.clone(),
        min_device_size: args.min_device_size,
    };
    let reconciler = Arc::new(VgReconciler::new(config, ports));

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    controller::run(client, &args.namespace, reconciler).await?;

    info!("vgmanager shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
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
// HTTP Servers
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::body::Bytes>,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::{Request, Response, StatusCode};

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    serve("Health", addr, health_handler).await
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Request, Response, StatusCode};

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match metrics::encode() {
                Ok((content_type, buffer)) => {
                    let mut response = text_response(StatusCode::OK, buffer);
                    if let Ok(value) = HeaderValue::from_str(&content_type) {
                        response.headers_mut().insert(CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                }
            },
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    serve("Metrics", addr, metrics_handler).await
}

async fn serve<F, Fut>(name: &'static str, addr: &str, handler: F) -> Result<()>
where
    F: Fn(hyper::Request<hyper::body::Incoming>) -> Fut + Copy + Send + 'static,
    Fut: std::future::Future<
            Output = std::result::Result<
                hyper::Response<http_body_util::Full<hyper::body::Bytes>>,
                std::convert::Infallible,
            >,
        > + Send
        + 'static,
{
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid {} server address: {}", name, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", name, e)))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("{} server accept error: {}", name, e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                error!("{} server connection error: {}", name, e);
            }
        });
    }
}
