//! LVM Capacity Guard
//!
//! Two subcommands:
//! - `webhook`: validating admission webhook that denies volume growth the
//!   target nodes cannot hold
//! - `node-agent`: per-node agent publishing volume group capacity and
//!   growing logical volumes that lag behind their claims

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lvm_capacity_guard::{
    units, ApiServer, ApiServerConfig, CapacityMetrics, DecisionEngine, EngineConfig, Error,
    KubeObjectStore, LockMode, LvmBackend, LvmConfig, NodeCapacityCollector, NodeId, OracleConfig,
    OracleFactory, PrometheusOracleConfig, ReconcilerConfig, Result, RestRouter, ShrinkAction,
    ShrinkPolicy, VolumeReconciler,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// LVM Capacity Guard - admission checks and volume reconciliation for node-local LVM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
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
    /// Run the validating admission webhook
    Webhook(WebhookArgs),
    /// Run the per-node capacity agent and volume reconciler
    NodeAgent(NodeAgentArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OracleMode {
    Prometheus,
    Fixed,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LockModeArg {
    None,
    Blocking,
    Reject,
}

impl LockModeArg {
    fn into_mode(self) -> Option<LockMode> {
        match self {
            LockModeArg::None => None,
            LockModeArg::Blocking => Some(LockMode::Blocking),
            LockModeArg::Reject => Some(LockMode::Reject),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ShrinkArg {
    Reject,
    Allow,
}

impl From<ShrinkArg> for ShrinkAction {
    fn from(arg: ShrinkArg) -> Self {
        match arg {
            ShrinkArg::Reject => ShrinkAction::Reject,
            ShrinkArg::Allow => ShrinkAction::Allow,
        }
    }
}

#[derive(Args, Debug)]
struct WebhookArgs {
    /// Webhook bind address
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    listen_addr: SocketAddr,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Where free capacity comes from
    #[arg(long, env = "CAPACITY_ORACLE", value_enum, default_value = "prometheus")]
    oracle: OracleMode,

    /// Prometheus base URL
    #[arg(long, env = "PROMETHEUS_URL", default_value = "http://localhost:9090")]
    prometheus_url: String,

    /// PromQL template; `{node}` is replaced with the node name
    #[arg(long, env = "FREE_CAPACITY_QUERY")]
    query_template: Option<String>,

    /// Free capacity reported for every node in fixed mode (quantity)
    #[arg(long, env = "FIXED_FREE_CAPACITY", value_parser = parse_quantity_arg)]
    fixed_free: Option<i64>,

    /// Limit for each capacity query
    #[arg(long, env = "QUERY_TIMEOUT", default_value = "5s", value_parser = parse_duration_arg)]
    query_timeout: Duration,

    /// Serialize evaluations per namespace
    #[arg(long, env = "LOCK_MODE", value_enum, default_value = "none")]
    lock_mode: LockModeArg,

    /// Handling of Cluster storage shrinks
    #[arg(long, value_enum, default_value = "reject")]
    cluster_shrink: ShrinkArg,

    /// Handling of OpsRequest storage shrinks
    #[arg(long, value_enum, default_value = "allow")]
    ops_request_shrink: ShrinkArg,

    /// Handling of StatefulSet storage shrinks
    #[arg(long, value_enum, default_value = "allow")]
    workload_shrink: ShrinkArg,
}

#[derive(Args, Debug)]
struct NodeAgentArgs {
    /// Name of the node this agent runs on
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Trigger endpoint bind address
    #[arg(long, env = "NODE_AGENT_ADDR", default_value = "0.0.0.0:9100")]
    listen_addr: SocketAddr,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Volume group gauge refresh interval in seconds
    #[arg(long, env = "UPDATE_INTERVAL", default_value = "10")]
    update_interval: u64,

    /// Interval between reconcile passes
    #[arg(
        long,
        env = "RESTORE_PVC_SIZE_INTERVAL",
        default_value = "1h",
        value_parser = parse_duration_arg
    )]
    restore_interval: Duration,

    /// Limit for each LVM command and API call
    #[arg(long, env = "BACKEND_TIMEOUT", default_value = "60s", value_parser = parse_duration_arg)]
    backend_timeout: Duration,

    /// How resizes in one namespace are serialized
    #[arg(long, env = "LOCK_MODE", value_enum, default_value = "blocking")]
    lock_mode: LockModeArg,

    /// Do not grow the filesystem together with the volume
    #[arg(long, env = "NO_RESIZE_FS")]
    no_resize_fs: bool,
}

fn parse_duration_arg(s: &str) -> std::result::Result<Duration, String> {
    units::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_quantity_arg(s: &str) -> std::result::Result<i64, String> {
    units::parse_quantity(s).map_err(|e| e.to_string())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli)?;

    info!("Starting LVM Capacity Guard");
    info!("  Version: {}", lvm_capacity_guard::VERSION);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    match cli.command {
        Command::Webhook(args) => run_webhook(args, shutdown).await?,
        Command::NodeAgent(args) => run_node_agent(args, shutdown).await?,
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run_webhook(args: WebhookArgs, shutdown: CancellationToken) -> Result<()> {
    let oracle_config = match args.oracle {
        OracleMode::Prometheus => {
            let mut config = PrometheusOracleConfig {
                base_url: args.prometheus_url.clone(),
                request_timeout: args.query_timeout,
                ..Default::default()
            };
            if let Some(template) = args.query_template.clone() {
                config.query_template = template;
            }
            OracleConfig::Prometheus(config)
        }
        OracleMode::Fixed => OracleConfig::Fixed {
            free_bytes: args.fixed_free.ok_or_else(|| {
                Error::Configuration("--fixed-free is required with --oracle fixed".into())
            })?,
        },
    };
    let oracle = OracleFactory::create(oracle_config)?;

    info!("  Webhook: {}", args.listen_addr);
    info!("  Oracle: {}", oracle.mode());
    info!("  Query timeout: {:?}", args.query_timeout);
    info!("  Lock mode: {:?}", args.lock_mode);

    let client = kube::Client::try_default().await?;
    let store = Arc::new(KubeObjectStore::new(client));
    let metrics = Arc::new(CapacityMetrics::new()?);

    let config = EngineConfig {
        query_timeout: args.query_timeout,
        shrink: ShrinkPolicy {
            cluster: args.cluster_shrink.into(),
            ops_request: args.ops_request_shrink.into(),
            workload: args.workload_shrink.into(),
        },
        lock_mode: args.lock_mode.into_mode(),
    };
    let engine = Arc::new(DecisionEngine::new(store, oracle, config).with_metrics(metrics.clone()));

    spawn_metrics_server(args.metrics_addr, metrics, shutdown.clone());

    let server = ApiServer::new(ApiServerConfig {
        listen_addr: args.listen_addr,
        ..Default::default()
    })
    .with_shutdown(shutdown);

    info!("Starting admission webhook");
    server.run(RestRouter::webhook(engine).build()).await
}

async fn run_node_agent(args: NodeAgentArgs, shutdown: CancellationToken) -> Result<()> {
    let node = NodeId::new(args.node_name.trim());
    if node.is_empty() {
        return Err(Error::Configuration("--node-name must not be empty".into()));
    }

    info!("  Node: {}", node);
    info!("  Trigger endpoint: {}", args.listen_addr);
    info!("  Update interval: {}s", args.update_interval);
    info!("  Restore interval: {:?}", args.restore_interval);

    let client = kube::Client::try_default().await?;
    let store = Arc::new(KubeObjectStore::new(client));
    let backend = Arc::new(LvmBackend::new(LvmConfig {
        resize_fs: !args.no_resize_fs,
        command_timeout: args.backend_timeout,
        ..Default::default()
    }));
    let metrics = Arc::new(CapacityMetrics::new()?);

    let collector = NodeCapacityCollector::new(
        node.clone(),
        backend.clone(),
        metrics.clone(),
        args.backend_timeout,
    );
    tokio::spawn(collector.run(Duration::from_secs(args.update_interval.max(1)), shutdown.clone()));

    let reconciler = Arc::new(
        VolumeReconciler::new(
            store,
            backend,
            ReconcilerConfig {
                node_name: node,
                backend_timeout: args.backend_timeout,
                lock_mode: args.lock_mode.into_mode().unwrap_or(LockMode::Blocking),
                ..Default::default()
            },
        )
        .with_metrics(metrics.clone()),
    );
    tokio::spawn(reconciler.clone().run(args.restore_interval, shutdown.clone()));

    spawn_metrics_server(args.metrics_addr, metrics, shutdown.clone());

    let server = ApiServer::new(ApiServerConfig {
        listen_addr: args.listen_addr,
        ..Default::default()
    })
    .with_shutdown(shutdown);

    info!("Starting node agent");
    server.run(RestRouter::node_agent(reconciler).build()).await
}

fn spawn_metrics_server(
    addr: SocketAddr,
    metrics: Arc<CapacityMetrics>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info"] {
        let directive = directive
            .parse()
            .map_err(|e| {
                Error::Configuration(format!("invalid log directive {}: {}", directive, e))
            })?;
        filter = filter.add_directive(directive);
    }

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
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<CapacityMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move { Ok::<_, Infallible>(metrics_response(&metrics, req.uri().path())) }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

fn metrics_response(metrics: &CapacityMetrics, path: &str) -> hyper::Response<hyper::Body> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Body, Response, StatusCode};

    let mut response = Response::new(Body::empty());
    match path {
        "/metrics" => match metrics.encode() {
            Ok((_, buffer)) => {
                *response.body_mut() = Body::from(buffer);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
            }
            Err(e) => {
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                *response.body_mut() = Body::from(e.to_string());
            }
        },
        _ => {
            *response.status_mut() = StatusCode::NOT_FOUND;
            *response.body_mut() = Body::from("not found");
        }
    }
    response
}
