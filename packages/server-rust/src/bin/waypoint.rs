//! `waypoint` command line: serve the capabilities, or call one remotely.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use waypoint_server::network::{NetworkConfig, NetworkModule};
use waypoint_server::service::domain::{ProductEndpoints, ProductService};
use waypoint_server::telemetry::{self, LogFormat};
use waypoint_server::transport::{Channel, HttpChannel};
use waypoint_server::{CallContext, ServiceConfig, ServiceError, Services};

#[derive(Parser)]
#[command(name = "waypoint", version, about = "Business operations behind a decorated RPC pipeline")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "WAYPOINT_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// JSON pipeline configuration. Defaults enable observability only.
    #[arg(long, global = true, env = "WAYPOINT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve every capability over HTTP until interrupted.
    Serve(ServeArgs),
    /// Call `product.Sum` on a running server and print the result.
    Sum(SumArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "WAYPOINT_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "WAYPOINT_PORT", default_value_t = 8080)]
    port: u16,

    /// Address for the Prometheus scrape endpoint. Metrics are not exported
    /// when unset.
    #[arg(long, env = "WAYPOINT_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Seconds to wait for in-flight calls on shutdown.
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,
}

#[derive(Args)]
struct SumArgs {
    /// Base URL of the server.
    #[arg(long, env = "WAYPOINT_ADDR", default_value = "http://127.0.0.1:8080")]
    addr: String,

    #[arg(allow_negative_numbers = true)]
    a: i64,

    #[arg(allow_negative_numbers = true)]
    b: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_format)?;

    let config = match &cli.config {
        Some(path) => ServiceConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::default(),
    };

    match cli.command {
        Command::Serve(args) => serve(args, &config).await,
        Command::Sum(args) => sum(args, &config).await,
    }
}

async fn serve(args: ServeArgs, config: &ServiceConfig) -> anyhow::Result<()> {
    if let Some(addr) = args.metrics_addr {
        telemetry::install_metrics_exporter(addr)?;
    }

    let services = Services::in_memory(config)?;
    let mut network = NetworkModule::new(NetworkConfig {
        host: args.host,
        port: args.port,
        drain_timeout: Duration::from_secs(args.drain_timeout_secs),
        ..NetworkConfig::default()
    });
    let port = network.start().await?;
    info!(port, "waypoint ready");

    network.serve(services.rpc_router(), shutdown_signal()).await
}

async fn sum(args: SumArgs, config: &ServiceConfig) -> anyhow::Result<()> {
    let channel: Arc<dyn Channel> = Arc::new(HttpChannel::new(args.addr));
    let product = ProductEndpoints::remote(&channel, config)?;
    let ctx = CallContext::new().with_timeout(config.call_timeout());

    match product.sum(ctx, args.a, args.b).await {
        Ok(v) => {
            println!("{v}");
            Ok(())
        }
        Err(ServiceError::Application(e)) => anyhow::bail!("sum refused: {e}"),
        Err(ServiceError::Call(e)) => Err(e).context("sum call failed"),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
