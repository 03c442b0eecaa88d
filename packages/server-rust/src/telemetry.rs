//! Process-wide log and metrics sinks.
//!
//! Library code only talks to the `tracing` and `metrics` facades; the binary
//! calls these once at startup to decide where the output goes.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event, with the current span's fields.
    Json,
}

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()?,
    }
    Ok(())
}

/// Installs the Prometheus recorder with a scrape endpoint on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be set up.
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
