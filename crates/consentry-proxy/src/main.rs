//! Consentry Proxy
//!
//! Consent-aware reverse proxy for cookie-setting sites.

use anyhow::Result;
use clap::Parser;
use consentry_proxy::{proxy::AppState, routes, ConfigOverrides, ProxyConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "consentry-proxy")]
#[command(about = "Consentry cookie consent proxy", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "consentry.yaml")]
    config: String,

    /// Upstream site URL
    #[arg(short, long)]
    backend: Option<String>,

    /// Blocking rules file
    #[arg(short, long)]
    rules: Option<String>,

    /// Consent records file
    #[arg(long)]
    records: Option<String>,

    /// Listen address
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    listen: String,

    /// Listen port
    #[arg(short = 'P', long, default_value = "8080")]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);
    info!("Starting Consentry Proxy");

    let overrides = ConfigOverrides {
        backend: cli.backend.clone(),
        rules: cli.rules.clone(),
        records: cli.records.clone(),
    };
    let config = ProxyConfig::load(&cli.config, &overrides)?;
    info!(
        backend = %config.backend_url,
        rules = config.rules_path.as_deref().unwrap_or("-"),
        records = config.records_path.as_deref().unwrap_or("-"),
        method = ?config.blocking.method,
        "Configuration loaded"
    );

    let metrics_handle = init_metrics()?;
    let state = AppState::new(config, metrics_handle)?;

    let addr: SocketAddr = format!("{}:{}", cli.listen, cli.port).parse()?;
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Proxy listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        consentry_proxy::request_shutdown();
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("consentry=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("consentry=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    consentry_telemetry::describe_metrics();

    info!("Metrics exporter initialized");
    Ok(handle)
}
