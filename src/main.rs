//! OnDemand Exporter - Prometheus exporter for Open OnDemand
//!
//! Serves session, process, Apache and Passenger metrics of an Open OnDemand
//! portal host. Every scrape of `/metrics` runs one collection cycle.

use anyhow::{Context, Result};
use clap::Parser;
use ondemand_exporter::{
    cli::Cli,
    config::Config,
    internal_metrics::{server::MetricsServer, MetricsExporter},
    scrape::{Scraper, ScraperDeps},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info");
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting ondemand_exporter");

    info!("-------------------- Configuration --------------------");
    info!("Listen Address: {}", config.listen_address);
    info!("Use sudo: {}", config.use_sudo);
    info!("nginx_stage: {}", config.puns.nginx_stage_path.display());
    info!(
        "Apache Status URL: {}",
        config.apache.status_url.as_deref().unwrap_or("derived from portal config")
    );
    info!("Portal Config: {}", config.apache.portal_config_path.display());
    info!("Passenger Status: {}", config.passenger.status_path.display());
    info!(
        "Timeouts: puns={}s process={}s apache={}s passenger={}s",
        config.puns.timeout_seconds,
        config.process.timeout_seconds,
        config.apache.timeout_seconds,
        config.passenger.timeout_seconds
    );
    info!("-------------------------------------------------------");

    let scraper = Scraper::from_config(&config, ScraperDeps::system(config.use_sudo))
        .context("failed to build collectors")?;
    let exporter = Arc::new(MetricsExporter::new(scraper, config.metrics.system_metrics_enabled));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    let server = tokio::spawn(MetricsServer::new(listener, exporter, shutdown_rx).run());

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received.");
    if shutdown_tx.send(true).is_err() {
        error!("Failed to send shutdown signal; tasks may already be stopped.");
    }
    if let Err(e) = server.await {
        error!(error = %e, "Metrics server task panicked");
    }
    info!("Shutdown complete.");
    Ok(())
}
