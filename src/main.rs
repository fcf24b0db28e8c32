//! Venue Stream - Entry Point
//!
//! Keeps a warm price cache for every (venue, market) that active alerts
//! need. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (path overridable via VENUE_STREAM_CONFIG)
//! 2. Init tracing (JSON structured logging)
//! 3. Build the demand source (JSON file, re-read every cycle)
//! 4. Build the Bitget REST price source for the polling venue
//! 5. Create the Prometheus registry
//! 6. Create and start the stream hub
//! 7. Spawn health (/live, /ready) and metrics (/metrics) servers
//! 8. Wait for SIGINT, then stop the hub and the servers

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use venue_stream::adapters::api::BitgetPriceSource;
use venue_stream::adapters::demand_file::FileDemandSource;
use venue_stream::adapters::metrics::{HealthServer, MetricsRegistry};
use venue_stream::config;
use venue_stream::domain::market::Venue;
use venue_stream::ports::price_source::PriceMapSource;
use venue_stream::usecases::stream_hub::StreamHub;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path =
        std::env::var("VENUE_STREAM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    let settings = config.streams.settings();
    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        demand = %config.demand.path,
        reconcile_secs = settings.reconcile_interval.as_secs(),
        "Starting venue stream"
    );

    // ── 3. Demand source ────────────────────────────────────
    let demand = Arc::new(FileDemandSource::new(&config.demand.path));

    // ── 4. REST source for the polling venue ────────────────
    let bitget: Arc<dyn PriceMapSource> =
        Arc::new(BitgetPriceSource::new().context("Failed to create Bitget client")?);
    let poll_sources = HashMap::from([(Venue::Bitget, bitget)]);

    // ── 5. Metrics registry ─────────────────────────────────
    let metrics = if config.metrics.enabled {
        Some(Arc::new(
            MetricsRegistry::new().context("Failed to create metrics registry")?,
        ))
    } else {
        None
    };

    // ── 6. Stream hub ───────────────────────────────────────
    let hub = Arc::new(StreamHub::new(settings, demand, poll_sources, metrics.clone()));
    hub.start().await;

    // ── 7. Health and metrics servers ───────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    let health = HealthServer::new(Arc::clone(&hub), config.metrics.health_port);
    let health_handle = tokio::spawn(health.run(shutdown_tx.subscribe()));

    let metrics_handle = metrics.map(|registry| {
        tokio::spawn(registry.serve(config.metrics.bind_address.clone(), shutdown_tx.subscribe()))
    });

    info!("All tasks spawned, streaming");

    // ── 8. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
    }
    info!("SIGINT received, initiating graceful shutdown");

    hub.stop().await;

    let _ = shutdown_tx.send(());
    await_server("health", health_handle).await;
    if let Some(handle) = metrics_handle {
        await_server("metrics", handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Give a server up to 5s to drain after the shutdown broadcast.
async fn await_server(name: &str, handle: tokio::task::JoinHandle<Result<()>>) {
    match tokio::time::timeout(Duration::from_secs(5), handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(server = name, error = %e, "Server failed"),
        Ok(Err(e)) => error!(server = name, error = %e, "Server task panicked"),
        Err(_) => error!(server = name, "Server did not stop within 5s"),
    }
}
