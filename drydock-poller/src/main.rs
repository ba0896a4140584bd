//! Drydock Poller binary
//!
//! Runs the image polling engine against an in-memory fleet (optionally
//! seeded from a JSON file) and serves the debug API next to it.

use anyhow::{Context, Result};
use drydock_core::SystemClock;
use drydock_poller::api;
use drydock_poller::config::PollerConfig;
use drydock_poller::scheduler::{Collaborators, ImagePollingJob};
use drydock_poller::service::{
    FleetSeed, InMemoryFleet, InMemorySettings, LoggingUpdateSink, StaticCredentials,
};
use drydock_registry::RegistryClient;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drydock_poller=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Drydock Poller");

    // Load configuration
    let config = PollerConfig::from_env().context("Invalid poller configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: workers={}, queue_capacity={}, cache_ttl={:?}, bind_addr={}",
        config.workers, config.queue_capacity, config.cache_ttl, config.bind_addr
    );

    // Initialize collaborators
    let settings = Arc::new(InMemorySettings::new());
    let fleet = Arc::new(InMemoryFleet::new());
    let mut credentials = StaticCredentials::new();

    if let Some(path) = &config.fleet_file {
        FleetSeed::load(path)?
            .apply(&fleet, &settings, &mut credentials)
            .with_context(|| format!("Failed to apply fleet file {}", path.display()))?;
    }
    info!(
        "Tracking {} workload(s), credentials for {} registries",
        fleet.len(),
        credentials.len()
    );

    let registry = RegistryClient::with_timeout(config.request_timeout)
        .with_insecure_registries(config.insecure_registries.clone());

    let job = ImagePollingJob::new(
        &config,
        Collaborators {
            settings,
            fleet,
            registry: Arc::new(registry),
            credentials: Arc::new(credentials),
            updates: Arc::new(LoggingUpdateSink::new()),
            clock: Arc::new(SystemClock),
        },
    );

    job.start().await?;

    // Initial sweep instead of waiting a full interval
    match job.run_tick().await {
        Ok(submitted) => info!("Initial sweep submitted {} task(s)", submitted),
        Err(e) => error!("Initial sweep failed: {:#}", e),
    }

    // Serve the debug API until interrupted
    let app = api::create_router(Arc::clone(&job));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Debug API listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Debug API server failed")?;

    job.shutdown().await;
    info!("Drydock Poller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
