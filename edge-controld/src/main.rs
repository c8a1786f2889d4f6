mod api;
mod clock;
mod config;
mod error;
mod fleet;
mod fleet_manager;

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::fleet::{Fleet, FleetSettings};
use crate::fleet_manager::FleetHandle;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("edge_controld=info,tower_http=info"))
        )
        .init();

    tracing::info!("Starting edge-controld");

    // Load config: optional TOML file, then EDGE_* overrides
    let mut config = match std::env::args().nth(1) {
        Some(config_path) => {
            let config = Config::load(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path))?;
            tracing::info!("Loaded config from {}", config_path);
            config
        }
        None => {
            tracing::info!("No config file given, using defaults");
            Config::default()
        }
    };
    config.apply_env().context("Invalid environment override")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        fresh_after_secs = config.fleet.fresh_after_secs,
        expire_after_secs = config.fleet.expire_after_secs,
        cleanup_interval_secs = config.fleet.cleanup_interval_secs,
        "Fleet liveness thresholds"
    );

    // Fleet state lives on its own thread
    let fleet = Fleet::new(FleetSettings::from_config(&config.fleet));
    let (fingerprint_tx, fingerprint_rx) = watch::channel(fleet.fingerprint());
    let fleet_handle = FleetHandle::spawn(fleet, Arc::new(SystemClock), fingerprint_tx);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn cleanup scheduler
    let cleanup_cancel = cancel.clone();
    let cleanup_fleet = fleet_handle.clone();
    let cleanup_interval = config.fleet.cleanup_interval_secs;
    let cleanup_handle = tokio::spawn(async move {
        if let Err(e) = fleet_manager::run(cleanup_fleet, cleanup_interval, cleanup_cancel).await {
            tracing::error!("Cleanup scheduler error: {}", e);
        }
    });

    // Build API router
    let app_state = api::routes::AppState {
        fleet: fleet_handle.clone(),
        fingerprint_rx,
        prefix: config.api.prefix.clone(),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {} under {}", config.api.listen, config.api.prefix);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete
    let _ = tokio::join!(cleanup_handle, server_handle);

    // Shutdown fleet thread
    if let Err(e) = fleet_handle.shutdown().await {
        tracing::error!("Failed to shutdown fleet thread: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
