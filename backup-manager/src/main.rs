//! Backup Manager - Main entry point

use anyhow::Result;
use backup_manager::{
    api, daemon::shutdown::ShutdownCoordinator, utils, AutoBackupScheduler, BackupManager,
    BroadcastSink, Config, FilePolicyStore, ManagerSettings, StaticEntities, SweepClock,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    config.apply_env_overrides()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.manager.log_level);
    utils::logger::init(log_level)?;

    // Initialize start time for uptime tracking
    api::health::init_start_time();

    tracing::info!(
        "Starting backup-manager v{} ({} entities, {:?} strategy)",
        env!("CARGO_PKG_VERSION"),
        config.entities.len(),
        config.archive.strategy
    );

    let entities = Arc::new(StaticEntities::from_config(&config.entities));
    let policies = Arc::new(FilePolicyStore::load(
        config.manager.policy_state_path(),
        config.policies(),
    )?);
    let events = BroadcastSink::new();

    let manager = BackupManager::new(
        entities,
        Arc::new(events.clone()),
        config.archive.strategy.runner(),
        ManagerSettings::from_config(&config),
    );

    // Auto-backup sweep
    let sweeper = Arc::new(AutoBackupScheduler::new(manager.clone(), policies));
    let sweep_clock = SweepClock::start(&config.manager.sweep_cron, sweeper).await?;

    // Determine port
    let port = args.port.unwrap_or(config.manager.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = api::create_router_with_state(api::AppState {
        manager: manager.clone(),
        events,
    });

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health endpoint: http://{}/health", addr);
    tracing::info!("WebSocket endpoint: ws://{}/ws", addr);

    let shutdown_coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
    let mut server_shutdown = shutdown_coordinator.subscribe();

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown.recv().await.ok();
    });
    let server_handle = tokio::spawn(async move { server.await });

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    if let Err(e) = sweep_clock.shutdown().await {
        tracing::warn!("Failed to stop auto-backup sweep: {}", e);
    }

    // Cancel running backups
    shutdown_coordinator.shutdown(&manager).await;

    // Wait for server to finish (with timeout)
    match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
