// Main entry point for the orchestrator server

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use roostr_core::kernel::engine::{PgJobStore, TaskManager, TaskManagerConfig};
use roostr_core::kernel::platform::UnconfiguredPlatform;
use roostr_core::kernel::{Kernel, StreamHub};
use roostr_core::server::build_app;
use roostr_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,roostr_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting automation orchestrator");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Build the engine
    let store = Arc::new(PgJobStore::new(pool.clone()));
    let workers = roostr_core::models::Account::count_workers(&pool)
        .await
        .context("Failed to count workers")?;
    if workers == 0 {
        if config.strict_workers {
            bail!("no worker accounts present and STRICT_WORKERS is on");
        }
        tracing::warn!("no worker accounts present; dispatch will idle");
    }

    let hub = StreamHub::new();
    let manager = TaskManager::new(
        store.clone(),
        Arc::new(UnconfiguredPlatform),
        hub.clone(),
        TaskManagerConfig::from_app_config(&config),
    );

    // Start the scheduler (includes the interrupted-job recovery sweep)
    manager.start().await.context("Failed to start scheduler")?;

    let kernel = Kernel::new(
        pool,
        store,
        Arc::new(UnconfiguredPlatform),
        manager.clone(),
        hub,
        config.clone(),
    );

    // Build application
    let app = build_app(kernel);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let shutdown_manager = manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            if let Err(e) = shutdown_manager.stop().await {
                tracing::error!(error = %e, "scheduler stop failed");
            }
        })
        .await
        .context("Server error")?;

    tracing::info!("clean shutdown");
    Ok(())
}
