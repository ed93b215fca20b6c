// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FabWatch Core - Machine Monitoring Engine
//!
//! Core is responsible for:
//! - Status intervals (close/open pairs committed atomically)
//! - Signal and downtime-reason resolution
//! - Offline detection (heartbeat sweeper)
//! - Derived metrics (utilization, downtime, OEE)
//!
//! Note: signal ingestion transports, dashboards, and alert rule
//! configuration are handled by the surrounding services.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use fabwatch_core::config::Config;
use fabwatch_core::persistence::postgres::PostgresStatusConfig;
use fabwatch_core::persistence::PostgresLogStore;
use fabwatch_core::runtime::{MonitorRuntime, RuntimeSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fabwatch_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting FabWatch Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        heartbeat_ttl_secs = config.heartbeat_ttl.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");

    // Verify connection
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    let store = Arc::new(PostgresLogStore::new(pool.clone()));
    let provider = Arc::new(PostgresStatusConfig::new(pool.clone()));

    let runtime = MonitorRuntime::builder()
        .store(store)
        .config_provider(provider)
        .settings(RuntimeSettings {
            tuning: config.monitor_tuning(),
            sweep_interval: config.sweep_interval,
            sweep_batch_size: config.sweep_batch_size,
            outbound_queue_capacity: config.outbound_queue_capacity,
            outbound_workers: config.outbound_workers,
            settings_cache_ttl: config.settings_cache_ttl,
            summary_cache_ttl: config.summary_cache_ttl,
        })
        .build()?
        .start()
        .await?;

    info!("FabWatch Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
