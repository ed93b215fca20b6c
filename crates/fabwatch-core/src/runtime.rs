// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for fabwatch-core.
//!
//! This module provides [`MonitorRuntime`] which allows embedding
//! fabwatch-core into an existing tokio application instead of running it as
//! a standalone service.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fabwatch_core::persistence::PostgresLogStore;
//! use fabwatch_core::runtime::MonitorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let store = Arc::new(PostgresLogStore::new(pool.clone()));
//!
//!     let runtime = MonitorRuntime::builder()
//!         .store(store)
//!         .config_provider(Arc::new(
//!             fabwatch_core::persistence::postgres::PostgresStatusConfig::new(pool),
//!         ))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // feed signals through runtime.monitor() ...
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{InMemorySummaryCache, SummaryCache};
use crate::collaborators::{AlertSink, JobLookup, NoAlertSink, UserLookup};
use crate::lock::{LocalLockProvider, LockProvider};
use crate::monitor::{MachineMonitor, MonitorTuning, TransitionOutcome};
use crate::outbound::{outbound_channel, spawn_workers, OutboundWorker};
use crate::persistence::LogStore;
use crate::resolution::{StatusConfigProvider, StatusResolver};

/// Runtime-wide knobs beyond the state-machine tuning.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// State-machine tuning.
    pub tuning: MonitorTuning,
    /// How often the sweeper scans for stale machines.
    pub sweep_interval: Duration,
    /// Maximum stale machines processed per sweep.
    pub sweep_batch_size: i64,
    /// Bounded capacity of the outbound queue.
    pub outbound_queue_capacity: usize,
    /// Number of outbound workers.
    pub outbound_workers: usize,
    /// TTL for cached per-machine status configuration.
    pub settings_cache_ttl: Duration,
    /// TTL for published summary snapshots.
    pub summary_cache_ttl: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tuning: MonitorTuning::default(),
            sweep_interval: Duration::from_secs(30),
            sweep_batch_size: 100,
            outbound_queue_capacity: 256,
            outbound_workers: 2,
            settings_cache_ttl: Duration::from_secs(60),
            summary_cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Builder for creating a [`MonitorRuntime`].
pub struct MonitorRuntimeBuilder {
    store: Option<Arc<dyn LogStore>>,
    config_provider: Option<Arc<dyn StatusConfigProvider>>,
    locks: Option<Arc<dyn LockProvider>>,
    cache: Option<Arc<dyn SummaryCache>>,
    jobs: Option<Arc<dyn JobLookup>>,
    users: Option<Arc<dyn UserLookup>>,
    alerts: Option<Arc<dyn AlertSink>>,
    settings: RuntimeSettings,
}

impl std::fmt::Debug for MonitorRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for MonitorRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            config_provider: None,
            locks: None,
            cache: None,
            jobs: None,
            users: None,
            alerts: None,
            settings: RuntimeSettings::default(),
        }
    }
}

impl MonitorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log store (required).
    pub fn store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the status configuration provider (required).
    pub fn config_provider(mut self, provider: Arc<dyn StatusConfigProvider>) -> Self {
        self.config_provider = Some(provider);
        self
    }

    /// Set the lock provider.
    ///
    /// Default: an in-process [`LocalLockProvider`].
    pub fn lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Set the summary cache.
    ///
    /// Default: an in-process [`InMemorySummaryCache`].
    pub fn summary_cache(mut self, cache: Arc<dyn SummaryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach a job lookup for job attribution.
    pub fn job_lookup(mut self, jobs: Arc<dyn JobLookup>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Attach a user lookup for operator attribution.
    pub fn user_lookup(mut self, users: Arc<dyn UserLookup>) -> Self {
        self.users = Some(users);
        self
    }

    /// Attach an alert sink for post-commit notifications.
    pub fn alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Override the runtime settings.
    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<MonitorRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let config_provider = self
            .config_provider
            .ok_or_else(|| anyhow::anyhow!("config_provider is required"))?;

        Ok(MonitorRuntimeConfig {
            store,
            config_provider,
            locks: self.locks.unwrap_or_else(|| Arc::new(LocalLockProvider::new())),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(InMemorySummaryCache::new())),
            jobs: self.jobs,
            users: self.users,
            alerts: self.alerts.unwrap_or_else(|| Arc::new(NoAlertSink)),
            settings: self.settings,
        })
    }
}

/// Configuration for a [`MonitorRuntime`].
pub struct MonitorRuntimeConfig {
    store: Arc<dyn LogStore>,
    config_provider: Arc<dyn StatusConfigProvider>,
    locks: Arc<dyn LockProvider>,
    cache: Arc<dyn SummaryCache>,
    jobs: Option<Arc<dyn JobLookup>>,
    users: Option<Arc<dyn UserLookup>>,
    alerts: Arc<dyn AlertSink>,
    settings: RuntimeSettings,
}

impl MonitorRuntimeConfig {
    /// Start the runtime, spawning the outbound workers and the offline
    /// sweeper.
    pub async fn start(self) -> Result<MonitorRuntime> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let resolver = Arc::new(StatusResolver::new(
            self.config_provider,
            self.settings.settings_cache_ttl,
        ));

        let (outbound, outbound_rx) = outbound_channel(self.settings.outbound_queue_capacity);
        let worker = Arc::new(OutboundWorker::new(
            self.store.clone(),
            self.cache.clone(),
            self.alerts,
            self.settings.summary_cache_ttl,
        ));
        let worker_handles = spawn_workers(
            self.settings.outbound_workers,
            worker,
            outbound_rx,
            shutdown_rx.clone(),
        );

        let mut monitor = MachineMonitor::new(
            self.store.clone(),
            self.locks,
            resolver,
            self.settings.tuning.clone(),
        )
        .with_outbound(outbound);
        if let Some(jobs) = self.jobs {
            monitor = monitor.with_job_lookup(jobs);
        }
        if let Some(users) = self.users {
            monitor = monitor.with_user_lookup(users);
        }
        let monitor = Arc::new(monitor);

        let sweeper_handle = tokio::spawn(run_offline_sweeper(
            self.store,
            monitor.clone(),
            self.settings.tuning.clone(),
            self.settings.sweep_interval,
            self.settings.sweep_batch_size,
            shutdown_rx,
        ));

        info!(
            sweep_interval_secs = self.settings.sweep_interval.as_secs(),
            outbound_workers = self.settings.outbound_workers,
            "MonitorRuntime started"
        );

        Ok(MonitorRuntime {
            monitor,
            cache: self.cache,
            sweeper_handle,
            worker_handles,
            shutdown_tx,
        })
    }
}

/// A running fabwatch-core instance that can be embedded in an application.
///
/// The runtime manages:
/// - the outbound worker pool for post-commit side effects
/// - the offline sweeper that transitions silent machines
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct MonitorRuntime {
    monitor: Arc<MachineMonitor>,
    cache: Arc<dyn SummaryCache>,
    sweeper_handle: JoinHandle<()>,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl MonitorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> MonitorRuntimeBuilder {
        MonitorRuntimeBuilder::new()
    }

    /// The state machine. Feed signal, manual downtime, and offline events
    /// through this handle.
    pub fn monitor(&self) -> &Arc<MachineMonitor> {
        &self.monitor
    }

    /// The summary cache the outbound workers publish into.
    pub fn summary_cache(&self) -> &Arc<dyn SummaryCache> {
        &self.cache
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.sweeper_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// This stops the sweeper and drains the outbound workers.
    pub async fn shutdown(self) -> Result<()> {
        info!("MonitorRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.sweeper_handle.await {
            error!("sweeper task panicked: {}", e);
            return Err(anyhow::anyhow!("sweeper task panicked: {}", e));
        }
        for handle in self.worker_handles {
            if let Err(e) = handle.await {
                error!("outbound worker panicked: {}", e);
                return Err(anyhow::anyhow!("outbound worker panicked: {}", e));
            }
        }

        info!("MonitorRuntime shutdown complete");
        Ok(())
    }
}

/// Periodically scan for machines whose heartbeat went stale and run the
/// offline check for each.
async fn run_offline_sweeper(
    store: Arc<dyn LogStore>,
    monitor: Arc<MachineMonitor>,
    tuning: MonitorTuning,
    interval: Duration,
    batch_size: i64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("offline sweeper stopped");
                    return;
                }
                continue;
            }
        }

        // Candidate selection uses the full TTL; the per-machine check
        // re-validates under the lock with the grace-adjusted cutoff.
        let cutoff = Utc::now()
            - chrono::Duration::from_std(tuning.heartbeat_ttl)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let candidates = match store.stale_machines(cutoff, batch_size).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "stale machine scan failed");
                continue;
            }
        };

        if candidates.is_empty() {
            continue;
        }
        debug!(count = candidates.len(), "sweeping stale machines");

        for machine_id in candidates {
            match monitor.check_offline(machine_id).await {
                Ok(TransitionOutcome::Transitioned { interval_id }) => {
                    info!(%machine_id, %interval_id, "machine transitioned to offline");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(%machine_id, error = %err, "offline check failed");
                }
            }
        }
    }
}
