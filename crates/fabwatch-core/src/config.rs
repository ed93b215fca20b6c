// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::monitor::MonitorTuning;

/// FabWatch Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// How long an open interval's heartbeat may age before a machine is
    /// considered offline
    pub heartbeat_ttl: Duration,
    /// Slack subtracted from the TTL when re-checking under the lock
    pub offline_grace: Duration,
    /// Lease duration for per-machine locks
    pub lock_lease: Duration,
    /// How long a transition waits for a busy machine lock
    pub lock_wait: Duration,
    /// How often the offline sweeper scans for stale machines
    pub sweep_interval: Duration,
    /// Maximum stale machines processed per sweep
    pub sweep_batch_size: i64,
    /// Bounded capacity of the post-commit outbound queue
    pub outbound_queue_capacity: usize,
    /// Number of outbound workers draining the queue
    pub outbound_workers: usize,
    /// TTL for cached per-machine status configuration
    pub settings_cache_ttl: Duration,
    /// TTL for cached operator names
    pub user_cache_ttl: Duration,
    /// TTL for published summary snapshots
    pub summary_cache_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FABWATCH_DATABASE_URL`: PostgreSQL connection string
    ///
    /// Optional (with defaults):
    /// - `FABWATCH_HEARTBEAT_TTL_SECS`: heartbeat timeout (default: 180)
    /// - `FABWATCH_OFFLINE_GRACE_SECS`: offline re-check slack (default: 30)
    /// - `FABWATCH_LOCK_LEASE_SECS`: machine lock lease (default: 10)
    /// - `FABWATCH_LOCK_WAIT_MS`: lock wait before supersession (default: 1000)
    /// - `FABWATCH_SWEEP_INTERVAL_SECS`: sweeper period (default: 30)
    /// - `FABWATCH_SWEEP_BATCH_SIZE`: machines per sweep (default: 100)
    /// - `FABWATCH_OUTBOUND_QUEUE_CAPACITY`: queue bound (default: 256)
    /// - `FABWATCH_OUTBOUND_WORKERS`: worker count (default: 2)
    /// - `FABWATCH_SETTINGS_CACHE_TTL_SECS`: config cache TTL (default: 60)
    /// - `FABWATCH_USER_CACHE_TTL_SECS`: user cache TTL (default: 300)
    /// - `FABWATCH_SUMMARY_CACHE_TTL_SECS`: snapshot TTL (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("FABWATCH_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FABWATCH_DATABASE_URL"))?;

        let heartbeat_ttl = secs_var("FABWATCH_HEARTBEAT_TTL_SECS", 180)?;
        let offline_grace = secs_var("FABWATCH_OFFLINE_GRACE_SECS", 30)?;
        if offline_grace >= heartbeat_ttl {
            return Err(ConfigError::Invalid(
                "FABWATCH_OFFLINE_GRACE_SECS",
                "must be smaller than FABWATCH_HEARTBEAT_TTL_SECS",
            ));
        }

        let lock_wait_ms: u64 = std::env::var("FABWATCH_LOCK_WAIT_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("FABWATCH_LOCK_WAIT_MS", "must be a positive integer"))?;

        let sweep_batch_size: i64 = std::env::var("FABWATCH_SWEEP_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("FABWATCH_SWEEP_BATCH_SIZE", "must be a positive integer")
            })?;

        let outbound_queue_capacity: usize = std::env::var("FABWATCH_OUTBOUND_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "FABWATCH_OUTBOUND_QUEUE_CAPACITY",
                    "must be a positive integer",
                )
            })?;

        let outbound_workers: usize = std::env::var("FABWATCH_OUTBOUND_WORKERS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("FABWATCH_OUTBOUND_WORKERS", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            heartbeat_ttl: Duration::from_secs(heartbeat_ttl),
            offline_grace: Duration::from_secs(offline_grace),
            lock_lease: Duration::from_secs(secs_var("FABWATCH_LOCK_LEASE_SECS", 10)?),
            lock_wait: Duration::from_millis(lock_wait_ms),
            sweep_interval: Duration::from_secs(secs_var("FABWATCH_SWEEP_INTERVAL_SECS", 30)?),
            sweep_batch_size,
            outbound_queue_capacity,
            outbound_workers,
            settings_cache_ttl: Duration::from_secs(secs_var(
                "FABWATCH_SETTINGS_CACHE_TTL_SECS",
                60,
            )?),
            user_cache_ttl: Duration::from_secs(secs_var("FABWATCH_USER_CACHE_TTL_SECS", 300)?),
            summary_cache_ttl: Duration::from_secs(secs_var(
                "FABWATCH_SUMMARY_CACHE_TTL_SECS",
                60,
            )?),
        })
    }

    /// The state-machine tuning derived from this configuration.
    pub fn monitor_tuning(&self) -> MonitorTuning {
        MonitorTuning {
            heartbeat_ttl: self.heartbeat_ttl,
            offline_grace: self.offline_grace,
            lock_lease: self.lock_lease,
            lock_wait: self.lock_wait,
            user_cache_ttl: self.user_cache_ttl,
        }
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a positive integer"))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
