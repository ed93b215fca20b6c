// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-machine mutual exclusion with time-bounded leases.
//!
//! The lock provider is the single serialization point for status
//! transitions: one key per machine, so transitions for different machines
//! never contend. Leases auto-expire so a crashed holder cannot deadlock a
//! machine.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// Lock key convention: one lock per machine identity.
pub fn machine_lock_key(machine_id: Uuid) -> String {
    format!("machine:{machine_id}")
}

/// Handle for a held lease. Pass it back to [`LockProvider::release`].
#[derive(Debug, Clone)]
pub struct LockLease {
    /// The key this lease covers.
    pub key: String,
    /// Token identifying this particular acquisition.
    pub token: Uuid,
}

/// Mutually-exclusive, time-bounded lease provider.
///
/// `acquire` fails closed: it returns `None` once `max_wait` elapses rather
/// than blocking indefinitely. Callers must treat `None` as "another
/// transition is in flight" and report supersession, never a hard failure.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Try to acquire the lease for `key`, waiting at most `max_wait`.
    async fn acquire(&self, key: &str, lease: Duration, max_wait: Duration) -> Option<LockLease>;

    /// Release a held lease. Idempotent: releasing an expired or already
    /// released lease is a no-op.
    async fn release(&self, lease: LockLease);
}

struct LeaseEntry {
    token: Uuid,
    expires_at: Instant,
}

/// In-process [`LockProvider`] backed by a concurrent map.
///
/// Suitable for a single-node deployment or tests; a multi-node deployment
/// swaps in a provider backed by a shared lock service behind the same
/// trait.
pub struct LocalLockProvider {
    leases: DashMap<String, LeaseEntry>,
    poll_interval: Duration,
}

impl Default for LocalLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLockProvider {
    /// Create a new provider.
    pub fn new() -> Self {
        Self {
            leases: DashMap::new(),
            poll_interval: Duration::from_millis(25),
        }
    }

    fn try_acquire(&self, key: &str, lease: Duration) -> Option<LockLease> {
        let now = Instant::now();
        let token = Uuid::new_v4();
        let mut acquired = false;

        let mut entry = self.leases.entry(key.to_string()).or_insert_with(|| {
            acquired = true;
            LeaseEntry {
                token,
                expires_at: now + lease,
            }
        });

        // Expired leases are reclaimable: the previous holder crashed or
        // overran its lease.
        if !acquired && entry.expires_at <= now {
            entry.token = token;
            entry.expires_at = now + lease;
            acquired = true;
        }
        drop(entry);

        acquired.then(|| LockLease {
            key: key.to_string(),
            token,
        })
    }
}

#[async_trait]
impl LockProvider for LocalLockProvider {
    async fn acquire(&self, key: &str, lease: Duration, max_wait: Duration) -> Option<LockLease> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(handle) = self.try_acquire(key, lease) {
                return Some(handle);
            }
            if Instant::now() >= deadline {
                debug!(key, "lock wait timed out");
                return None;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - Instant::now())).await;
        }
    }

    async fn release(&self, lease: LockLease) {
        // Only remove the entry if it is still our acquisition; a later
        // holder that reclaimed an expired lease must not be evicted.
        self.leases
            .remove_if(&lease.key, |_, entry| entry.token == lease.token);
    }
}
