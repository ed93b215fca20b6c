// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Machine status state machine.
//!
//! Every status change for a machine funnels through [`MachineMonitor`]:
//! acquire the machine lock, read the open intervals, resolve the incoming
//! event, then commit the close/open pair atomically through the log store.
//! The protocol is identical for signal events, operator-reported downtime,
//! and the offline sweeper; only the resolution step differs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::collaborators::{ActiveJob, JobLookup, NoJobLookup, NoUserLookup, UserInfo, UserLookup};
use crate::error::{MonitorError, Result};
use crate::lock::{machine_lock_key, LockProvider};
use crate::outbound::{OutboundEvent, OutboundSender};
use crate::persistence::{IntervalKind, IntervalRecord, LogStore};
use crate::resolution::{MachineStatusConfig, StatusResolver};

/// Status name and color used for offline intervals.
pub const OFFLINE_STATUS: &str = "Offline";
const OFFLINE_COLOR: &str = "#000000";

/// Source tag recorded on intervals opened and closed by the sweeper.
pub const OFFLINE_SOURCE: &str = "offline-sweeper";

/// Result of a transition attempt.
///
/// Lock contention is an outcome, not an error: when another transition for
/// the same machine is in flight, the caller's event has been superseded by
/// a concurrent one and there is nothing to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// A new interval was opened (and the previous ones closed).
    Transitioned {
        /// Identifier of the newly opened interval.
        interval_id: Uuid,
    },
    /// The event matched the current open interval; its heartbeat was
    /// refreshed and no new interval was opened.
    Continuing,
    /// A concurrent transition holds the machine lock; this event was
    /// dropped in its favor.
    Superseded,
}

/// Timing knobs for the state machine.
#[derive(Debug, Clone)]
pub struct MonitorTuning {
    /// How long an open interval's heartbeat may age before the machine is
    /// considered offline.
    pub heartbeat_ttl: Duration,
    /// Slack subtracted from the TTL when re-checking under the lock, so a
    /// signal that raced the sweeper cancels the offline transition.
    pub offline_grace: Duration,
    /// Lease duration for the per-machine lock.
    pub lock_lease: Duration,
    /// How long a transition waits for the lock before reporting
    /// supersession.
    pub lock_wait: Duration,
    /// TTL for cached operator names.
    pub user_cache_ttl: Duration,
}

impl Default for MonitorTuning {
    fn default() -> Self {
        Self {
            heartbeat_ttl: Duration::from_secs(180),
            offline_grace: Duration::from_secs(30),
            lock_lease: Duration::from_secs(10),
            lock_wait: Duration::from_millis(1000),
            user_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl MonitorTuning {
    /// Heartbeats older than this are stale enough to go offline.
    pub fn offline_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let effective = self.heartbeat_ttl.saturating_sub(self.offline_grace);
        now - chrono::Duration::from_std(effective).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// The monitoring state machine for a fleet of machines.
pub struct MachineMonitor {
    store: Arc<dyn LogStore>,
    locks: Arc<dyn LockProvider>,
    resolver: Arc<StatusResolver>,
    jobs: Arc<dyn JobLookup>,
    users: Arc<dyn UserLookup>,
    user_cache: TtlCache<Uuid, UserInfo>,
    outbound: Option<OutboundSender>,
    tuning: MonitorTuning,
}

impl MachineMonitor {
    /// Create a monitor over the store, lock provider, and resolver.
    ///
    /// Job lookup, user lookup, and the outbound queue default to no-ops;
    /// attach them with the `with_*` builders.
    pub fn new(
        store: Arc<dyn LogStore>,
        locks: Arc<dyn LockProvider>,
        resolver: Arc<StatusResolver>,
        tuning: MonitorTuning,
    ) -> Self {
        let user_cache = TtlCache::new(tuning.user_cache_ttl);
        Self {
            store,
            locks,
            resolver,
            jobs: Arc::new(NoJobLookup),
            users: Arc::new(NoUserLookup),
            user_cache,
            outbound: None,
            tuning,
        }
    }

    /// Attach a job lookup for job attribution on opened intervals.
    pub fn with_job_lookup(mut self, jobs: Arc<dyn JobLookup>) -> Self {
        self.jobs = jobs;
        self
    }

    /// Attach a user lookup for operator name attribution.
    pub fn with_user_lookup(mut self, users: Arc<dyn UserLookup>) -> Self {
        self.users = users;
        self
    }

    /// Attach the outbound queue for post-commit side effects.
    pub fn with_outbound(mut self, outbound: OutboundSender) -> Self {
        self.outbound = Some(outbound);
        self
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Handle a raw signal event from a machine.
    ///
    /// Resolution happens before the lock is taken (it is a pure read), the
    /// rest of the protocol inside it.
    #[instrument(skip(self), fields(machine_id = %machine_id, signal = signal_pattern, source))]
    pub async fn handle_signal(
        &self,
        machine_id: Uuid,
        signal_pattern: &str,
        source: &str,
    ) -> Result<TransitionOutcome> {
        // 1. Load configuration; unknown machines are rejected up front.
        let config = self
            .resolver
            .machine_config(machine_id)
            .await?
            .ok_or_else(|| MonitorError::MachineNotFound {
                machine_id: machine_id.to_string(),
            })?;

        // 2. Resolve the signal against the machine's input table.
        let resolved = self.resolver.resolve_signal(&config, signal_pattern).ok_or_else(|| {
            MonitorError::SignalNotMapped {
                machine_id: machine_id.to_string(),
                signal: signal_pattern.trim().to_string(),
            }
        })?;

        // 3. Serialize against concurrent transitions for this machine.
        let Some(lease) = self
            .locks
            .acquire(
                &machine_lock_key(machine_id),
                self.tuning.lock_lease,
                self.tuning.lock_wait,
            )
            .await
        else {
            debug!("machine lock busy, signal superseded");
            return Ok(TransitionOutcome::Superseded);
        };

        let result = self
            .signal_locked(&config, resolved.status, resolved.color, source)
            .await;

        // The lock is released on every path, including store failures.
        self.locks.release(lease).await;
        result
    }

    /// Handle an operator-reported downtime with a free-text reason.
    ///
    /// Reasons found in the machine's downtime catalog are recorded under
    /// their canonical spelling; unrecognized reasons are kept verbatim and
    /// recorded as unmatched rather than rejected.
    #[instrument(skip(self, reason), fields(machine_id = %machine_id, source))]
    pub async fn handle_manual_downtime(
        &self,
        machine_id: Uuid,
        reason: &str,
        source: &str,
        user_id: Option<Uuid>,
    ) -> Result<TransitionOutcome> {
        // 1. Validate before touching any shared state.
        if reason.trim().is_empty() {
            return Err(MonitorError::ValidationError {
                field: "reason".to_string(),
                message: "downtime reason must not be empty".to_string(),
            });
        }

        let config = self
            .resolver
            .machine_config(machine_id)
            .await?
            .ok_or_else(|| MonitorError::MachineNotFound {
                machine_id: machine_id.to_string(),
            })?;

        // 2. Resolve against the downtime catalog; misses are kept, tagged
        //    unmatched.
        let resolved = self.resolver.resolve_manual_reason(&config, reason);
        let kind = if resolved.matched {
            IntervalKind::ManualDowntime
        } else {
            IntervalKind::UnmatchedOther
        };

        // 3. Serialize against concurrent transitions for this machine.
        let Some(lease) = self
            .locks
            .acquire(
                &machine_lock_key(machine_id),
                self.tuning.lock_lease,
                self.tuning.lock_wait,
            )
            .await
        else {
            debug!("machine lock busy, manual downtime superseded");
            return Ok(TransitionOutcome::Superseded);
        };

        let result = self
            .manual_locked(&config, resolved.status, resolved.color, kind, source, user_id)
            .await;

        self.locks.release(lease).await;
        result
    }

    /// Check whether a machine's heartbeat has timed out and, if so,
    /// transition it to offline.
    ///
    /// Called by the sweeper for candidate machines; the staleness check is
    /// repeated under the lock so a signal that arrived after the sweep
    /// cancels the transition.
    #[instrument(skip(self), fields(machine_id = %machine_id))]
    pub async fn check_offline(&self, machine_id: Uuid) -> Result<TransitionOutcome> {
        let config = self
            .resolver
            .machine_config(machine_id)
            .await?
            .ok_or_else(|| MonitorError::MachineNotFound {
                machine_id: machine_id.to_string(),
            })?;

        let Some(lease) = self
            .locks
            .acquire(
                &machine_lock_key(machine_id),
                self.tuning.lock_lease,
                self.tuning.lock_wait,
            )
            .await
        else {
            debug!("machine lock busy, offline check superseded");
            return Ok(TransitionOutcome::Superseded);
        };

        let result = self.offline_locked(&config).await;
        self.locks.release(lease).await;
        result
    }

    // =========================================================================
    // Locked protocol bodies
    // =========================================================================

    async fn signal_locked(
        &self,
        config: &MachineStatusConfig,
        status: String,
        color: String,
        source: &str,
    ) -> Result<TransitionOutcome> {
        let now = Utc::now();
        let open = self.store.open_intervals(config.machine_id).await?;

        // Manual downtime takes precedence: a signal never closes an
        // operator-entered interval. Any open offline intervals are still
        // reconciled away, the machine is demonstrably back.
        if let Some(manual) = newest_of_kind(&open, IntervalKind::is_manual) {
            let offline_ids = ids_of_kind(&open, IntervalKind::Offline);
            if !offline_ids.is_empty() {
                self.store
                    .apply_transition(&offline_ids, now, source, None)
                    .await?;
            }
            self.store.touch_heartbeat(manual.id, now).await?;
            debug!(interval_id = %manual.id, "signal suppressed by open manual downtime");
            return Ok(TransitionOutcome::Continuing);
        }

        // Idempotence: the same status on a single healthy open interval
        // only refreshes the heartbeat. Duplicate opens from an earlier
        // race fall through and get reconciled by a full transition.
        if let [current] = open.as_slice() {
            if current.kind == IntervalKind::SignalStatus && current.status == status {
                self.store.touch_heartbeat(current.id, now).await?;
                return Ok(TransitionOutcome::Continuing);
            }
        }

        let interval = self
            .build_interval(
                config,
                status,
                color,
                IntervalKind::SignalStatus,
                now,
                source,
                None,
            )
            .await;

        self.commit(&open, now, source, interval).await
    }

    async fn manual_locked(
        &self,
        config: &MachineStatusConfig,
        status: String,
        color: String,
        kind: IntervalKind,
        source: &str,
        user_id: Option<Uuid>,
    ) -> Result<TransitionOutcome> {
        let now = Utc::now();
        let open = self.store.open_intervals(config.machine_id).await?;

        // Re-reporting the same reason refreshes the open downtime instead
        // of fragmenting it.
        if let [current] = open.as_slice() {
            if current.kind == kind && current.status == status {
                self.store.touch_heartbeat(current.id, now).await?;
                return Ok(TransitionOutcome::Continuing);
            }
        }

        let interval = self
            .build_interval(config, status, color, kind, now, source, user_id)
            .await;

        self.commit(&open, now, source, interval).await
    }

    async fn offline_locked(&self, config: &MachineStatusConfig) -> Result<TransitionOutcome> {
        let now = Utc::now();
        let open = self.store.open_intervals(config.machine_id).await?;

        if open.is_empty() {
            // Never reported: unknown, not offline.
            return Ok(TransitionOutcome::Continuing);
        }
        if open.iter().all(|i| i.kind == IntervalKind::Offline) {
            return Ok(TransitionOutcome::Continuing);
        }

        // Re-check staleness under the lock. A signal that landed between
        // the sweep and this check refreshed the heartbeat.
        let cutoff = self.tuning.offline_cutoff(now);
        let freshest = open
            .iter()
            .filter(|i| i.kind != IntervalKind::Offline)
            .map(|i| i.last_heartbeat_at)
            .max();
        if matches!(freshest, Some(heartbeat) if heartbeat >= cutoff) {
            debug!("heartbeat refreshed since sweep, offline cancelled");
            return Ok(TransitionOutcome::Continuing);
        }

        info!("machine heartbeat timed out, transitioning to offline");
        let interval = IntervalRecord {
            id: Uuid::new_v4(),
            machine_id: config.machine_id,
            customer_id: config.customer_id,
            status: OFFLINE_STATUS.to_string(),
            color: OFFLINE_COLOR.to_string(),
            kind: IntervalKind::Offline,
            started_at: now,
            ended_at: None,
            job_id: None,
            source: OFFLINE_SOURCE.to_string(),
            user_id: None,
            user_name: None,
            last_heartbeat_at: now,
            closed_by: None,
        };

        // The previous intervals close at the exact instant the offline
        // interval opens, so offline never overlaps another kind.
        self.commit(&open, now, OFFLINE_SOURCE, interval).await
    }

    // =========================================================================
    // Shared steps
    // =========================================================================

    /// Build a new open interval, attributing the active job and operator
    /// on a best-effort basis. Collaborator failures degrade to missing
    /// attribution, never to a failed transition.
    async fn build_interval(
        &self,
        config: &MachineStatusConfig,
        status: String,
        color: String,
        kind: IntervalKind,
        now: DateTime<Utc>,
        source: &str,
        explicit_user: Option<Uuid>,
    ) -> IntervalRecord {
        let job = match self.jobs.active_job(&config.machine_name, now).await {
            Ok(job) => job,
            Err(err) => {
                warn!(error = %err, "job lookup failed, opening interval without job");
                None
            }
        };

        let user_id = explicit_user.or_else(|| job.as_ref().and_then(|j: &ActiveJob| j.operator_id));
        let user_name = match user_id {
            Some(id) => self.lookup_user(id).await.map(|u| u.name),
            None => None,
        };

        IntervalRecord {
            id: Uuid::new_v4(),
            machine_id: config.machine_id,
            customer_id: config.customer_id,
            status,
            color,
            kind,
            started_at: now,
            ended_at: None,
            job_id: job.map(|j| j.job_id),
            source: source.to_string(),
            user_id,
            user_name,
            last_heartbeat_at: now,
            closed_by: None,
        }
    }

    async fn lookup_user(&self, user_id: Uuid) -> Option<UserInfo> {
        if let Some(user) = self.user_cache.get(&user_id) {
            return Some(user);
        }
        match self.users.user(user_id).await {
            Ok(Some(user)) => {
                self.user_cache.insert(user_id, user.clone());
                Some(user)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "user lookup failed");
                None
            }
        }
    }

    /// Commit the close/open pair and enqueue post-commit side effects.
    async fn commit(
        &self,
        open: &[IntervalRecord],
        at: DateTime<Utc>,
        closed_by: &str,
        interval: IntervalRecord,
    ) -> Result<TransitionOutcome> {
        let close_ids: Vec<Uuid> = open.iter().map(|i| i.id).collect();
        self.store
            .apply_transition(&close_ids, at, closed_by, Some(&interval))
            .await?;

        info!(
            interval_id = %interval.id,
            status = interval.status,
            kind = interval.kind.as_str(),
            closed = close_ids.len(),
            "status transition committed"
        );

        let interval_id = interval.id;
        if let Some(outbound) = &self.outbound {
            outbound.enqueue(OutboundEvent::TransitionCommitted { interval });
        }
        Ok(TransitionOutcome::Transitioned { interval_id })
    }
}

fn newest_of_kind(
    open: &[IntervalRecord],
    predicate: impl Fn(&IntervalKind) -> bool,
) -> Option<&IntervalRecord> {
    open.iter()
        .filter(|i| predicate(&i.kind))
        .max_by_key(|i| i.started_at)
}

fn ids_of_kind(open: &[IntervalRecord], kind: IntervalKind) -> Vec<Uuid> {
    open.iter().filter(|i| i.kind == kind).map(|i| i.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLockProvider;
    use crate::persistence::MemoryLogStore;
    use crate::resolution::{InMemoryStatusConfig, SignalMapping};
    use chrono::Duration as ChronoDuration;

    fn make_config(machine_id: Uuid, customer_id: Uuid) -> MachineStatusConfig {
        MachineStatusConfig {
            machine_id,
            customer_id,
            machine_name: "CNC-01".to_string(),
            signal_mappings: vec![
                SignalMapping {
                    signal_pattern: "IN0=1".to_string(),
                    status: "Running".to_string(),
                    color: "#00B050".to_string(),
                },
                SignalMapping {
                    signal_pattern: "IN1=1".to_string(),
                    status: "Alarm".to_string(),
                    color: "#FF0000".to_string(),
                },
            ],
            downtime_reasons: vec!["Maintenance".to_string()],
        }
    }

    struct Fixture {
        monitor: MachineMonitor,
        store: Arc<MemoryLogStore>,
        machine_id: Uuid,
    }

    fn make_fixture(store: MemoryLogStore, machine_id: Uuid, tuning: MonitorTuning) -> Fixture {
        let store = Arc::new(store);
        let provider = Arc::new(
            InMemoryStatusConfig::new().with_machine(make_config(machine_id, Uuid::new_v4())),
        );
        let resolver = Arc::new(StatusResolver::new(provider, Duration::from_secs(60)));
        let monitor = MachineMonitor::new(
            store.clone(),
            Arc::new(LocalLockProvider::new()),
            resolver,
            tuning,
        );
        Fixture {
            monitor,
            store,
            machine_id,
        }
    }

    fn fixture() -> Fixture {
        make_fixture(MemoryLogStore::new(), Uuid::new_v4(), MonitorTuning::default())
    }

    #[tokio::test]
    async fn test_first_signal_opens_interval() {
        let fx = fixture();
        let outcome = fx
            .monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap();

        assert!(matches!(outcome, TransitionOutcome::Transitioned { .. }));
        let intervals = fx.store.all_intervals();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].status, "Running");
        assert_eq!(intervals[0].kind, IntervalKind::SignalStatus);
        assert!(intervals[0].ended_at.is_none());
    }

    #[tokio::test]
    async fn test_repeated_signal_is_idempotent() {
        let fx = fixture();
        fx.monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap();
        let first_heartbeat = fx.store.all_intervals()[0].last_heartbeat_at;

        let outcome = fx
            .monitor
            .handle_signal(fx.machine_id, "in0=1", "signal")
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Continuing);
        let intervals = fx.store.all_intervals();
        assert_eq!(intervals.len(), 1, "no duplicate interval opened");
        assert!(intervals[0].last_heartbeat_at >= first_heartbeat);
    }

    #[tokio::test]
    async fn test_status_change_closes_previous_without_gap() {
        let fx = fixture();
        fx.monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap();
        fx.monitor
            .handle_signal(fx.machine_id, "IN1=1", "signal")
            .await
            .unwrap();

        let intervals = fx.store.all_intervals();
        assert_eq!(intervals.len(), 2);
        let closed = intervals.iter().find(|i| i.ended_at.is_some()).unwrap();
        let open = intervals.iter().find(|i| i.ended_at.is_none()).unwrap();
        assert_eq!(closed.status, "Running");
        assert_eq!(open.status, "Alarm");
        // The close and the open share one timestamp: no overlap, no gap.
        assert_eq!(closed.ended_at, Some(open.started_at));
        assert_eq!(closed.closed_by.as_deref(), Some("signal"));
    }

    #[tokio::test]
    async fn test_unmapped_signal_is_rejected() {
        let fx = fixture();
        let err = fx
            .monitor
            .handle_signal(fx.machine_id, "IN9=1", "signal")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SIGNAL_NOT_MAPPED");
        assert!(fx.store.all_intervals().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_machine_is_rejected() {
        let fx = fixture();
        let err = fx
            .monitor
            .handle_signal(Uuid::new_v4(), "IN0=1", "signal")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MACHINE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_empty_reason_is_rejected() {
        let fx = fixture();
        let err = fx
            .monitor
            .handle_manual_downtime(fx.machine_id, "   ", "operator", None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_manual_downtime_overrides_signal_status() {
        let fx = fixture();
        fx.monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap();
        fx.monitor
            .handle_manual_downtime(fx.machine_id, "Maintenance", "operator", None)
            .await
            .unwrap();

        let open: Vec<_> = fx
            .store
            .all_intervals()
            .into_iter()
            .filter(|i| i.ended_at.is_none())
            .collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, IntervalKind::ManualDowntime);
        assert_eq!(open[0].status, "Maintenance");
    }

    #[tokio::test]
    async fn test_signal_does_not_close_manual_downtime() {
        let fx = fixture();
        fx.monitor
            .handle_manual_downtime(fx.machine_id, "Maintenance", "operator", None)
            .await
            .unwrap();

        let outcome = fx
            .monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Continuing);
        let open: Vec<_> = fx
            .store
            .all_intervals()
            .into_iter()
            .filter(|i| i.ended_at.is_none())
            .collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, IntervalKind::ManualDowntime);
    }

    #[tokio::test]
    async fn test_unmatched_reason_kept_verbatim() {
        let fx = fixture();
        fx.monitor
            .handle_manual_downtime(fx.machine_id, "Tool Change XYZ", "operator", None)
            .await
            .unwrap();

        let intervals = fx.store.all_intervals();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].kind, IntervalKind::UnmatchedOther);
        assert_eq!(intervals[0].status, "Tool Change XYZ");
    }

    #[tokio::test]
    async fn test_lock_busy_reports_superseded() {
        let fx = fixture();
        let locks = Arc::new(LocalLockProvider::new());
        let provider = Arc::new(
            InMemoryStatusConfig::new().with_machine(make_config(fx.machine_id, Uuid::new_v4())),
        );
        let resolver = Arc::new(StatusResolver::new(provider, Duration::from_secs(60)));
        let monitor = MachineMonitor::new(
            fx.store.clone(),
            locks.clone(),
            resolver,
            MonitorTuning {
                lock_wait: Duration::from_millis(50),
                ..MonitorTuning::default()
            },
        );

        // Hold the machine lock externally so the transition cannot get it.
        let lease = locks
            .acquire(
                &machine_lock_key(fx.machine_id),
                Duration::from_secs(10),
                Duration::from_millis(50),
            )
            .await
            .unwrap();

        let outcome = monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Superseded);
        assert!(fx.store.all_intervals().is_empty());

        locks.release(lease).await;
    }

    #[tokio::test]
    async fn test_offline_closes_running_at_same_instant() {
        let machine_id = Uuid::new_v4();
        let stale_at = Utc::now() - ChronoDuration::minutes(4);
        let running = IntervalRecord {
            id: Uuid::new_v4(),
            machine_id,
            customer_id: Uuid::new_v4(),
            status: "Running".to_string(),
            color: "#00B050".to_string(),
            kind: IntervalKind::SignalStatus,
            started_at: stale_at,
            ended_at: None,
            job_id: None,
            source: "signal".to_string(),
            user_id: None,
            user_name: None,
            last_heartbeat_at: stale_at,
            closed_by: None,
        };
        let fx = make_fixture(
            MemoryLogStore::new().with_interval(running),
            machine_id,
            MonitorTuning {
                heartbeat_ttl: Duration::from_secs(180),
                offline_grace: Duration::from_secs(30),
                ..MonitorTuning::default()
            },
        );

        let outcome = fx.monitor.check_offline(machine_id).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Transitioned { .. }));

        let intervals = fx.store.all_intervals();
        assert_eq!(intervals.len(), 2);
        let closed = intervals.iter().find(|i| i.ended_at.is_some()).unwrap();
        let offline = intervals.iter().find(|i| i.ended_at.is_none()).unwrap();
        assert_eq!(offline.kind, IntervalKind::Offline);
        assert_eq!(offline.status, OFFLINE_STATUS);
        assert_eq!(offline.color, "#000000");
        // Offline never overlaps the interval it supersedes.
        assert_eq!(closed.ended_at, Some(offline.started_at));
        assert_eq!(closed.closed_by.as_deref(), Some(OFFLINE_SOURCE));
    }

    #[tokio::test]
    async fn test_fresh_heartbeat_cancels_offline() {
        let machine_id = Uuid::new_v4();
        let now = Utc::now();
        let running = IntervalRecord {
            id: Uuid::new_v4(),
            machine_id,
            customer_id: Uuid::new_v4(),
            status: "Running".to_string(),
            color: "#00B050".to_string(),
            kind: IntervalKind::SignalStatus,
            started_at: now - ChronoDuration::minutes(10),
            ended_at: None,
            job_id: None,
            source: "signal".to_string(),
            user_id: None,
            user_name: None,
            last_heartbeat_at: now - ChronoDuration::seconds(5),
            closed_by: None,
        };
        let fx = make_fixture(
            MemoryLogStore::new().with_interval(running),
            machine_id,
            MonitorTuning::default(),
        );

        let outcome = fx.monitor.check_offline(machine_id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Continuing);
        assert_eq!(fx.store.all_intervals().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_check_without_intervals_is_noop() {
        let fx = fixture();
        let outcome = fx.monitor.check_offline(fx.machine_id).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Continuing);
        assert!(fx.store.all_intervals().is_empty());
    }

    #[tokio::test]
    async fn test_signal_closes_open_offline_interval() {
        let machine_id = Uuid::new_v4();
        let earlier = Utc::now() - ChronoDuration::minutes(2);
        let offline = IntervalRecord {
            id: Uuid::new_v4(),
            machine_id,
            customer_id: Uuid::new_v4(),
            status: OFFLINE_STATUS.to_string(),
            color: "#000000".to_string(),
            kind: IntervalKind::Offline,
            started_at: earlier,
            ended_at: None,
            job_id: None,
            source: OFFLINE_SOURCE.to_string(),
            user_id: None,
            user_name: None,
            last_heartbeat_at: earlier,
            closed_by: None,
        };
        let fx = make_fixture(
            MemoryLogStore::new().with_interval(offline),
            machine_id,
            MonitorTuning::default(),
        );

        fx.monitor
            .handle_signal(machine_id, "IN0=1", "signal")
            .await
            .unwrap();

        let intervals = fx.store.all_intervals();
        let open: Vec<_> = intervals.iter().filter(|i| i.ended_at.is_none()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, IntervalKind::SignalStatus);
        // The stale offline interval is closed, not left dangling.
        assert!(intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::Offline)
            .all(|i| i.ended_at.is_some()));
    }

    #[tokio::test]
    async fn test_duplicate_open_intervals_are_reconciled() {
        let machine_id = Uuid::new_v4();
        let earlier = Utc::now() - ChronoDuration::minutes(1);
        let make_open = |status: &str| IntervalRecord {
            id: Uuid::new_v4(),
            machine_id,
            customer_id: Uuid::new_v4(),
            status: status.to_string(),
            color: "#00B050".to_string(),
            kind: IntervalKind::SignalStatus,
            started_at: earlier,
            ended_at: None,
            job_id: None,
            source: "signal".to_string(),
            user_id: None,
            user_name: None,
            last_heartbeat_at: earlier,
            closed_by: None,
        };
        let fx = make_fixture(
            MemoryLogStore::new()
                .with_interval(make_open("Running"))
                .with_interval(make_open("Running")),
            machine_id,
            MonitorTuning::default(),
        );

        // Even though the status matches, duplicates force a full
        // transition that collapses them down to one open interval.
        let outcome = fx
            .monitor
            .handle_signal(machine_id, "IN0=1", "signal")
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Transitioned { .. }));

        let open: Vec<_> = fx
            .store
            .all_intervals()
            .into_iter()
            .filter(|i| i.ended_at.is_none())
            .collect();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn test_transition_failure_propagates_as_storage_error() {
        let fx = fixture();
        fx.store.set_fail_transitions(true);
        let err = fx
            .monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");

        // The lock must have been released despite the failure.
        fx.store.set_fail_transitions(false);
        let outcome = fx
            .monitor
            .handle_signal(fx.machine_id, "IN0=1", "signal")
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Transitioned { .. }));
    }
}
