//! Persistence interfaces and backends for fabwatch-core.
//!
//! This module defines the log store abstraction over machine status
//! intervals and the backend implementations.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryLogStore;
pub use self::postgres::PostgresLogStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::MonitorError;

/// Classification of a machine status interval.
///
/// The kind decides how the monitoring state machine treats the interval:
/// manual kinds take precedence over signal classification, and offline
/// intervals must never overlap any other kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntervalKind {
    /// Status resolved from a configured machine signal mapping.
    SignalStatus,
    /// Operator-reported downtime with a cataloged reason.
    ManualDowntime,
    /// Operator-reported downtime with a reason not in the catalog.
    UnmatchedOther,
    /// Machine heartbeat timed out.
    Offline,
}

impl IntervalKind {
    /// Database enum string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignalStatus => "signal-status",
            Self::ManualDowntime => "manual-downtime",
            Self::UnmatchedOther => "unmatched-other",
            Self::Offline => "offline",
        }
    }

    /// Parse a database enum string; unknown strings map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signal-status" => Some(Self::SignalStatus),
            "manual-downtime" => Some(Self::ManualDowntime),
            "unmatched-other" => Some(Self::UnmatchedOther),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }

    /// Whether intervals of this kind count as downtime in breakdowns.
    pub fn is_downtime(&self) -> bool {
        matches!(self, Self::ManualDowntime | Self::UnmatchedOther)
    }

    /// Whether intervals of this kind are operator-entered and therefore
    /// override automatic signal classification.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::ManualDowntime | Self::UnmatchedOther)
    }
}

/// One continuous period during which a machine held one status.
///
/// Intervals are the authoritative record; all derived metrics are
/// recomputed from them on demand. An interval with `ended_at == None` is
/// open and represents the machine's current state.
#[derive(Debug, Clone)]
pub struct IntervalRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Machine this interval belongs to.
    pub machine_id: Uuid,
    /// Tenant that owns the machine.
    pub customer_id: Uuid,
    /// Canonical status name (or the raw reason for unmatched downtime).
    pub status: String,
    /// Display color assigned by the resolution engine.
    pub color: String,
    /// Interval classification.
    pub kind: IntervalKind,
    /// When the machine entered this status.
    pub started_at: DateTime<Utc>,
    /// When the machine left this status; `None` while the interval is open.
    pub ended_at: Option<DateTime<Utc>>,
    /// Active job at the time the interval opened, if any.
    pub job_id: Option<String>,
    /// Origin tag of the event that opened the interval.
    pub source: String,
    /// Operator attribution, if known.
    pub user_id: Option<Uuid>,
    /// Resolved operator name, if known.
    pub user_name: Option<String>,
    /// Last time an identical event refreshed this interval.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Origin tag of the event that closed the interval.
    pub closed_by: Option<String>,
}

impl IntervalRecord {
    /// Duration of the interval clipped to a window, in whole seconds.
    ///
    /// Open intervals are treated as extending to the window end. Returns
    /// zero when the interval does not intersect the window.
    pub fn clipped_seconds(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> i64 {
        let start = self.started_at.max(window_start);
        let end = self.ended_at.unwrap_or(window_end).min(window_end);
        (end - start).num_seconds().max(0)
    }
}

/// Durable store of machine status intervals.
///
/// The store is the single source of truth. `apply_transition` must commit
/// its closes and the optional insert as one atomic unit; a failure rolls
/// the whole transition back so partial state (closed-but-not-reopened) is
/// never observable.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// All currently-open intervals for a machine.
    ///
    /// May return more than one entry when a prior race left duplicates;
    /// the state machine reconciles them on the next transition.
    async fn open_intervals(&self, machine_id: Uuid) -> Result<Vec<IntervalRecord>, MonitorError>;

    /// The most recently opened still-open interval, if any.
    async fn last_open_interval(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<IntervalRecord>, MonitorError>;

    /// Intervals intersecting `[from, to)`, ordered by start time.
    async fn intervals_in_range(
        &self,
        machine_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IntervalRecord>, MonitorError>;

    /// Downtime intervals intersecting `[from, to)`, optionally filtered
    /// by job, ordered by start time.
    async fn downtime_intervals_in_range(
        &self,
        machine_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        job_id: Option<&str>,
    ) -> Result<Vec<IntervalRecord>, MonitorError>;

    /// Atomically close the given intervals and optionally open a new one.
    ///
    /// Closing sets `ended_at` to `at` clamped to the interval's start (so
    /// `started_at <= ended_at` always holds) and records `closed_by`.
    /// Intervals that already have an end timestamp are left untouched;
    /// ends are never rolled back.
    async fn apply_transition(
        &self,
        close_ids: &[Uuid],
        at: DateTime<Utc>,
        closed_by: &str,
        open: Option<&IntervalRecord>,
    ) -> Result<(), MonitorError>;

    /// Refresh the heartbeat timestamp of an open interval.
    async fn touch_heartbeat(
        &self,
        interval_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError>;

    /// Machines with at least one open non-offline interval whose heartbeat
    /// is older than `cutoff`. Feeds the offline sweeper.
    async fn stale_machines(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, MonitorError>;
}
