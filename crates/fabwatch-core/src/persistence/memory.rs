// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory log store backend.
//!
//! Keeps all intervals in a mutex-guarded vector. Used by the test suites
//! and for embedding fabwatch-core without a database.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{IntervalRecord, LogStore};
use crate::error::MonitorError;

/// In-memory [`LogStore`] implementation.
#[derive(Default)]
pub struct MemoryLogStore {
    intervals: Mutex<Vec<IntervalRecord>>,
    fail_transitions: Mutex<bool>,
}

impl MemoryLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an interval (test setup helper).
    pub fn with_interval(self, interval: IntervalRecord) -> Self {
        self.intervals.lock().unwrap().push(interval);
        self
    }

    /// Make subsequent `apply_transition` calls fail, to exercise rollback
    /// behavior in tests.
    pub fn set_fail_transitions(&self, fail: bool) {
        *self.fail_transitions.lock().unwrap() = fail;
    }

    /// Snapshot of every interval ever stored, ordered by start time.
    pub fn all_intervals(&self) -> Vec<IntervalRecord> {
        let mut all = self.intervals.lock().unwrap().clone();
        all.sort_by_key(|i| i.started_at);
        all
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn open_intervals(&self, machine_id: Uuid) -> Result<Vec<IntervalRecord>, MonitorError> {
        Ok(self
            .intervals
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.machine_id == machine_id && i.ended_at.is_none())
            .cloned()
            .collect())
    }

    async fn last_open_interval(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<IntervalRecord>, MonitorError> {
        Ok(self
            .intervals
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.machine_id == machine_id && i.ended_at.is_none())
            .max_by_key(|i| i.started_at)
            .cloned())
    }

    async fn intervals_in_range(
        &self,
        machine_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IntervalRecord>, MonitorError> {
        let mut result: Vec<IntervalRecord> = self
            .intervals
            .lock()
            .unwrap()
            .iter()
            .filter(|i| {
                i.machine_id == machine_id
                    && i.started_at < to
                    && i.ended_at.map(|e| e > from).unwrap_or(true)
            })
            .cloned()
            .collect();
        result.sort_by_key(|i| i.started_at);
        Ok(result)
    }

    async fn downtime_intervals_in_range(
        &self,
        machine_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        job_id: Option<&str>,
    ) -> Result<Vec<IntervalRecord>, MonitorError> {
        let all = self.intervals_in_range(machine_id, from, to).await?;
        Ok(all
            .into_iter()
            .filter(|i| i.kind.is_downtime())
            .filter(|i| match job_id {
                Some(job) => i.job_id.as_deref() == Some(job),
                None => true,
            })
            .collect())
    }

    async fn apply_transition(
        &self,
        close_ids: &[Uuid],
        at: DateTime<Utc>,
        closed_by: &str,
        open: Option<&IntervalRecord>,
    ) -> Result<(), MonitorError> {
        if *self.fail_transitions.lock().unwrap() {
            return Err(MonitorError::StorageError {
                operation: "apply_transition".to_string(),
                details: "injected failure".to_string(),
            });
        }

        let mut intervals = self.intervals.lock().unwrap();
        for interval in intervals.iter_mut() {
            // Ends are never rolled back once set.
            if close_ids.contains(&interval.id) && interval.ended_at.is_none() {
                interval.ended_at = Some(at.max(interval.started_at));
                interval.closed_by = Some(closed_by.to_string());
            }
        }
        if let Some(new_interval) = open {
            intervals.push(new_interval.clone());
        }
        Ok(())
    }

    async fn touch_heartbeat(
        &self,
        interval_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let mut intervals = self.intervals.lock().unwrap();
        if let Some(interval) = intervals
            .iter_mut()
            .find(|i| i.id == interval_id && i.ended_at.is_none())
        {
            interval.last_heartbeat_at = interval.last_heartbeat_at.max(at);
        }
        Ok(())
    }

    async fn stale_machines(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, MonitorError> {
        let intervals = self.intervals.lock().unwrap();
        let mut machines: Vec<Uuid> = intervals
            .iter()
            .filter(|i| {
                i.ended_at.is_none()
                    && i.kind != super::IntervalKind::Offline
                    && i.last_heartbeat_at < cutoff
            })
            .map(|i| i.machine_id)
            .collect();
        machines.sort();
        machines.dedup();
        machines.truncate(limit as usize);
        Ok(machines)
    }
}
