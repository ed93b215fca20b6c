// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Narrow contracts for the services the core consumes.
//!
//! Job lookup, user lookup, and alert dispatch live outside the core; the
//! state machine only depends on these traits. No-op implementations are
//! provided for embedding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::MonitorError;
use crate::persistence::IntervalRecord;

/// Job active on a machine at a point in time.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    /// Job identifier carried onto opened intervals.
    pub job_id: String,
    /// Operator assigned to the job, if any.
    pub operator_id: Option<Uuid>,
    /// Main program running for the job, if known.
    pub main_program: Option<String>,
}

/// Minimal user record for operator attribution.
#[derive(Debug, Clone)]
pub struct UserInfo {
    /// Display name.
    pub name: String,
}

/// Context handed to the alert sink after a committed transition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertContext {
    /// Tenant that owns the machine.
    pub customer_id: Uuid,
    /// Machine the transition happened on.
    pub machine_id: Uuid,
    /// Status of the newly opened interval.
    pub status: String,
    /// Kind string of the newly opened interval.
    pub kind: String,
    /// When the transition committed.
    pub at: DateTime<Utc>,
}

impl AlertContext {
    /// Build an alert context from a freshly opened interval.
    pub fn from_interval(interval: &IntervalRecord) -> Self {
        Self {
            customer_id: interval.customer_id,
            machine_id: interval.machine_id,
            status: interval.status.clone(),
            kind: interval.kind.as_str().to_string(),
            at: interval.started_at,
        }
    }
}

/// Looks up the job running on a machine.
#[async_trait]
pub trait JobLookup: Send + Sync {
    /// The job active on `machine_name` at `at`, if any.
    async fn active_job(
        &self,
        machine_name: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ActiveJob>, MonitorError>;
}

/// Resolves user ids to names for operator attribution.
#[async_trait]
pub trait UserLookup: Send + Sync {
    /// The user with the given id, if known.
    async fn user(&self, user_id: Uuid) -> Result<Option<UserInfo>, MonitorError>;
}

/// Receives committed transitions for alert rule evaluation.
///
/// Fire-and-forget from the core's perspective: a failure is logged by the
/// outbound worker and never retried against the committed transition.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Evaluate rules for a committed transition and fan out notifications.
    async fn notify(&self, context: AlertContext) -> Result<(), MonitorError>;
}

/// [`JobLookup`] that reports no active jobs.
pub struct NoJobLookup;

#[async_trait]
impl JobLookup for NoJobLookup {
    async fn active_job(
        &self,
        _machine_name: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<ActiveJob>, MonitorError> {
        Ok(None)
    }
}

/// [`UserLookup`] that knows no users.
pub struct NoUserLookup;

#[async_trait]
impl UserLookup for NoUserLookup {
    async fn user(&self, _user_id: Uuid) -> Result<Option<UserInfo>, MonitorError> {
        Ok(None)
    }
}

/// [`AlertSink`] that drops every notification.
pub struct NoAlertSink;

#[async_trait]
impl AlertSink for NoAlertSink {
    async fn notify(&self, _context: AlertContext) -> Result<(), MonitorError> {
        Ok(())
    }
}
