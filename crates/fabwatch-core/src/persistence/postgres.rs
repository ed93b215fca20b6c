// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL log store backend.
//!
//! Provides durable storage for machine status intervals and the
//! configuration tables consumed by the resolution engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{IntervalKind, IntervalRecord, LogStore};
use crate::error::MonitorError;
use crate::resolution::{MachineStatusConfig, SignalMapping, StatusConfigProvider};

/// PostgreSQL-backed [`LogStore`] implementation.
#[derive(Clone)]
pub struct PostgresLogStore {
    pool: PgPool,
}

impl PostgresLogStore {
    /// Create a new Postgres-backed log store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw row shape for `machine_status_logs`.
#[derive(sqlx::FromRow)]
struct IntervalRow {
    id: Uuid,
    machine_id: Uuid,
    customer_id: Uuid,
    status: String,
    color: String,
    kind: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    job_id: Option<String>,
    source: String,
    user_id: Option<Uuid>,
    user_name: Option<String>,
    last_heartbeat_at: DateTime<Utc>,
    closed_by: Option<String>,
}

impl IntervalRow {
    fn into_record(self) -> Result<IntervalRecord, MonitorError> {
        let kind = IntervalKind::parse(&self.kind).ok_or_else(|| MonitorError::StorageError {
            operation: "decode".to_string(),
            details: format!("unknown interval kind '{}'", self.kind),
        })?;
        Ok(IntervalRecord {
            id: self.id,
            machine_id: self.machine_id,
            customer_id: self.customer_id,
            status: self.status,
            color: self.color,
            kind,
            started_at: self.started_at,
            ended_at: self.ended_at,
            job_id: self.job_id,
            source: self.source,
            user_id: self.user_id,
            user_name: self.user_name,
            last_heartbeat_at: self.last_heartbeat_at,
            closed_by: self.closed_by,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, machine_id, customer_id, status, color, kind,
           started_at, ended_at, job_id, source, user_id, user_name,
           last_heartbeat_at, closed_by
    FROM machine_status_logs
"#;

fn rows_to_records(rows: Vec<IntervalRow>) -> Result<Vec<IntervalRecord>, MonitorError> {
    rows.into_iter().map(IntervalRow::into_record).collect()
}

#[async_trait]
impl LogStore for PostgresLogStore {
    async fn open_intervals(&self, machine_id: Uuid) -> Result<Vec<IntervalRecord>, MonitorError> {
        let rows = sqlx::query_as::<_, IntervalRow>(&format!(
            "{SELECT_COLUMNS} WHERE machine_id = $1 AND ended_at IS NULL ORDER BY started_at"
        ))
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_records(rows)
    }

    async fn last_open_interval(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<IntervalRecord>, MonitorError> {
        let row = sqlx::query_as::<_, IntervalRow>(&format!(
            "{SELECT_COLUMNS} WHERE machine_id = $1 AND ended_at IS NULL ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IntervalRow::into_record).transpose()
    }

    async fn intervals_in_range(
        &self,
        machine_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<IntervalRecord>, MonitorError> {
        let rows = sqlx::query_as::<_, IntervalRow>(&format!(
            r#"{SELECT_COLUMNS}
            WHERE machine_id = $1
              AND started_at < $3
              AND (ended_at IS NULL OR ended_at > $2)
            ORDER BY started_at"#
        ))
        .bind(machine_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows_to_records(rows)
    }

    async fn downtime_intervals_in_range(
        &self,
        machine_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        job_id: Option<&str>,
    ) -> Result<Vec<IntervalRecord>, MonitorError> {
        let rows = sqlx::query_as::<_, IntervalRow>(&format!(
            r#"{SELECT_COLUMNS}
            WHERE machine_id = $1
              AND kind IN ('manual-downtime', 'unmatched-other')
              AND started_at < $3
              AND (ended_at IS NULL OR ended_at > $2)
              AND ($4::text IS NULL OR job_id = $4)
            ORDER BY started_at"#
        ))
        .bind(machine_id)
        .bind(from)
        .bind(to)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_records(rows)
    }

    async fn apply_transition(
        &self,
        close_ids: &[Uuid],
        at: DateTime<Utc>,
        closed_by: &str,
        open: Option<&IntervalRecord>,
    ) -> Result<(), MonitorError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            MonitorError::StorageError {
                operation: "apply_transition".to_string(),
                details: e.to_string(),
            }
        })?;

        if !close_ids.is_empty() {
            // GREATEST keeps started_at <= ended_at; the ended_at IS NULL
            // guard keeps ends from ever being rolled back.
            sqlx::query(
                r#"
                UPDATE machine_status_logs
                SET ended_at = GREATEST($2, started_at), closed_by = $3
                WHERE id = ANY($1) AND ended_at IS NULL
                "#,
            )
            .bind(close_ids)
            .bind(at)
            .bind(closed_by)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(interval) = open {
            sqlx::query(
                r#"
                INSERT INTO machine_status_logs
                    (id, machine_id, customer_id, status, color, kind,
                     started_at, ended_at, job_id, source, user_id, user_name,
                     last_heartbeat_at, closed_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(interval.id)
            .bind(interval.machine_id)
            .bind(interval.customer_id)
            .bind(&interval.status)
            .bind(&interval.color)
            .bind(interval.kind.as_str())
            .bind(interval.started_at)
            .bind(interval.ended_at)
            .bind(&interval.job_id)
            .bind(&interval.source)
            .bind(interval.user_id)
            .bind(&interval.user_name)
            .bind(interval.last_heartbeat_at)
            .bind(&interval.closed_by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(|e| MonitorError::StorageError {
            operation: "apply_transition".to_string(),
            details: e.to_string(),
        })?;

        Ok(())
    }

    async fn touch_heartbeat(
        &self,
        interval_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        sqlx::query(
            r#"
            UPDATE machine_status_logs
            SET last_heartbeat_at = GREATEST(last_heartbeat_at, $2)
            WHERE id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(interval_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stale_machines(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, MonitorError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT machine_id
            FROM machine_status_logs
            WHERE ended_at IS NULL
              AND kind <> 'offline'
              AND last_heartbeat_at < $1
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

// ============================================================================
// Status Configuration
// ============================================================================

/// PostgreSQL-backed [`StatusConfigProvider`].
///
/// Reads the `machines`, `machine_status_mappings`, and
/// `machine_downtime_reasons` tables. These are external input to the core:
/// read-only, and cached by the resolution engine with a bounded TTL.
#[derive(Clone)]
pub struct PostgresStatusConfig {
    pool: PgPool,
}

impl PostgresStatusConfig {
    /// Create a new Postgres-backed configuration provider.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MachineRow {
    machine_id: Uuid,
    customer_id: Uuid,
    name: String,
}

#[async_trait]
impl StatusConfigProvider for PostgresStatusConfig {
    async fn machine_config(
        &self,
        machine_id: Uuid,
    ) -> Result<Option<MachineStatusConfig>, MonitorError> {
        let machine = sqlx::query_as::<_, MachineRow>(
            r#"
            SELECT machine_id, customer_id, name
            FROM machines
            WHERE machine_id = $1
            "#,
        )
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(machine) = machine else {
            return Ok(None);
        };

        let mappings: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT signal_pattern, status, color
            FROM machine_status_mappings
            WHERE machine_id = $1
            "#,
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;

        let reasons: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT reason
            FROM machine_downtime_reasons
            WHERE machine_id = $1
            "#,
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(MachineStatusConfig {
            machine_id: machine.machine_id,
            customer_id: machine.customer_id,
            machine_name: machine.name,
            signal_mappings: mappings
                .into_iter()
                .map(|(signal_pattern, status, color)| SignalMapping {
                    signal_pattern,
                    status,
                    color,
                })
                .collect(),
            downtime_reasons: reasons.into_iter().map(|(r,)| r).collect(),
        }))
    }
}
