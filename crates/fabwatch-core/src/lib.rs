// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FabWatch Core - Machine Monitoring Engine
//!
//! This crate provides the monitoring backbone for factory machines. It turns
//! raw machine signals, operator-reported downtime, and heartbeat timeouts
//! into a continuous, non-overlapping timeline of status intervals persisted
//! in PostgreSQL, and derives downtime, utilization, and OEE metrics from
//! that timeline on demand.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Signal Sources                                    │
//! │         (edge gateways, operator terminals, offline sweeper)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MachineMonitor                                    │
//! │   lock machine ─► read open intervals ─► resolve ─► close/open pair     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                        │                        │
//!           ▼                        ▼                        ▼
//! ┌───────────────────┐   ┌────────────────────┐   ┌──────────────────────┐
//! │   LockProvider    │   │      LogStore      │   │    OutboundSender    │
//! │ per-machine lease │   │    (PostgreSQL)    │   │ cache + alerts, post │
//! └───────────────────┘   └────────────────────┘   │       commit         │
//!                                    │             └──────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              metrics / summary (derived, recomputed on read)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`monitor`] | The transition state machine; all status changes go through it |
//! | [`persistence`] | [`persistence::LogStore`] trait plus Postgres and in-memory backends |
//! | [`resolution`] | Signal and downtime-reason resolution against per-machine config |
//! | [`lock`] | Per-machine time-bounded lease locks |
//! | [`metrics`] | Status percentages, downtime breakdowns, OEE |
//! | [`summary`] | Fleet status classification and counting |
//! | [`outbound`] | Post-commit queue: cache invalidation, snapshots, alerts |
//! | [`cache`] | TTL caches for configuration and derived aggregates |
//! | [`collaborators`] | Job, user, and alert service contracts |
//! | [`runtime`] | Embeddable runtime wiring it all together |
//! | [`config`] | Environment-based configuration |
//!
//! # Interval Semantics
//!
//! Intervals are the single source of truth. At most one interval per
//! machine is open at any time; a transition closes the open ones and opens
//! the successor at the same timestamp, so the timeline has no gaps and no
//! overlaps. Metrics are never stored, they are recomputed from intervals
//! inside the query window.
//!
//! ```text
//!   signal "IN0=1"      signal "IN1=1"       heartbeat timeout
//!        │                    │                     │
//!        ▼                    ▼                     ▼
//!   ├── Running ─────────┤├── Alarm ───────────┤├── Offline ── ▶ open
//! ```

#![deny(missing_docs)]

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod monitor;
pub mod outbound;
pub mod persistence;
pub mod resolution;
pub mod runtime;
pub mod summary;
