// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Post-commit side effects.
//!
//! Committed transitions enqueue an event here; a small worker pool drains
//! the queue and performs the best-effort follow-up work (cache
//! invalidation, summary snapshot publication, alert notification). The
//! queue is bounded so side-effect pressure is observable instead of
//! accumulating unbounded spawned tasks. Events are at-most-once: a failed
//! side effect is logged, never retried against the committed transition.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::SummaryCache;
use crate::collaborators::{AlertContext, AlertSink};
use crate::persistence::{IntervalRecord, LogStore};
use crate::summary::{summary_cache_key, MachineStatusKind};

/// Event emitted after a transition commits.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// A new interval was opened (and any superseded ones closed).
    TransitionCommitted {
        /// The freshly opened interval.
        interval: IntervalRecord,
    },
}

/// Sending half of the outbound queue.
///
/// `enqueue` never blocks the caller: when the queue is full the event is
/// dropped with a warning. Transitions are already durable at this point,
/// so dropping only delays derived data, it loses nothing authoritative.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundEvent>,
}

impl OutboundSender {
    /// Enqueue an event, best-effort.
    pub fn enqueue(&self, event: OutboundEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!(error = %err, "outbound queue full, dropping post-commit event");
        }
    }
}

/// Create the bounded outbound queue.
pub fn outbound_channel(capacity: usize) -> (OutboundSender, mpsc::Receiver<OutboundEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutboundSender { tx }, rx)
}

/// Snapshot payload published to the summary cache per machine.
#[derive(Debug, Serialize)]
struct MachineSnapshot<'a> {
    status: &'a str,
    color: &'a str,
    kind: MachineStatusKind,
}

/// Drains the outbound queue and runs the post-commit side effects.
pub struct OutboundWorker {
    store: Arc<dyn LogStore>,
    cache: Arc<dyn SummaryCache>,
    alerts: Arc<dyn AlertSink>,
    snapshot_ttl: Duration,
}

impl OutboundWorker {
    /// Create a worker over the shared collaborators.
    pub fn new(
        store: Arc<dyn LogStore>,
        cache: Arc<dyn SummaryCache>,
        alerts: Arc<dyn AlertSink>,
        snapshot_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            alerts,
            snapshot_ttl,
        }
    }

    /// Process one event. Side effects are isolated: one failure never
    /// blocks the others.
    pub async fn process(&self, event: OutboundEvent) {
        match event {
            OutboundEvent::TransitionCommitted { interval } => {
                self.cache
                    .invalidate_prefix(&summary_cache_key(interval.customer_id))
                    .await;

                if let Err(err) = self.publish_snapshot(&interval).await {
                    warn!(
                        machine_id = %interval.machine_id,
                        error = %err,
                        "failed to publish status snapshot"
                    );
                }

                if let Err(err) = self.alerts.notify(AlertContext::from_interval(&interval)).await
                {
                    warn!(
                        machine_id = %interval.machine_id,
                        error = %err,
                        "alert notification failed"
                    );
                }
            }
        }
    }

    async fn publish_snapshot(&self, interval: &IntervalRecord) -> Result<(), crate::error::MonitorError> {
        // Re-read rather than trusting the event payload: a later
        // transition may already have superseded it.
        let current = self.store.last_open_interval(interval.machine_id).await?;
        let snapshot = MachineSnapshot {
            status: current.as_ref().map(|i| i.status.as_str()).unwrap_or(""),
            color: current.as_ref().map(|i| i.color.as_str()).unwrap_or(""),
            kind: MachineStatusKind::classify(current.as_ref()),
        };
        let key = format!(
            "{}:machine:{}",
            summary_cache_key(interval.customer_id),
            interval.machine_id
        );
        self.cache
            .set(&key, serde_json::to_string(&snapshot)?, self.snapshot_ttl)
            .await;
        Ok(())
    }
}

/// Spawn `count` workers draining a shared receiver until shutdown.
pub fn spawn_workers(
    count: usize,
    worker: Arc<OutboundWorker>,
    rx: mpsc::Receiver<OutboundEvent>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker_index| {
            let worker = worker.clone();
            let rx = rx.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let event = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;

                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    break;
                                }
                                continue;
                            }

                            event = rx.recv() => event,
                        }
                    };
                    match event {
                        Some(event) => worker.process(event).await,
                        None => break,
                    }
                }
                debug!(worker_index, "outbound worker stopped");
            })
        })
        .collect()
}
