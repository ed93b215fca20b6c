// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for the monitoring integration tests.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use fabwatch_core::lock::LocalLockProvider;
use fabwatch_core::monitor::{MachineMonitor, MonitorTuning};
use fabwatch_core::persistence::MemoryLogStore;
use fabwatch_core::resolution::{
    InMemoryStatusConfig, MachineStatusConfig, SignalMapping, StatusResolver,
};

/// One machine wired up against in-memory backends.
pub struct TestContext {
    pub monitor: Arc<MachineMonitor>,
    pub store: Arc<MemoryLogStore>,
    pub machine_id: Uuid,
    pub customer_id: Uuid,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_store_and_tuning(MemoryLogStore::new(), MonitorTuning::default())
    }

    pub fn with_store_and_tuning(store: MemoryLogStore, tuning: MonitorTuning) -> Self {
        let machine_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let store = Arc::new(store);

        let provider = Arc::new(InMemoryStatusConfig::new().with_machine(MachineStatusConfig {
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
                SignalMapping {
                    signal_pattern: "IN2=1".to_string(),
                    status: "Setup".to_string(),
                    color: "#FFD700".to_string(),
                },
            ],
            downtime_reasons: vec!["Maintenance".to_string(), "No Material".to_string()],
        }));
        let resolver = Arc::new(StatusResolver::new(provider, Duration::from_secs(60)));

        let monitor = Arc::new(MachineMonitor::new(
            store.clone(),
            Arc::new(LocalLockProvider::new()),
            resolver,
            tuning,
        ));

        Self {
            monitor,
            store,
            machine_id,
            customer_id,
        }
    }

    /// Open (unended) intervals for the context machine.
    pub fn open_intervals(&self) -> Vec<fabwatch_core::persistence::IntervalRecord> {
        self.store
            .all_intervals()
            .into_iter()
            .filter(|i| i.machine_id == self.machine_id && i.ended_at.is_none())
            .collect()
    }
}
