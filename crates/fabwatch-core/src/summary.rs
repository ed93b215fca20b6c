// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet status summaries.
//!
//! Reduces each machine's open interval to a fixed status set and counts
//! machines per status. Snapshots are published to the summary cache by the
//! outbound worker; they are derived data, never authoritative.

use serde::{Deserialize, Serialize};

use crate::persistence::{IntervalKind, IntervalRecord};

/// Fixed status classification of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineStatusKind {
    /// Machine is producing (green signal status).
    Online,
    /// Machine heartbeat timed out.
    Offline,
    /// Machine reports a warning-colored status.
    Warning,
    /// Machine reports an alarm/error-colored status.
    Error,
    /// Operator-reported downtime.
    DownTime,
    /// Recognized but unclassifiable status.
    Other,
    /// No open interval for the machine.
    Unknown,
}

impl MachineStatusKind {
    /// Classify a machine from its current open interval.
    ///
    /// `None` means the machine has never reported (or all intervals are
    /// closed), which is distinct from Offline.
    pub fn classify(open_interval: Option<&IntervalRecord>) -> Self {
        let Some(interval) = open_interval else {
            return Self::Unknown;
        };
        match interval.kind {
            IntervalKind::Offline => Self::Offline,
            IntervalKind::ManualDowntime | IntervalKind::UnmatchedOther => Self::DownTime,
            IntervalKind::SignalStatus => match interval.color.to_uppercase().as_str() {
                "#00B050" | "#00FF00" | "#008000" => Self::Online,
                "#FF0000" | "#B00000" => Self::Error,
                "#FFD700" | "#FF8C00" | "#FFFF00" => Self::Warning,
                "#000000" => Self::Offline,
                _ => Self::Other,
            },
        }
    }
}

/// Machine counts per status for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Machines currently producing.
    pub online: u32,
    /// Machines with a timed-out heartbeat.
    pub offline: u32,
    /// Machines in a warning status.
    pub warning: u32,
    /// Machines in an error status.
    pub error: u32,
    /// Machines in operator-reported downtime.
    pub down_time: u32,
    /// Machines in an unclassifiable status.
    pub other: u32,
    /// Machines with no open interval.
    pub unknown: u32,
}

impl StatusSummary {
    /// Count one machine.
    pub fn add(&mut self, kind: MachineStatusKind) {
        match kind {
            MachineStatusKind::Online => self.online += 1,
            MachineStatusKind::Offline => self.offline += 1,
            MachineStatusKind::Warning => self.warning += 1,
            MachineStatusKind::Error => self.error += 1,
            MachineStatusKind::DownTime => self.down_time += 1,
            MachineStatusKind::Other => self.other += 1,
            MachineStatusKind::Unknown => self.unknown += 1,
        }
    }

    /// Total machines counted.
    pub fn total(&self) -> u32 {
        self.online
            + self.offline
            + self.warning
            + self.error
            + self.down_time
            + self.other
            + self.unknown
    }
}

/// Reduce a set of machines' open intervals into a summary.
///
/// Each element is one machine's most recent open interval (`None` for
/// machines that have never reported).
pub fn summarize<'a, I>(open_intervals: I) -> StatusSummary
where
    I: IntoIterator<Item = Option<&'a IntervalRecord>>,
{
    let mut summary = StatusSummary::default();
    for interval in open_intervals {
        summary.add(MachineStatusKind::classify(interval));
    }
    summary
}

/// Cache key for a tenant's status summary snapshot.
pub fn summary_cache_key(customer_id: uuid::Uuid) -> String {
    format!("summary:{customer_id}")
}
