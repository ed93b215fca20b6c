// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Downtime, utilization, and OEE calculators.
//!
//! Pure functions over interval sets. Intervals are the source of truth;
//! everything here is recomputed on demand and never stored back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::MonitorError;
use crate::persistence::{IntervalKind, IntervalRecord};

/// Bucket name for window time not covered by any interval.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Color of the uncategorized bucket.
pub const UNCATEGORIZED_COLOR: &str = "#D3D3D3";

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Window start (inclusive).
    pub start: DateTime<Utc>,
    /// Window end (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, rejecting empty or inverted ranges.
    ///
    /// The calculators attribute time in whole seconds, so a window shorter
    /// than one second is rejected as well: it would truncate every segment
    /// to zero and leave nothing to allocate percentages over.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, MonitorError> {
        if end <= start {
            return Err(MonitorError::ValidationError {
                field: "window".to_string(),
                message: "window end must be after window start".to_string(),
            });
        }
        if (end - start).num_seconds() == 0 {
            return Err(MonitorError::ValidationError {
                field: "window".to_string(),
                message: "window must span at least one second".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Window length in whole seconds.
    pub fn seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

/// Time attributed to one status within a window.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSlice {
    /// Seconds the machine held this status inside the window.
    pub seconds: i64,
    /// Share of the window, 0-100 at two decimals.
    pub percent: f64,
    /// Display color of the status.
    pub color: String,
}

/// Per-status time allocation over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPercentages {
    /// Status name to slice. Percentages sum to exactly 100.00.
    pub per_status: BTreeMap<String, StatusSlice>,
    /// Sum of percentages excluding Offline and Uncategorized buckets.
    pub total_utilization: f64,
}

/// Downtime attributed to one reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasonDowntime {
    /// Seconds of downtime for this reason inside the window.
    pub seconds: i64,
    /// Share of total downtime, 0-100 at two decimals.
    pub percent_of_downtime: f64,
    /// Display color of the reason.
    pub color: String,
}

/// Consolidated downtime breakdown over a window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DowntimeBreakdown {
    /// Total downtime seconds inside the window.
    pub total_seconds: i64,
    /// Per-reason breakdown.
    pub per_reason: BTreeMap<String, ReasonDowntime>,
}

/// Production figures for one job, used for OEE.
#[derive(Debug, Clone)]
pub struct JobProduction {
    /// Planned job start.
    pub planned_start: DateTime<Utc>,
    /// Planned job end.
    pub planned_end: DateTime<Utc>,
    /// Target seconds per good part.
    pub target_cycle_time_secs: f64,
    /// Parts produced within tolerance.
    pub good_count: i64,
    /// Parts produced out of tolerance.
    pub bad_count: i64,
}

impl JobProduction {
    fn planned_seconds(&self) -> f64 {
        (self.planned_end - self.planned_start)
            .num_seconds()
            .max(0) as f64
    }
}

/// OEE component ratios, reported 0-100 at two decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OeeFigures {
    /// Operating time over planned time.
    pub availability: f64,
    /// Ideal production time over operating time.
    pub performance: f64,
    /// Good parts over total parts.
    pub quality: f64,
    /// availability x performance x quality.
    pub oee: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn clamp_ratio(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Compute per-status time allocation percentages over a window.
///
/// Each interval is clipped to the window; a sweep over the clipped
/// boundaries attributes every elementary segment to exactly one status.
/// When intervals overlap the earliest-started one wins; the transition
/// protocol keeps open intervals disjoint, so this only matters for
/// historical data written before reconciliation.
/// Unaccounted time lands in [`UNCATEGORIZED`] and percentages always sum
/// to exactly 100.00.
pub fn status_percentages(intervals: &[IntervalRecord], window: TimeWindow) -> StatusPercentages {
    let window_seconds = window.seconds();

    // Clip to the window, dropping empty slices.
    struct Clipped<'a> {
        interval: &'a IntervalRecord,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    }
    let clipped: Vec<Clipped<'_>> = intervals
        .iter()
        .filter_map(|interval| {
            let start = interval.started_at.max(window.start);
            let end = interval.ended_at.unwrap_or(window.end).min(window.end);
            (end > start).then_some(Clipped {
                interval,
                start,
                end,
            })
        })
        .collect();

    // Sweep over the elementary segments between boundaries.
    let mut boundaries: Vec<DateTime<Utc>> = clipped
        .iter()
        .flat_map(|c| [c.start, c.end])
        .collect();
    boundaries.sort();
    boundaries.dedup();

    let mut seconds_by_status: BTreeMap<String, (i64, String, IntervalKind)> = BTreeMap::new();
    let mut covered_seconds = 0i64;

    for pair in boundaries.windows(2) {
        let (seg_start, seg_end) = (pair[0], pair[1]);
        let seg_seconds = (seg_end - seg_start).num_seconds();
        if seg_seconds == 0 {
            continue;
        }
        // First active status wins on overlap.
        let winner = clipped
            .iter()
            .filter(|c| c.start <= seg_start && c.end >= seg_end)
            .min_by_key(|c| c.interval.started_at);
        if let Some(c) = winner {
            let entry = seconds_by_status
                .entry(c.interval.status.clone())
                .or_insert_with(|| (0, c.interval.color.clone(), c.interval.kind));
            entry.0 += seg_seconds;
            covered_seconds += seg_seconds;
        }
    }

    let uncategorized_seconds = (window_seconds - covered_seconds).max(0);

    // Work in integer hundredths of a percent so the closure adjustment
    // is exact.
    let to_hundredths =
        |seconds: i64| ((seconds as f64) * 10_000.0 / (window_seconds as f64)).round() as i64;

    let mut buckets: Vec<(String, i64, i64, String, bool)> = seconds_by_status
        .into_iter()
        .map(|(status, (seconds, color, kind))| {
            (
                status,
                seconds,
                to_hundredths(seconds),
                color,
                kind == IntervalKind::Offline,
            )
        })
        .collect();
    if uncategorized_seconds > 0 {
        buckets.push((
            UNCATEGORIZED.to_string(),
            uncategorized_seconds,
            to_hundredths(uncategorized_seconds),
            UNCATEGORIZED_COLOR.to_string(),
            false,
        ));
    }

    // Pin the rounded sum to exactly 100.00 by adjusting the largest
    // bucket.
    let drift = 10_000 - buckets.iter().map(|b| b.2).sum::<i64>();
    if drift != 0 && !buckets.is_empty() {
        let largest = buckets
            .iter_mut()
            .max_by_key(|b| b.1)
            .expect("buckets is non-empty");
        largest.2 += drift;
    }

    let mut per_status = BTreeMap::new();
    let mut total_utilization_h = 0i64;
    for (status, seconds, hundredths, color, is_offline) in buckets {
        if !is_offline && status != UNCATEGORIZED {
            total_utilization_h += hundredths;
        }
        per_status.insert(
            status,
            StatusSlice {
                seconds,
                percent: hundredths as f64 / 100.0,
                color,
            },
        );
    }

    StatusPercentages {
        per_status,
        total_utilization: total_utilization_h as f64 / 100.0,
    }
}

/// Aggregate downtime intervals by reason over a window.
///
/// Only downtime kinds (manual and unmatched) count; each interval is
/// duration-clipped to the window.
pub fn downtime_breakdown(intervals: &[IntervalRecord], window: TimeWindow) -> DowntimeBreakdown {
    let mut per_reason: BTreeMap<String, (i64, String)> = BTreeMap::new();
    let mut total_seconds = 0i64;

    for interval in intervals.iter().filter(|i| i.kind.is_downtime()) {
        let seconds = interval.clipped_seconds(window.start, window.end);
        if seconds == 0 {
            continue;
        }
        let entry = per_reason
            .entry(interval.status.clone())
            .or_insert_with(|| (0, interval.color.clone()));
        entry.0 += seconds;
        total_seconds += seconds;
    }

    DowntimeBreakdown {
        total_seconds,
        per_reason: per_reason
            .into_iter()
            .map(|(reason, (seconds, color))| {
                let percent = if total_seconds > 0 {
                    round2(seconds as f64 * 100.0 / total_seconds as f64)
                } else {
                    0.0
                };
                (
                    reason,
                    ReasonDowntime {
                        seconds,
                        percent_of_downtime: percent,
                        color,
                    },
                )
            })
            .collect(),
    }
}

/// Compute OEE components for one job from its utilization percentage.
///
/// Operating seconds are `utilization% x planned seconds`. All ratios are
/// clamped to [0, 1] before being reported as 0-100 figures.
pub fn job_oee(utilization_pct: f64, job: &JobProduction) -> OeeFigures {
    let planned = job.planned_seconds();
    if planned <= 0.0 {
        return OeeFigures {
            availability: 0.0,
            performance: 0.0,
            quality: 0.0,
            oee: 0.0,
        };
    }

    let operating = (utilization_pct / 100.0) * planned;
    let availability = clamp_ratio(operating / planned);
    let performance = if operating > 0.0 {
        clamp_ratio(job.target_cycle_time_secs * job.good_count as f64 / operating)
    } else {
        0.0
    };
    let total_parts = job.good_count + job.bad_count;
    let quality = if total_parts > 0 {
        clamp_ratio(job.good_count as f64 / total_parts as f64)
    } else {
        0.0
    };

    OeeFigures {
        availability: round2(availability * 100.0),
        performance: round2(performance * 100.0),
        quality: round2(quality * 100.0),
        oee: round2(availability * performance * quality * 100.0),
    }
}

/// Aggregate OEE across jobs, weighted by planned seconds.
pub fn weighted_oee(jobs: &[(f64, JobProduction)]) -> OeeFigures {
    let total_weight: f64 = jobs.iter().map(|(_, job)| job.planned_seconds()).sum();
    if total_weight <= 0.0 {
        return OeeFigures {
            availability: 0.0,
            performance: 0.0,
            quality: 0.0,
            oee: 0.0,
        };
    }

    let mut availability = 0.0;
    let mut performance = 0.0;
    let mut quality = 0.0;
    let mut oee = 0.0;
    for (utilization_pct, job) in jobs {
        let weight = job.planned_seconds() / total_weight;
        let figures = job_oee(*utilization_pct, job);
        availability += figures.availability * weight;
        performance += figures.performance * weight;
        quality += figures.quality * weight;
        oee += figures.oee * weight;
    }

    OeeFigures {
        availability: round2(availability),
        performance: round2(performance),
        quality: round2(quality),
        oee: round2(oee),
    }
}
