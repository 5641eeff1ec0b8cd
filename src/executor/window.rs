// ABOUTME: Time windows requested from vendors for scheduled and manual syncs
// ABOUTME: Scheduled windows overlap the last success; manual windows are clamped day counts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Duration, Utc};
use healthsync_core::models::{DeviceConnection, SyncTrigger, TimeRange};

use crate::config::SchedulerConfig;

/// What a caller asked the executor to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Scheduler dispatch: resume from the last successful sync
    Scheduled,
    /// Manual trigger for the last `days` days, or the default window
    Manual {
        /// Days to fetch
        days: Option<u32>,
    },
}

impl SyncRequest {
    /// Trigger recorded on the attempt
    #[must_use]
    pub const fn trigger(self) -> SyncTrigger {
        match self {
            Self::Scheduled => SyncTrigger::Scheduled,
            Self::Manual { .. } => SyncTrigger::Manual,
        }
    }

    /// Window to fetch for `connection` at `now`
    #[must_use]
    pub fn range(
        self,
        connection: &DeviceConnection,
        config: &SchedulerConfig,
        now: DateTime<Utc>,
    ) -> TimeRange {
        match self {
            Self::Scheduled => scheduled_range(connection, config, now),
            Self::Manual { days } => manual_range(days, config, now),
        }
    }
}

fn days(count: u32) -> Duration {
    Duration::days(i64::from(count))
}

/// Resume `overlap` before the last success so late-arriving vendor data is
/// picked up; first syncs use the default window. Never reaches further back
/// than the maximum window.
#[must_use]
pub fn scheduled_range(
    connection: &DeviceConnection,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> TimeRange {
    let overlap = Duration::from_std(config.overlap).unwrap_or_else(|_| Duration::zero());
    let earliest = now - days(config.max_window_days.max(1));
    let start = connection
        .last_sync_at
        .map_or_else(|| now - days(config.default_window_days), |last| last - overlap)
        .max(earliest)
        .min(now);
    TimeRange::new(start, now)
}

/// Last `days` days up to `now`, clamped to `1..=max_window_days`
#[must_use]
pub fn manual_range(
    days_requested: Option<u32>,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> TimeRange {
    let count = days_requested
        .unwrap_or(config.default_window_days)
        .clamp(1, config.max_window_days.max(1));
    TimeRange::new(now - days(count), now)
}
