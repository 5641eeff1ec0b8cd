// ABOUTME: Background sweeper pruning terminal sync attempts older than the retention window
// ABOUTME: Runs on a fixed interval until the engine shuts down
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, TimeDelta, Utc};
use healthsync_core::errors::{AppError, AppResult};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::RetentionConfig;
use crate::database::Database;

/// Prunes the sync attempt audit trail
#[derive(Clone)]
pub struct RetentionSweeper {
    database: Database,
    config: RetentionConfig,
}

impl RetentionSweeper {
    /// Sweeper applying `config` to `database`
    #[must_use]
    pub const fn new(database: Database, config: RetentionConfig) -> Self {
        Self { database, config }
    }

    /// Oldest completion instant kept at `now`
    ///
    /// # Errors
    ///
    /// Returns a config error when the retention window does not fit a timestamp
    pub fn cutoff(&self, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        TimeDelta::try_days(self.config.attempt_retention_days.max(0))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                AppError::config(format!(
                    "Retention window of {} days is out of range",
                    self.config.attempt_retention_days
                ))
            })
    }

    /// Delete terminal attempts that completed before the cutoff
    ///
    /// # Errors
    ///
    /// Returns an error if the cutoff is out of range or the delete fails
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let cutoff = self.cutoff(now)?;
        let pruned = self.database.prune_attempts(cutoff).await?;
        if pruned > 0 {
            info!(pruned, cutoff = %cutoff, "Pruned expired sync attempts");
        } else {
            debug!(cutoff = %cutoff, "No sync attempts to prune");
        }
        Ok(pruned)
    }

    /// Sweep every `sweep_interval` until `shutdown`
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()).await {
                            warn!(error = %e, "Retention sweep failed");
                        }
                    }
                }
            }
            debug!("Retention sweeper stopped");
        })
    }
}
