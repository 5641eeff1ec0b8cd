// ABOUTME: Fixed-tick scheduler selecting due pull connections and dispatching them to the executor
// ABOUTME: Claims leases before spawning so overlapping ticks never double-dispatch a connection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Sync Scheduler
//!
//! Each tick reads the candidate connections, keeps the ones that are due and
//! pulled by the engine, and takes a worker slot for each one before claiming
//! its lease. A connection is never leased while it waits for a worker, so the
//! whole lease is available to the attempt. Claiming happens inline, so by the
//! time the tick returns every dispatched connection is already `syncing` and
//! a second tick skips it. The attempts themselves run on spawned tasks the
//! tick does not wait for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use healthsync_core::errors::{AppResult, ErrorCode};
use healthsync_providers::{descriptor, IngestionMode};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::database::Database;
use crate::executor::{SyncExecutor, SyncRequest};

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connections due at tick time
    pub due: usize,
    /// Attempts claimed and spawned
    pub dispatched: usize,
    /// Due connections left for a later tick (busy or no free worker)
    pub deferred: usize,
}

/// Periodic dispatcher of scheduled syncs
pub struct SyncScheduler {
    database: Database,
    executor: Arc<SyncExecutor>,
    tick_interval: Duration,
    tasks: Mutex<JoinSet<()>>,
}

impl SyncScheduler {
    /// Scheduler dispatching to `executor` every `tick_interval`
    #[must_use]
    pub fn new(database: Database, executor: Arc<SyncExecutor>, tick_interval: Duration) -> Self {
        Self {
            database,
            executor,
            tick_interval,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Run one scheduling pass at `now`
    ///
    /// # Errors
    ///
    /// Returns an error if the candidate query fails
    pub async fn tick(&self, now: DateTime<Utc>) -> AppResult<TickReport> {
        let due: Vec<_> = self
            .database
            .sync_candidates()
            .await?
            .into_iter()
            .filter(|connection| {
                connection.is_due(now)
                    && descriptor(connection.vendor).ingestion_mode == IngestionMode::Pull
            })
            .collect();

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}

        for connection in due {
            if self.executor.is_running(connection.id) {
                report.deferred += 1;
                continue;
            }
            let Some(permit) = self.executor.try_acquire_worker() else {
                report.deferred += 1;
                continue;
            };

            let claimed = match self.executor.claim(connection.id, SyncRequest::Scheduled).await {
                Ok(claimed) => claimed,
                Err(e) if e.code == ErrorCode::ResourceLocked => {
                    debug!(connection.id = %connection.id, "Connection busy, skipping");
                    report.deferred += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        connection.id = %connection.id,
                        error = %e,
                        "Failed to claim connection"
                    );
                    report.deferred += 1;
                    continue;
                }
            };

            report.dispatched += 1;
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let _permit = permit;
                if let Err(e) = executor.run(claimed).await {
                    error!(error = %e, "Sync attempt could not be recorded");
                }
            });
        }

        if report.due > 0 {
            info!(
                due = report.due,
                dispatched = report.dispatched,
                deferred = report.deferred,
                "Scheduler tick"
            );
        }
        Ok(report)
    }

    /// Attempts spawned by ticks and not yet finished
    pub async fn running(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for every spawned attempt to finish
    pub async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Sync task aborted");
            }
        }
    }

    /// Tick until `shutdown` is cancelled
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                tick_secs = self.tick_interval.as_secs(),
                "Sync scheduler started"
            );
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Sync scheduler received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            error!(error = %e, "Scheduler tick failed");
                        }
                    }
                }
            }
            self.drain().await;
            info!("Sync scheduler stopped");
        })
    }
}
