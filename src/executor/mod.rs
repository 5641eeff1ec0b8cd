// ABOUTME: Sync executor driving one attempt through pending, running, and a terminal state
// ABOUTME: Holds the connection lease, gates vendor calls, and refreshes once on expiry
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Sync Executor
//!
//! An attempt is split in two steps so callers can react to contention before
//! any work starts:
//!
//! 1. [`SyncExecutor::claim`] takes the per-connection lease in the database,
//!    fails any attempt left open by a holder whose lease ran out, and records
//!    a new `pending` attempt. A live lease held elsewhere is
//!    [`ErrorCode::ResourceLocked`].
//! 2. [`SyncExecutor::run`] takes a rate permit, moves the attempt to
//!    `running`, fetches page by page through the ingestion pipeline, and
//!    finally writes the terminal attempt and releases the lease.
//!
//! The run is bounded by the time left on the lease taken at claim, not by a
//! fresh timeout, so a lease can only be reclaimed from a holder that has
//! already given up. Callers should hold a worker slot before claiming; time
//! spent waiting for one after the claim is taken out of the attempt's budget.

mod policy;
mod window;

pub use policy::{classify, settle_failure, settle_success, SyncFailure};
pub use window::{manual_range, scheduled_range, SyncRequest};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use healthsync_core::errors::{AppError, AppResult, ErrorCode, ProviderError};
use healthsync_core::models::{
    ConnectionStatus, DeviceConnection, FailureReason, OAuthCredential, SyncAttempt, TimeRange,
};
use healthsync_providers::{AdapterRegistry, VendorAdapter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::config::SchedulerConfig;
use crate::credentials::CredentialStore;
use crate::database::{ConnectionRelease, Database};
use crate::logging::SyncLogger;
use crate::mapper::MappingContext;
use crate::pipeline::{IngestionPipeline, ProcessReport};
use crate::rate_limiting::{BackoffController, RateDecision, RateLimiter};

/// A connection whose lease is held by a fresh `pending` attempt
#[derive(Debug)]
pub struct ClaimedSync {
    /// Connection as read when the lease was taken
    pub connection: DeviceConnection,
    /// The `pending` attempt owning the lease
    pub attempt: SyncAttempt,
    /// Instant the lease lapses; the run must finish before it
    pub lease_until: DateTime<Utc>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
struct InFlight {
    attempt_id: Uuid,
    cancel: CancellationToken,
}

/// Shared collaborators of the executor
#[derive(Clone)]
pub struct ExecutorDeps {
    /// Persistence
    pub database: Database,
    /// Vendor adapters
    pub adapters: AdapterRegistry,
    /// Credential access and refresh
    pub credentials: CredentialStore,
    /// Per-vendor call permits
    pub rate_limiter: Arc<RateLimiter>,
    /// Per-vendor retry delays
    pub backoff: Arc<BackoffController>,
    /// Map, dedup, and store path
    pub pipeline: IngestionPipeline,
}

/// Runs sync attempts
pub struct SyncExecutor {
    deps: ExecutorDeps,
    config: SchedulerConfig,
    call_timeout: Duration,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    in_flight: DashMap<Uuid, InFlight>,
}

enum FetchStop {
    Provider(ProviderError),
    Failed(SyncFailure),
}

/// One pass over the vendor stream for an attempt's window
#[derive(Clone, Copy)]
struct FetchPass<'a> {
    adapter: &'a dyn VendorAdapter,
    range: TimeRange,
    context: MappingContext<'a>,
    cancel: &'a CancellationToken,
}

impl SyncExecutor {
    /// Executor bounded to `config.worker_pool_size` concurrent attempts
    #[must_use]
    pub fn new(
        deps: ExecutorDeps,
        config: SchedulerConfig,
        call_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            deps,
            config,
            call_timeout,
            workers,
            shutdown,
            in_flight: DashMap::new(),
        }
    }

    /// Scheduling policy in use
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Wait for a free worker slot
    ///
    /// # Errors
    ///
    /// Returns an error once the pool has been closed for shutdown
    pub async fn acquire_worker(&self) -> AppResult<OwnedSemaphorePermit> {
        Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| AppError::new(ErrorCode::Cancelled, "Worker pool closed"))
    }

    /// Take a free worker slot without waiting
    ///
    /// Returns `None` when every slot is busy or the pool is closed.
    #[must_use]
    pub fn try_acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.workers).try_acquire_owned().ok()
    }

    /// Stop handing out worker slots
    pub fn close(&self) {
        self.workers.close();
    }

    /// Whether `connection_id` has an attempt running in this process
    #[must_use]
    pub fn is_running(&self, connection_id: Uuid) -> bool {
        self.in_flight.contains_key(&connection_id)
    }

    /// Ask the attempt running for `connection_id` to stop
    ///
    /// Returns whether an attempt was running.
    pub fn cancel(&self, connection_id: Uuid) -> bool {
        self.in_flight.get(&connection_id).is_some_and(|running| {
            running.cancel.cancel();
            true
        })
    }

    /// Claim then run
    ///
    /// # Errors
    ///
    /// Returns an error when the lease cannot be taken or persistence fails
    pub async fn execute(
        &self,
        connection_id: Uuid,
        request: SyncRequest,
    ) -> AppResult<SyncAttempt> {
        let claimed = self.claim(connection_id, request).await?;
        self.run(claimed).await
    }

    /// Take the connection lease and record a `pending` attempt
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for unknown connections, `ResourceLocked`
    /// when another attempt holds a live lease, or a database error
    pub async fn claim(
        &self,
        connection_id: Uuid,
        request: SyncRequest,
    ) -> AppResult<ClaimedSync> {
        let database = &self.deps.database;
        let now = Utc::now();
        let connection = database
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Connection {connection_id}")))?;

        let range = request.range(&connection, &self.config, now);
        let attempt = SyncAttempt::pending(
            connection.id,
            connection.vendor,
            range,
            request.trigger(),
            now,
        );

        let lease = TimeDelta::from_std(self.config.lease_timeout)
            .map_err(|e| AppError::config(format!("Lease timeout out of range: {e}")))?;
        let lease_until = now + lease;
        if !database
            .claim_connection(connection.id, attempt.id, now, lease_until)
            .await?
        {
            return Err(AppError::resource_locked(format!(
                "Connection {connection_id} is already syncing"
            )));
        }

        let reclaimed = database
            .fail_open_attempts(
                connection.id,
                FailureReason::LeaseExpired,
                "lease expired before the attempt finished",
                now,
            )
            .await?;
        if reclaimed > 0 {
            warn!(
                connection.id = %connection.id,
                reclaimed,
                "Reclaimed stale sync lease"
            );
        }

        if let Err(error) = database.insert_attempt(&attempt).await {
            let status = match connection.status {
                ConnectionStatus::Syncing => ConnectionStatus::Idle,
                other => other,
            };
            let release = ConnectionRelease {
                status,
                last_error: connection.last_error.clone(),
                last_sync_at: None,
                next_attempt_at: connection.next_attempt_at,
                consecutive_failures: connection.consecutive_failures,
            };
            database
                .release_connection(connection.id, attempt.id, &release, now)
                .await?;
            return Err(error);
        }

        let cancel = self.shutdown.child();
        self.in_flight.insert(
            connection.id,
            InFlight {
                attempt_id: attempt.id,
                cancel: cancel.clone(),
            },
        );

        Ok(ClaimedSync {
            connection,
            attempt,
            lease_until,
            cancel,
        })
    }

    /// Drive a claimed attempt to a terminal state and release the lease
    ///
    /// Vendor and pipeline failures end in a `failed` attempt, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only when the terminal state cannot be persisted
    pub async fn run(&self, claimed: ClaimedSync) -> AppResult<SyncAttempt> {
        let span = info_span!(
            "sync_attempt",
            connection_id = %claimed.connection.id,
            vendor = %claimed.connection.vendor,
            attempt_id = %claimed.attempt.id,
            trigger = claimed.attempt.trigger.as_str(),
        );
        self.run_claimed(claimed).instrument(span).await
    }

    async fn run_claimed(&self, claimed: ClaimedSync) -> AppResult<SyncAttempt> {
        let ClaimedSync {
            connection,
            mut attempt,
            lease_until,
            cancel,
        } = claimed;

        let budget = (lease_until - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let outcome = if budget.is_zero() {
            Err(SyncFailure::new(
                FailureReason::LeaseExpired,
                "lease expired before the attempt started",
            ))
        } else {
            match timeout(budget, self.drive(&connection, &mut attempt, &cancel)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(SyncFailure::new(
                    FailureReason::TransientNetwork,
                    "attempt exceeded the lease timeout",
                )),
            }
        };

        let finished = self.finish(&connection, &mut attempt, outcome).await;
        self.in_flight
            .remove_if(&connection.id, |_, running| running.attempt_id == attempt.id);
        finished?;

        SyncLogger::log_attempt_finished(&attempt);
        Ok(attempt)
    }

    async fn finish(
        &self,
        connection: &DeviceConnection,
        attempt: &mut SyncAttempt,
        outcome: Result<ProcessReport, SyncFailure>,
    ) -> AppResult<()> {
        let now = Utc::now();
        let transition = match &outcome {
            Ok(report) => {
                self.deps.backoff.record_success(connection.vendor);
                attempt.complete(report.inserted, report.duplicates, report.invalid, now)
            }
            Err(failure) => {
                attempt.records_synced = failure.partial.inserted;
                attempt.duplicates_skipped = failure.partial.duplicates;
                attempt.invalid_skipped = failure.partial.invalid;
                attempt.fail(failure.reason, failure.detail.clone(), now)
            }
        };
        transition.map_err(|e| AppError::internal(e.to_string()))?;

        let release = match &outcome {
            Ok(_) => settle_success(attempt.range),
            Err(failure) => {
                if failure.reason == FailureReason::RateLimited && !failure.local_denial {
                    let wait = failure
                        .retry_after
                        .unwrap_or_else(|| self.deps.backoff.nominal_delay(1));
                    self.deps.rate_limiter.penalize(connection.vendor, wait);
                }
                settle_failure(failure, connection, &self.deps.backoff, now)
            }
        };

        let database = &self.deps.database;
        if !database.update_attempt(attempt).await? {
            warn!("Attempt was closed by a newer lease holder; result discarded");
        }
        if !database
            .release_connection(connection.id, attempt.id, &release, now)
            .await?
        {
            warn!("Lease was reclaimed before release");
        }
        Ok(())
    }

    async fn drive(
        &self,
        connection: &DeviceConnection,
        attempt: &mut SyncAttempt,
        cancel: &CancellationToken,
    ) -> Result<ProcessReport, SyncFailure> {
        if cancel.is_cancelled() {
            return Err(SyncFailure::cancelled());
        }

        let adapter = self
            .deps
            .adapters
            .get(connection.vendor)
            .map_err(|e| SyncFailure::from_provider(&e))?;
        if !adapter.descriptor().capabilities.supports_fetch() {
            return Err(SyncFailure::new(
                FailureReason::Unsupported,
                format!("{} delivers data by push only", connection.vendor),
            ));
        }

        if let RateDecision::Denied { retry_after } =
            self.deps.rate_limiter.acquire(connection.vendor)
        {
            return Err(SyncFailure::rate_denied(retry_after));
        }

        attempt
            .start()
            .map_err(|e| SyncFailure::new(FailureReason::Storage, e.to_string()))?;
        let still_owned = self
            .deps
            .database
            .update_attempt(attempt)
            .await
            .map_err(|e| SyncFailure::storage(&e))?;
        if !still_owned {
            return Err(SyncFailure::new(
                FailureReason::LeaseExpired,
                "lease was reclaimed before the first vendor call",
            ));
        }

        let credential = self
            .deps
            .credentials
            .get_fresh(connection.id, Utc::now())
            .await
            .map_err(|e| SyncFailure::from_credential(&e))?;

        let pass = FetchPass {
            adapter: adapter.as_ref(),
            range: attempt.range,
            context: MappingContext {
                subject_id: &connection.subject_id,
                connection_id: connection.id,
            },
            cancel,
        };
        let mut report = ProcessReport::default();

        match self.fetch_all(pass, &credential, &mut report, true).await {
            Ok(()) => Ok(report),
            Err(FetchStop::Provider(error)) if error.is_auth_expired() => {
                debug!("Access rejected as expired; refreshing once");
                let refreshed = self
                    .deps
                    .credentials
                    .refresh(connection.id)
                    .await
                    .map_err(|e| SyncFailure::from_credential(&e).with_partial(report))?;
                match self.fetch_all(pass, &refreshed, &mut report, false).await {
                    Ok(()) => Ok(report),
                    Err(stop) => Err(Self::stop_to_failure(stop, report)),
                }
            }
            Err(stop) => Err(Self::stop_to_failure(stop, report)),
        }
    }

    fn stop_to_failure(stop: FetchStop, report: ProcessReport) -> SyncFailure {
        match stop {
            FetchStop::Provider(error) => SyncFailure::from_provider(&error).with_partial(report),
            FetchStop::Failed(failure) => {
                let partial = failure.partial;
                let mut merged = report;
                merged.absorb(partial);
                failure.with_partial(merged)
            }
        }
    }

    /// Poll the vendor stream to the end, one permit and one deadline per call
    async fn fetch_all(
        &self,
        pass: FetchPass<'_>,
        credential: &OAuthCredential,
        report: &mut ProcessReport,
        first_call_permitted: bool,
    ) -> Result<(), FetchStop> {
        let vendor = pass.adapter.kind();
        let cancel = pass.cancel;
        let mut pages = pass.adapter.fetch(credential, pass.range);
        let mut permitted = first_call_permitted;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchStop::Failed(SyncFailure::cancelled()));
            }
            if !permitted {
                if let RateDecision::Denied { retry_after } =
                    self.deps.rate_limiter.acquire(vendor)
                {
                    return Err(FetchStop::Failed(SyncFailure::rate_denied(retry_after)));
                }
            }
            permitted = false;

            let page = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(FetchStop::Failed(SyncFailure::cancelled()));
                }
                page = timeout(self.call_timeout, pages.next()) => page,
            };

            let batch = match page {
                Err(_) => {
                    return Err(FetchStop::Provider(ProviderError::transient(
                        vendor.as_str(),
                        format!(
                            "vendor call exceeded {}s deadline",
                            self.call_timeout.as_secs()
                        ),
                    )));
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(error))) => return Err(FetchStop::Provider(error)),
                Ok(Some(Ok(batch))) => batch,
            };

            let processed = self
                .deps
                .pipeline
                .process_batch(vendor, pass.context, &batch)
                .await
                .map_err(|e| FetchStop::Failed(SyncFailure::from_pipeline(e)))?;
            report.absorb(processed);
        }
    }
}
