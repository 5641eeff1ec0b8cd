// ABOUTME: Streaming ingestion gateway for relay-pushed points behind a bounded queue
// ABOUTME: Full queue answers Backpressure; a worker drains jobs through the shared pipeline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Streaming Ingestion Gateway
//!
//! Payloads are parsed on submission so a malformed push is rejected to the
//! relay right away. Parsed jobs then wait in a bounded channel; when it is
//! full the submission is refused with [`ErrorCode::Backpressure`] and nothing
//! from it is stored. Accepted jobs are never dropped: on shutdown the worker
//! drains whatever is still queued before it stops.
//!
//! A store failure part way through a job resumes at the first point not yet
//! written, a bounded number of times. A job that still cannot be finished is
//! recorded as a failed `push` attempt on its connection, carrying the counts
//! that did land, so an accepted push never disappears without a trace.

use std::time::Duration;

use chrono::Utc;
use healthsync_core::constants::gateway;
use healthsync_core::errors::{AppError, AppResult, ErrorCode};
use healthsync_core::models::{FailureReason, SyncAttempt, SyncTrigger, TimeRange, VendorKind};
use healthsync_providers::{descriptor, AdapterRegistry, ParsedBatch};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::config::GatewayConfig;
use crate::database::Database;
use crate::mapper::MappingContext;
use crate::pipeline::{IngestionPipeline, ProcessReport};

/// Seconds a relay is told to wait after backpressure
const BACKPRESSURE_RETRY_SECS: u64 = 1;

/// Parsed push waiting for the pipeline
#[derive(Debug)]
struct IngestJob {
    id: Uuid,
    connection_id: Uuid,
    subject_id: String,
    vendor: VendorKind,
    batch: ParsedBatch,
}

/// Acknowledgement of an accepted push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    /// Queued job identifier
    pub job_id: Uuid,
    /// Points queued for the pipeline
    pub accepted_points: usize,
    /// Records in the payload that could not be parsed
    pub skipped: usize,
    /// Jobs waiting, including this one
    pub queue_depth: usize,
}

/// Submission side of the gateway
#[derive(Clone)]
pub struct StreamingGateway {
    sender: mpsc::Sender<IngestJob>,
    database: Database,
    adapters: AdapterRegistry,
    max_batch_size: usize,
}

/// Consumer side of the gateway
pub struct GatewayWorker {
    receiver: mpsc::Receiver<IngestJob>,
    pipeline: IngestionPipeline,
    database: Database,
}

impl StreamingGateway {
    /// Gateway and its worker, sharing a queue of `config.queue_capacity` jobs
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        database: Database,
        adapters: AdapterRegistry,
        pipeline: IngestionPipeline,
    ) -> (Self, GatewayWorker) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let gateway = Self {
            sender,
            database: database.clone(),
            adapters,
            max_batch_size: config.max_batch_size.max(1),
        };
        let worker = GatewayWorker {
            receiver,
            pipeline,
            database,
        };
        (gateway, worker)
    }

    /// Jobs currently queued
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Parse a pushed payload for `connection_id` and queue it
    ///
    /// # Errors
    ///
    /// - `ResourceNotFound` for an unknown connection
    /// - `InvalidInput` when the vendor is not push-capable, sync is disabled,
    ///   or the batch is larger than allowed
    /// - `MalformedPayload` when nothing in the payload parses
    /// - `Backpressure` when the queue is full; retry later
    pub async fn submit(&self, connection_id: Uuid, payload: &[u8]) -> AppResult<IngestReceipt> {
        let connection = self
            .database
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Connection {connection_id}")))?;

        if !descriptor(connection.vendor).capabilities.supports_parse() {
            return Err(AppError::invalid_input(format!(
                "{} does not accept pushed data",
                connection.vendor
            )));
        }
        if !connection.sync_enabled {
            return Err(AppError::invalid_input(format!(
                "Sync is disabled for connection {connection_id}"
            )));
        }

        let adapter = self.adapters.get(connection.vendor)?;
        let batch = adapter.parse(payload)?;
        let submitted = batch.points.len() + batch.skipped;
        if submitted > self.max_batch_size {
            return Err(AppError::invalid_input(format!(
                "Batch of {submitted} records exceeds the limit of {}",
                self.max_batch_size
            )));
        }

        let job = IngestJob {
            id: Uuid::new_v4(),
            connection_id,
            subject_id: connection.subject_id,
            vendor: connection.vendor,
            batch,
        };
        let receipt = IngestReceipt {
            job_id: job.id,
            accepted_points: job.batch.points.len(),
            skipped: job.batch.skipped,
            queue_depth: 0,
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                let receipt = IngestReceipt {
                    queue_depth: self.queue_depth(),
                    ..receipt
                };
                debug!(
                    connection.id = %connection_id,
                    job_id = %receipt.job_id,
                    points = receipt.accepted_points,
                    queue_depth = receipt.queue_depth,
                    "Push queued"
                );
                Ok(receipt)
            }
            Err(TrySendError::Full(_)) => {
                warn!(connection.id = %connection_id, "Ingestion queue full, rejecting push");
                Err(AppError::backpressure("Ingestion queue is full")
                    .with_retry_after(BACKPRESSURE_RETRY_SECS))
            }
            Err(TrySendError::Closed(_)) => Err(AppError::new(
                ErrorCode::Cancelled,
                "Ingestion gateway is shut down",
            )),
        }
    }
}

impl GatewayWorker {
    /// Process one queued job, waiting for it if the queue is empty
    ///
    /// Returns `None` once every gateway handle is gone and the queue is empty.
    pub async fn process_next(&mut self) -> Option<ProcessReport> {
        let job = self.receiver.recv().await?;
        Some(self.process(job).await)
    }

    async fn process(&self, job: IngestJob) -> ProcessReport {
        let context = MappingContext {
            subject_id: &job.subject_id,
            connection_id: job.connection_id,
        };
        let mut report = ProcessReport::default();
        let mut offset = 0_usize;
        let mut pass = 1;

        let stored = loop {
            let remaining = job.batch.points.get(offset..).unwrap_or_default();
            match self.pipeline.process(job.vendor, context, remaining).await {
                Ok(rest) => {
                    report.absorb(rest);
                    break Ok(());
                }
                Err(failure) => {
                    report.absorb(failure.partial);
                    offset = offset
                        .saturating_add(usize::try_from(failure.partial.total()).unwrap_or(0));
                    if pass >= gateway::STORE_ATTEMPTS {
                        break Err(failure.error);
                    }
                    warn!(
                        job_id = %job.id,
                        connection.id = %job.connection_id,
                        pass,
                        stored_points = offset,
                        error = %failure.error,
                        "Push ingestion stopped part way, resuming"
                    );
                    pass += 1;
                    sleep(Duration::from_millis(gateway::STORE_RETRY_DELAY_MS)).await;
                }
            }
        };
        report.invalid = report
            .invalid
            .saturating_add(u32::try_from(job.batch.skipped).unwrap_or(u32::MAX));

        match stored {
            Ok(()) => {
                if let Err(e) = self.database.record_push(job.connection_id, Utc::now()).await {
                    warn!(connection.id = %job.connection_id, error = %e, "Failed to record push");
                }
                debug!(
                    job_id = %job.id,
                    inserted = report.inserted,
                    duplicates = report.duplicates,
                    invalid = report.invalid,
                    "Push ingested"
                );
            }
            Err(e) => {
                error!(
                    job_id = %job.id,
                    connection.id = %job.connection_id,
                    inserted = report.inserted,
                    unstored = job.batch.points.len().saturating_sub(offset),
                    error = %e,
                    "Push ingestion gave up"
                );
                self.record_failed_push(&job, report, &e).await;
            }
        }
        report
    }

    async fn record_failed_push(&self, job: &IngestJob, report: ProcessReport, cause: &AppError) {
        let now = Utc::now();
        let observed = job.batch.points.iter().map(|point| point.observed_at);
        let range = match (observed.clone().min(), observed.max()) {
            (Some(first), Some(last)) => TimeRange::new(first, last),
            _ => TimeRange::new(now, now),
        };

        let mut attempt =
            SyncAttempt::pending(job.connection_id, job.vendor, range, SyncTrigger::Push, now);
        attempt.records_synced = report.inserted;
        attempt.duplicates_skipped = report.duplicates;
        attempt.invalid_skipped = report.invalid;
        let detail = format!("push job {} could not be stored: {cause}", job.id);
        if let Err(e) = attempt.fail(FailureReason::Storage, detail, now) {
            error!(job_id = %job.id, error = %e, "Failed push could not be recorded");
            return;
        }

        if let Err(e) = self.database.insert_attempt(&attempt).await {
            error!(job_id = %job.id, error = %e, "Failed push could not be recorded");
        }
    }

    /// Drain the queue until `shutdown`, then finish what is already queued
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Ingestion gateway worker started");
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    job = self.receiver.recv() => match job {
                        Some(job) => {
                            self.process(job).await;
                        }
                        None => break,
                    },
                }
            }

            self.receiver.close();
            let mut drained = 0_usize;
            while let Some(job) = self.receiver.recv().await {
                self.process(job).await;
                drained += 1;
            }
            info!(drained, "Ingestion gateway worker stopped");
        })
    }
}
