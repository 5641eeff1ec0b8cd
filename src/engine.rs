// ABOUTME: SyncEngine facade wiring persistence, adapters, executor, scheduler, and gateway
// ABOUTME: Exposes connect, disconnect, trigger_sync, toggle, list_connections, and stream_ingest
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Sync Engine
//!
//! [`SyncEngine`] is the trigger surface the rest of the application talks to.
//! It owns every long-lived component and the root cancellation token:
//!
//! - [`SyncEngine::start`] launches the scheduler, the gateway worker, and the
//!   retention sweeper
//! - [`SyncEngine::shutdown`] cancels in-flight attempts, lets queued pushes
//!   drain, and waits for the background tasks

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use healthsync_core::errors::{AppError, AppResult, ErrorCode};
use healthsync_core::models::{
    AuthorizationGrant, AuthorizationRequest, DeviceConnection, SyncAttempt, VendorKind,
};
use healthsync_providers::http_client::initialize_shared_client;
use healthsync_providers::{
    descriptor, AdapterRegistry, IngestionMode, RelaySignatureValidator, SignatureValidation,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::authorization::AuthorizationStates;
use crate::cancellation::CancellationToken;
use crate::config::SyncEngineConfig;
use crate::credentials::CredentialStore;
use crate::crypto::{MasterEncryptionKey, TokenCipher};
use crate::database::{Database, NewConnection};
use crate::dedup::DedupIndex;
use crate::executor::{ExecutorDeps, SyncExecutor, SyncRequest};
use crate::gateway::{GatewayWorker, IngestReceipt, StreamingGateway};
use crate::logging::SyncLogger;
use crate::pipeline::IngestionPipeline;
use crate::rate_limiting::{BackoffController, RateLimiter};
use crate::retention::RetentionSweeper;
use crate::scheduler::SyncScheduler;

/// Attempts returned by default from the history listing
pub const DEFAULT_ATTEMPT_LIMIT: u32 = 50;

/// Device synchronization engine
pub struct SyncEngine {
    config: SyncEngineConfig,
    database: Database,
    adapters: AdapterRegistry,
    credentials: CredentialStore,
    dedup: Arc<DedupIndex>,
    executor: Arc<SyncExecutor>,
    scheduler: Arc<SyncScheduler>,
    gateway: StreamingGateway,
    gateway_worker: Mutex<Option<GatewayWorker>>,
    retention: RetentionSweeper,
    authorizations: AuthorizationStates,
    relay_validator: Option<RelaySignatureValidator>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Open the configured database and build the engine with adapters for
    /// every completely registered vendor
    ///
    /// # Errors
    ///
    /// Returns an error when the encryption key is invalid or the database
    /// cannot be opened
    pub async fn from_config(config: SyncEngineConfig) -> AppResult<Self> {
        initialize_shared_client(
            config.http_client.call_timeout.as_secs(),
            config.http_client.connect_timeout.as_secs(),
        );

        let key = MasterEncryptionKey::load_or_generate(
            config.secrets.master_encryption_key.as_deref(),
        )?;
        let database = Database::new(&config.database.url, TokenCipher::new(&key)).await?;
        let adapters = AdapterRegistry::from_config(config.vendors.clone());
        Ok(Self::new(config, database, adapters))
    }

    /// Build the engine over an open database and a prepared adapter registry
    #[must_use]
    pub fn new(config: SyncEngineConfig, database: Database, adapters: AdapterRegistry) -> Self {
        let shutdown = CancellationToken::new();
        let refresh_margin =
            TimeDelta::from_std(config.scheduler.refresh_margin).unwrap_or(TimeDelta::zero());
        let credentials = CredentialStore::new(database.clone(), adapters.clone(), refresh_margin);

        let dedup = Arc::new(DedupIndex::new(
            Arc::new(database.clone()),
            config.gateway.index_entries_per_subject,
        ));
        let pipeline = IngestionPipeline::new(Arc::clone(&dedup));

        let deps = ExecutorDeps {
            database: database.clone(),
            adapters: adapters.clone(),
            credentials: credentials.clone(),
            rate_limiter: Arc::new(RateLimiter::new(&config.quota_overrides)),
            backoff: Arc::new(BackoffController::new(config.backoff.clone())),
            pipeline: pipeline.clone(),
        };
        let executor = Arc::new(SyncExecutor::new(
            deps,
            config.scheduler.clone(),
            config.http_client.call_timeout,
            shutdown.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            database.clone(),
            Arc::clone(&executor),
            config.scheduler.tick_interval,
        ));
        let (gateway, worker) =
            StreamingGateway::new(&config.gateway, database.clone(), adapters.clone(), pipeline);
        let retention = RetentionSweeper::new(database.clone(), config.retention.clone());
        let relay_validator = config
            .secrets
            .relay_signing_secret
            .as_deref()
            .map(RelaySignatureValidator::new);

        Self {
            config,
            database,
            adapters,
            credentials,
            dedup,
            executor,
            scheduler,
            gateway,
            gateway_worker: Mutex::new(Some(worker)),
            retention,
            authorizations: AuthorizationStates::default(),
            relay_validator,
            shutdown,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    /// Underlying database
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// Registered vendor adapters
    #[must_use]
    pub const fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Scheduler, for driving ticks directly
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    /// Executor shared by scheduled and manual syncs
    #[must_use]
    pub const fn executor(&self) -> &Arc<SyncExecutor> {
        &self.executor
    }

    /// Credential store
    #[must_use]
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// In-memory dedup index
    #[must_use]
    pub const fn dedup(&self) -> &Arc<DedupIndex> {
        &self.dedup
    }

    /// Retention sweeper
    #[must_use]
    pub const fn retention(&self) -> &RetentionSweeper {
        &self.retention
    }

    /// Vendors with a registered adapter
    #[must_use]
    pub fn vendors(&self) -> Vec<VendorKind> {
        let mut kinds: Vec<_> = self.adapters.kinds().collect();
        kinds.sort_unstable_by_key(|kind| kind.as_str());
        kinds
    }

    /// Consent URL for connecting `vendor` on behalf of `subject_id`
    ///
    /// # Errors
    ///
    /// Returns an error when the vendor is not configured or the vendor
    /// handshake fails
    pub async fn authorization_url(
        &self,
        vendor: VendorKind,
        subject_id: &str,
    ) -> AppResult<AuthorizationRequest> {
        validate_subject(subject_id)?;
        let adapter = self.adapters.get(vendor)?;
        let state = self.authorizations.issue(subject_id, vendor, Utc::now()).await;
        Ok(adapter.authorization_url(&state).await?)
    }

    /// Finish an OAuth callback: resolve the state to its subject and connect
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for missing, unknown, or expired state, otherwise
    /// whatever [`Self::connect`] returns
    pub async fn complete_authorization(
        &self,
        vendor: VendorKind,
        grant: &AuthorizationGrant,
    ) -> AppResult<DeviceConnection> {
        let state = grant.state.as_deref().ok_or_else(|| {
            AppError::new(ErrorCode::AuthInvalid, "Authorization callback is missing state")
        })?;
        let pending = self.authorizations.consume(state, vendor, Utc::now()).await?;
        self.connect(&pending.subject_id, vendor, grant).await
    }

    /// Exchange `grant` with the vendor and persist the connection
    ///
    /// Re-authorizing an existing account replaces its credential and clears
    /// its error state.
    ///
    /// # Errors
    ///
    /// Returns an error when the vendor refuses the grant or storage fails
    pub async fn connect(
        &self,
        subject_id: &str,
        vendor: VendorKind,
        grant: &AuthorizationGrant,
    ) -> AppResult<DeviceConnection> {
        validate_subject(subject_id)?;
        let adapter = self.adapters.get(vendor)?;
        let credential = adapter.authorize(grant).await?;

        let interval = self.config.scheduler.default_sync_interval.as_secs();
        let connection = self
            .database
            .upsert_connection(&NewConnection {
                subject_id,
                vendor,
                credential: &credential,
                sync_interval_secs: i64::try_from(interval).unwrap_or(i64::MAX),
                now: Utc::now(),
            })
            .await?;

        SyncLogger::log_connection_event(connection.id, vendor, "connected");
        Ok(connection)
    }

    /// Cancel any running attempt, revoke at the vendor, and delete the connection
    ///
    /// Sync attempt history is kept until retention prunes it.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for unknown connections
    pub async fn disconnect(&self, connection_id: Uuid) -> AppResult<()> {
        let connection = self.require_connection(connection_id).await?;

        if self.executor.cancel(connection_id) {
            info!(connection.id = %connection_id, "Cancelled running sync for disconnect");
        }
        if let Err(e) = self.credentials.revoke(connection_id).await {
            warn!(connection.id = %connection_id, error = %e, "Skipping vendor revocation");
        }
        if !self.database.delete_connection(connection_id).await? {
            return Err(AppError::not_found(format!("Connection {connection_id}")));
        }

        SyncLogger::log_connection_event(connection_id, connection.vendor, "disconnected");
        Ok(())
    }

    /// Run a manual sync now and return the finished attempt
    ///
    /// `days` defaults to the configured window and is clamped to the maximum.
    /// Manual syncs also recover connections parked in `error`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound`, `InvalidInput` for push-only vendors,
    /// `ResourceLocked` when an attempt is already running, or `Cancelled`
    /// during shutdown
    pub async fn trigger_sync(
        &self,
        connection_id: Uuid,
        days: Option<u32>,
    ) -> AppResult<SyncAttempt> {
        let connection = self.require_connection(connection_id).await?;
        if descriptor(connection.vendor).ingestion_mode == IngestionMode::Push {
            return Err(AppError::invalid_input(format!(
                "{} delivers data by push; there is nothing to pull",
                connection.vendor
            )));
        }
        if self.executor.is_running(connection_id) {
            return Err(AppError::resource_locked(format!(
                "Connection {connection_id} is already syncing"
            )));
        }

        let _permit = self.executor.acquire_worker().await?;
        self.executor
            .execute(connection_id, SyncRequest::Manual { days })
            .await
    }

    /// Enable or disable scheduled sync for a connection
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for unknown connections
    pub async fn toggle(&self, connection_id: Uuid, enabled: bool) -> AppResult<DeviceConnection> {
        if !self
            .database
            .set_sync_enabled(connection_id, enabled, Utc::now())
            .await?
        {
            return Err(AppError::not_found(format!("Connection {connection_id}")));
        }
        let connection = self.require_connection(connection_id).await?;
        let event = if enabled { "sync enabled" } else { "sync disabled" };
        SyncLogger::log_connection_event(connection_id, connection.vendor, event);
        Ok(connection)
    }

    /// Connections, optionally only those of one subject
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn list_connections(
        &self,
        subject_id: Option<&str>,
    ) -> AppResult<Vec<DeviceConnection>> {
        self.database.list_connections(subject_id).await
    }

    /// One connection
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for unknown connections
    pub async fn get_connection(&self, connection_id: Uuid) -> AppResult<DeviceConnection> {
        self.require_connection(connection_id).await
    }

    /// Most recent attempts of a connection, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn attempts(&self, connection_id: Uuid, limit: u32) -> AppResult<Vec<SyncAttempt>> {
        self.database.list_attempts(connection_id, limit).await
    }

    /// Queue a relay payload for a push connection
    ///
    /// # Errors
    ///
    /// See [`StreamingGateway::submit`]
    pub async fn stream_ingest(
        &self,
        connection_id: Uuid,
        payload: &[u8],
    ) -> AppResult<IngestReceipt> {
        self.gateway.submit(connection_id, payload).await
    }

    /// Check a relay signature header when a signing secret is configured
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for missing, stale, or wrong signatures
    pub fn verify_relay_signature(&self, header: Option<&str>, body: &[u8]) -> AppResult<()> {
        let Some(validator) = &self.relay_validator else {
            return Ok(());
        };
        match validator.validate(header, body) {
            SignatureValidation::Valid => Ok(()),
            SignatureValidation::Missing => Err(AppError::new(
                ErrorCode::AuthInvalid,
                "Relay signature header is missing",
            )),
            SignatureValidation::Expired => Err(AppError::new(
                ErrorCode::AuthInvalid,
                "Relay signature timestamp is outside the accepted window",
            )),
            SignatureValidation::Invalid => Err(AppError::new(
                ErrorCode::AuthInvalid,
                "Relay signature does not match the payload",
            )),
        }
    }

    /// Verify the database answers
    ///
    /// # Errors
    ///
    /// Returns an error when the database is unreachable
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(self.database.pool()).await?;
        Ok(())
    }

    /// Start the scheduler, gateway worker, and retention sweeper
    ///
    /// Calling it again is a no-op.
    pub async fn start(&self) {
        let Some(worker) = self.gateway_worker.lock().await.take() else {
            warn!("Sync engine already started");
            return;
        };

        let mut background = self.background.lock().await;
        background.push(Arc::clone(&self.scheduler).spawn(self.shutdown.clone()));
        background.push(worker.spawn(self.shutdown.clone()));
        background.push(self.retention.clone().spawn(self.shutdown.clone()));
        info!(
            vendors = ?self.vendors(),
            workers = self.config.scheduler.worker_pool_size,
            "Sync engine started"
        );
    }

    /// Cancel running attempts and wait for the background tasks to finish
    pub async fn shutdown(&self) {
        info!("Sync engine shutting down");
        self.shutdown.cancel();
        self.executor.close();

        let handles: Vec<_> = self.background.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Sync engine stopped");
    }

    async fn require_connection(&self, connection_id: Uuid) -> AppResult<DeviceConnection> {
        self.database
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Connection {connection_id}")))
    }
}

fn validate_subject(subject_id: &str) -> AppResult<()> {
    if subject_id.trim().is_empty() {
        return Err(AppError::invalid_input("Subject id must not be empty"));
    }
    Ok(())
}
