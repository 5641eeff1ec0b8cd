// ABOUTME: Shared test utilities for engine integration tests
// ABOUTME: Quiet logging, in-memory databases, scripted vendor adapters, and fixture batches
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `healthsync`

use std::collections::VecDeque;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures_util::stream;
use healthsync::config::SyncEngineConfig;
use healthsync::crypto::{MasterEncryptionKey, TokenCipher};
use healthsync::database::Database;
use healthsync::engine::SyncEngine;
use healthsync_core::errors::ProviderError;
use healthsync_core::models::{
    AuthorizationGrant, AuthorizationRequest, DeviceConnection, OAuthCredential, RawDataPoint,
    RawValue, TimeRange, VendorKind,
};
use healthsync_providers::apple_health::AppleHealthAdapter;
use healthsync_providers::{
    AdapterRegistry, ParsedBatch, RawPointStream, VendorAdapter, VendorClientConfig,
};
use tokio::time::sleep;
use tracing::Level;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let level = match env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => Level::TRACE,
            Ok("DEBUG") => Level::DEBUG,
            Ok("INFO") => Level::INFO,
            _ => Level::WARN,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .init();
    });
}

/// Default configuration pointed at an in-memory database, without jitter
pub fn test_config() -> SyncEngineConfig {
    let mut config = SyncEngineConfig::default();
    config.database.url = "sqlite::memory:".to_owned();
    config.backoff.jitter = false;
    config
}

/// Fresh in-memory database
pub async fn create_test_database() -> Database {
    init_test_logging();
    let cipher = TokenCipher::new(&MasterEncryptionKey::generate());
    Database::new("sqlite::memory:", cipher).await.unwrap()
}

/// Engine over a fresh database with `adapters` registered
pub async fn engine_with(
    config: SyncEngineConfig,
    adapters: &[Arc<ScriptedAdapter>],
) -> SyncEngine {
    let database = create_test_database().await;
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(Arc::clone(adapter) as Arc<dyn VendorAdapter>);
    }
    SyncEngine::new(config, database, registry)
}

/// Connect `subject_id` to `vendor` through the scripted handshake
pub async fn connect(
    engine: &SyncEngine,
    subject_id: &str,
    vendor: VendorKind,
) -> DeviceConnection {
    engine
        .connect(subject_id, vendor, &AuthorizationGrant::code(format!("{subject_id}-account")))
        .await
        .unwrap()
}

/// Midnight UTC of `day` days after 2025-03-01
pub fn day(day: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + TimeDelta::days(day)
}

/// Fitbit daily step summaries, one per `(day, steps)`
pub fn fitbit_steps(days: &[(i64, f64)]) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    batch.points = days
        .iter()
        .map(|(offset, steps)| {
            RawDataPoint::new(
                VendorKind::Fitbit,
                "activities.summary.steps",
                day(*offset),
                RawValue::number(*steps),
            )
        })
        .collect();
    batch
}

/// Credential valid for an hour
pub fn fresh_credential(token: &str) -> OAuthCredential {
    OAuthCredential {
        access_token: token.to_owned(),
        refresh_token: Some(format!("{token}-refresh")),
        token_secret: None,
        expires_at: Some(Utc::now() + TimeDelta::hours(1)),
        scope: None,
        external_user_id: None,
    }
}

/// What one `fetch` call yields
pub enum FetchScript {
    /// These pages, in order
    Pages(Vec<Result<ParsedBatch, ProviderError>>),
    /// A page that never arrives
    Hang,
}

/// Adapter whose handshake, refresh, and fetch results are scripted
pub struct ScriptedAdapter {
    kind: VendorKind,
    fetches: Mutex<VecDeque<FetchScript>>,
    refreshes: Mutex<VecDeque<Result<OAuthCredential, ProviderError>>>,
    refresh_delay: Duration,
    /// Calls to `refresh`
    pub refresh_calls: AtomicUsize,
    /// Calls to `fetch`
    pub fetch_calls: AtomicUsize,
    /// Calls to `revoke`
    pub revoke_calls: AtomicUsize,
    /// Access tokens seen by `fetch`, in order
    pub fetch_tokens: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(kind: VendorKind) -> Arc<Self> {
        Self::with_refresh_delay(kind, Duration::ZERO)
    }

    pub fn with_refresh_delay(kind: VendorKind, refresh_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            fetches: Mutex::new(VecDeque::new()),
            refreshes: Mutex::new(VecDeque::new()),
            refresh_delay,
            refresh_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            revoke_calls: AtomicUsize::new(0),
            fetch_tokens: Mutex::new(Vec::new()),
        })
    }

    /// Queue the result of the next `fetch`
    pub fn script_fetch(&self, pages: Vec<Result<ParsedBatch, ProviderError>>) {
        self.fetches.lock().unwrap().push_back(FetchScript::Pages(pages));
    }

    /// Make the next `fetch` hang on its first page
    pub fn script_hang(&self) {
        self.fetches.lock().unwrap().push_back(FetchScript::Hang);
    }

    /// Queue the result of the next `refresh`
    pub fn script_refresh(&self, result: Result<OAuthCredential, ProviderError>) {
        self.refreshes.lock().unwrap().push_back(result);
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorAdapter for ScriptedAdapter {
    fn kind(&self) -> VendorKind {
        self.kind
    }

    async fn authorization_url(&self, state: &str) -> Result<AuthorizationRequest, ProviderError> {
        Ok(AuthorizationRequest {
            url: format!("https://vendor.test/authorize?state={state}"),
            state: state.to_owned(),
        })
    }

    async fn authorize(
        &self,
        grant: &AuthorizationGrant,
    ) -> Result<OAuthCredential, ProviderError> {
        if grant.code == "denied" {
            return Err(ProviderError::AuthorizationFailed {
                vendor: self.kind.as_str().to_owned(),
                message: "authorization code rejected".to_owned(),
            });
        }
        Ok(OAuthCredential {
            external_user_id: Some(grant.code.clone()),
            ..fresh_credential("initial")
        })
    }

    async fn refresh(
        &self,
        _credential: &OAuthCredential,
    ) -> Result<OAuthCredential, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.refresh_delay.is_zero() {
            sleep(self.refresh_delay).await;
        }
        self.refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(fresh_credential("refreshed")))
    }

    async fn revoke(&self, _credential: &OAuthCredential) -> Result<(), ProviderError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fetch<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        _range: TimeRange,
    ) -> RawPointStream<'a> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_tokens
            .lock()
            .unwrap()
            .push(credential.access_token.clone());
        let script = self.fetches.lock().unwrap().pop_front();
        match script {
            Some(FetchScript::Pages(pages)) => Box::pin(stream::iter(pages)),
            Some(FetchScript::Hang) => Box::pin(stream::pending()),
            None => Box::pin(stream::empty()),
        }
    }

    fn parse(&self, payload: &[u8]) -> Result<ParsedBatch, ProviderError> {
        AppleHealthAdapter::new(VendorClientConfig::default()).parse(payload)
    }
}
