// ABOUTME: Environment-driven configuration for the sync engine and its HTTP server
// ABOUTME: Scheduler, backoff, gateway, vendor client, retention, and secret settings with defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use healthsync_core::constants::{
    backoff, env_config, gateway, http, retention, scheduling,
};
use healthsync_core::models::VendorKind;
use healthsync_providers::descriptor::Quota;
use healthsync_providers::VendorClientConfig;
use tracing::{info, warn};

/// Database settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection URL (`sqlite:./data/healthsync.db`, `sqlite::memory:`)
    pub url: String,
}

impl DatabaseConfig {
    /// Whether the URL points at an in-memory database
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

/// Scheduler and executor settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between scheduler ticks
    pub tick_interval: Duration,
    /// Concurrent sync attempts across all connections
    pub worker_pool_size: usize,
    /// How long a `syncing` lease is honoured before it may be reclaimed
    pub lease_timeout: Duration,
    /// Sync interval given to new connections
    pub default_sync_interval: Duration,
    /// Window for first syncs and manual syncs without an explicit day count
    pub default_window_days: u32,
    /// Largest window a manual sync may request
    pub max_window_days: u32,
    /// Overlap with the previous successful sync for scheduled runs
    pub overlap: Duration,
    /// Credentials expiring within this margin are refreshed before use
    pub refresh_margin: Duration,
}

/// Retry backoff settings
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Growth factor per consecutive failure
    pub factor: u32,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Consecutive transient failures tolerated before a connection moves to `error`
    pub max_consecutive_failures: u32,
    /// Apply random jitter to computed delays
    pub jitter: bool,
}

/// Streaming gateway settings
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Jobs queued before submissions are rejected with backpressure
    pub queue_capacity: usize,
    /// Largest number of points accepted in one push
    pub max_batch_size: usize,
    /// Fingerprints remembered per subject in memory
    pub index_entries_per_subject: usize,
}

/// Outbound vendor HTTP settings
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Deadline for one vendor call
    pub call_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
}

/// Audit retention settings
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Terminal sync attempts older than this many days are pruned
    pub attempt_retention_days: i64,
    /// Time between retention sweeps
    pub sweep_interval: Duration,
}

/// Secrets read from the environment
#[derive(Clone, Default)]
pub struct SecretsConfig {
    /// Base64 encoded 32-byte key for credential encryption
    pub master_encryption_key: Option<String>,
    /// Shared secret for relay payload signatures
    pub relay_signing_secret: Option<String>,
}

impl fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("SecretsConfig")
            .field("master_encryption_key", &redact(&self.master_encryption_key))
            .field("relay_signing_secret", &redact(&self.relay_signing_secret))
            .finish()
    }
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Database settings
    pub database: DatabaseConfig,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Scheduler and executor settings
    pub scheduler: SchedulerConfig,
    /// Retry backoff settings
    pub backoff: BackoffConfig,
    /// Streaming gateway settings
    pub gateway: GatewayConfig,
    /// Outbound HTTP settings
    pub http_client: HttpClientConfig,
    /// Retention settings
    pub retention: RetentionConfig,
    /// OAuth client registrations per vendor
    pub vendors: HashMap<VendorKind, VendorClientConfig>,
    /// Quotas replacing the published ones
    pub quota_overrides: HashMap<VendorKind, Quota>,
    /// Secrets
    pub secrets: SecretsConfig,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:./data/healthsync.db".to_owned(),
            },
            server: ServerConfig {
                host: "127.0.0.1".to_owned(),
                port: 8081,
            },
            scheduler: SchedulerConfig {
                tick_interval: Duration::from_secs(scheduling::DEFAULT_TICK_INTERVAL_SECS),
                worker_pool_size: scheduling::DEFAULT_WORKER_POOL_SIZE,
                lease_timeout: Duration::from_secs(scheduling::DEFAULT_LEASE_TIMEOUT_SECS),
                default_sync_interval: Duration::from_secs(
                    scheduling::DEFAULT_SYNC_INTERVAL_MINUTES.unsigned_abs() * 60,
                ),
                default_window_days: scheduling::DEFAULT_SYNC_WINDOW_DAYS,
                max_window_days: scheduling::MAX_SYNC_WINDOW_DAYS,
                overlap: Duration::from_secs(
                    scheduling::DEFAULT_OVERLAP_HOURS.unsigned_abs() * 3600,
                ),
                refresh_margin: Duration::from_secs(
                    scheduling::CREDENTIAL_REFRESH_MARGIN_SECS.unsigned_abs(),
                ),
            },
            backoff: BackoffConfig {
                base_delay: Duration::from_secs(backoff::DEFAULT_BASE_DELAY_SECS),
                factor: backoff::DEFAULT_FACTOR,
                max_delay: Duration::from_secs(backoff::DEFAULT_MAX_DELAY_SECS),
                max_consecutive_failures: backoff::DEFAULT_MAX_CONSECUTIVE_FAILURES,
                jitter: true,
            },
            gateway: GatewayConfig {
                queue_capacity: gateway::DEFAULT_QUEUE_CAPACITY,
                max_batch_size: gateway::DEFAULT_MAX_BATCH_SIZE,
                index_entries_per_subject: gateway::DEFAULT_INDEX_ENTRIES_PER_SUBJECT,
            },
            http_client: HttpClientConfig {
                call_timeout: Duration::from_secs(http::DEFAULT_CALL_TIMEOUT_SECS),
                connect_timeout: Duration::from_secs(http::DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            retention: RetentionConfig {
                attempt_retention_days: retention::DEFAULT_ATTEMPT_RETENTION_DAYS,
                sweep_interval: Duration::from_secs(retention::DEFAULT_SWEEP_INTERVAL_SECS),
            },
            vendors: HashMap::new(),
            quota_overrides: HashMap::new(),
            secrets: SecretsConfig::default(),
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid
fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "invalid value in environment, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse_or(key, default.as_secs()))
}

fn env_bool_or(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| {
        !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
    })
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Environment variable prefix for a vendor (`FITBIT`, `APPLE_HEALTH`)
#[must_use]
pub fn vendor_env_prefix(kind: VendorKind) -> String {
    kind.as_str().to_ascii_uppercase()
}

fn vendor_client_from_env(kind: VendorKind) -> Option<VendorClientConfig> {
    let prefix = vendor_env_prefix(kind);
    let client_id = non_empty(&format!("{prefix}_CLIENT_ID"))?;
    Some(VendorClientConfig {
        client_id,
        client_secret: non_empty(&format!("{prefix}_CLIENT_SECRET")).unwrap_or_default(),
        redirect_uri: non_empty(&format!("{prefix}_REDIRECT_URI")).unwrap_or_default(),
        api_base_url: non_empty(&format!("{prefix}_API_BASE_URL")),
    })
}

fn quota_override_from_env(kind: VendorKind) -> Option<Quota> {
    let prefix = vendor_env_prefix(kind);
    let requests = non_empty(&format!("{prefix}_QUOTA_REQUESTS"))?.parse().ok()?;
    let window = env_parse_or(&format!("{prefix}_QUOTA_WINDOW_SECS"), 3600_u64);
    Some(Quota::per_secs(requests, window))
}

impl SyncEngineConfig {
    /// Load configuration from environment variables
    ///
    /// Unset or unparseable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        info!("Loading configuration from environment variables");
        let defaults = Self::default();

        let vendors: HashMap<_, _> = VendorKind::ALL
            .iter()
            .filter_map(|kind| vendor_client_from_env(*kind).map(|client| (*kind, client)))
            .collect();
        let quota_overrides: HashMap<_, _> = VendorKind::ALL
            .iter()
            .filter_map(|kind| quota_override_from_env(*kind).map(|quota| (*kind, quota)))
            .collect();

        let config = Self {
            database: DatabaseConfig {
                url: env::var(env_config::DATABASE_URL).unwrap_or(defaults.database.url),
            },
            server: ServerConfig {
                host: env::var(env_config::HTTP_HOST).unwrap_or(defaults.server.host),
                port: env_parse_or(env_config::HTTP_PORT, defaults.server.port),
            },
            scheduler: SchedulerConfig {
                tick_interval: env_secs_or(
                    "HEALTHSYNC_TICK_INTERVAL_SECS",
                    defaults.scheduler.tick_interval,
                ),
                worker_pool_size: env_parse_or(
                    "HEALTHSYNC_WORKER_POOL_SIZE",
                    defaults.scheduler.worker_pool_size,
                )
                .max(1),
                lease_timeout: env_secs_or(
                    "HEALTHSYNC_LEASE_TIMEOUT_SECS",
                    defaults.scheduler.lease_timeout,
                ),
                default_sync_interval: Duration::from_secs(
                    env_parse_or(
                        "HEALTHSYNC_SYNC_INTERVAL_MINUTES",
                        defaults.scheduler.default_sync_interval.as_secs() / 60,
                    ) * 60,
                ),
                default_window_days: env_parse_or(
                    "HEALTHSYNC_SYNC_WINDOW_DAYS",
                    defaults.scheduler.default_window_days,
                ),
                max_window_days: env_parse_or(
                    "HEALTHSYNC_MAX_SYNC_WINDOW_DAYS",
                    defaults.scheduler.max_window_days,
                ),
                overlap: Duration::from_secs(
                    env_parse_or(
                        "HEALTHSYNC_OVERLAP_HOURS",
                        defaults.scheduler.overlap.as_secs() / 3600,
                    ) * 3600,
                ),
                refresh_margin: env_secs_or(
                    "HEALTHSYNC_REFRESH_MARGIN_SECS",
                    defaults.scheduler.refresh_margin,
                ),
            },
            backoff: BackoffConfig {
                base_delay: env_secs_or(
                    "HEALTHSYNC_BACKOFF_BASE_SECS",
                    defaults.backoff.base_delay,
                ),
                factor: env_parse_or("HEALTHSYNC_BACKOFF_FACTOR", defaults.backoff.factor).max(1),
                max_delay: env_secs_or("HEALTHSYNC_BACKOFF_MAX_SECS", defaults.backoff.max_delay),
                max_consecutive_failures: env_parse_or(
                    "HEALTHSYNC_MAX_CONSECUTIVE_FAILURES",
                    defaults.backoff.max_consecutive_failures,
                ),
                jitter: env_bool_or("HEALTHSYNC_BACKOFF_JITTER", defaults.backoff.jitter),
            },
            gateway: GatewayConfig {
                queue_capacity: env_parse_or(
                    "HEALTHSYNC_GATEWAY_QUEUE_CAPACITY",
                    defaults.gateway.queue_capacity,
                )
                .max(1),
                max_batch_size: env_parse_or(
                    "HEALTHSYNC_GATEWAY_MAX_BATCH",
                    defaults.gateway.max_batch_size,
                ),
                index_entries_per_subject: env_parse_or(
                    "HEALTHSYNC_INDEX_ENTRIES_PER_SUBJECT",
                    defaults.gateway.index_entries_per_subject,
                )
                .max(1),
            },
            http_client: HttpClientConfig {
                call_timeout: env_secs_or(
                    "HEALTHSYNC_VENDOR_CALL_TIMEOUT_SECS",
                    defaults.http_client.call_timeout,
                ),
                connect_timeout: env_secs_or(
                    "HEALTHSYNC_VENDOR_CONNECT_TIMEOUT_SECS",
                    defaults.http_client.connect_timeout,
                ),
            },
            retention: RetentionConfig {
                attempt_retention_days: env_parse_or(
                    "HEALTHSYNC_ATTEMPT_RETENTION_DAYS",
                    defaults.retention.attempt_retention_days,
                ),
                sweep_interval: env_secs_or(
                    "HEALTHSYNC_RETENTION_SWEEP_SECS",
                    defaults.retention.sweep_interval,
                ),
            },
            vendors,
            quota_overrides,
            secrets: SecretsConfig {
                master_encryption_key: non_empty(env_config::MASTER_ENCRYPTION_KEY),
                relay_signing_secret: non_empty(env_config::RELAY_SIGNING_SECRET),
            },
        };

        config.log_warnings();
        info!("Configuration loaded successfully");
        config
    }

    fn log_warnings(&self) {
        if self.vendors.is_empty() {
            warn!("No vendor client registrations found; no device can be connected");
        }
        for (kind, client) in &self.vendors {
            if !client.is_complete() {
                warn!(vendor = kind.as_str(), "vendor is missing its client secret");
            }
        }
        if self.secrets.relay_signing_secret.is_none() {
            warn!("Relay signing secret not set; pushed payloads are accepted unsigned");
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            warn!("Backoff base delay exceeds its cap; every retry will wait the cap");
        }
    }

    /// One-line summary without secrets
    #[must_use]
    pub fn summary(&self) -> String {
        let mut vendors: Vec<&str> = self.vendors.keys().map(|kind| kind.as_str()).collect();
        vendors.sort_unstable();
        format!(
            "database={} http={}:{} tick={}s workers={} lease={}s queue={} vendors=[{}]",
            self.database.url,
            self.server.host,
            self.server.port,
            self.scheduler.tick_interval.as_secs(),
            self.scheduler.worker_pool_size,
            self.scheduler.lease_timeout.as_secs(),
            self.gateway.queue_capacity,
            vendors.join(",")
        )
    }
}
