// ABOUTME: Engine-wide default values and environment variable names
// ABOUTME: Single source of truth for tick intervals, windows, quotas, and backoff bounds
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Default values used when the environment does not override them.

/// Scheduling defaults
pub mod scheduling {
    /// Seconds between scheduler ticks
    pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
    /// Concurrent sync attempts across all connections
    pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;
    /// Sync interval assigned to new connections, in minutes
    pub const DEFAULT_SYNC_INTERVAL_MINUTES: i64 = 15;
    /// Lease held on a `syncing` connection before it may be reclaimed, in seconds
    pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 600;
    /// Window used by manual syncs and first syncs, in days
    pub const DEFAULT_SYNC_WINDOW_DAYS: u32 = 7;
    /// Maximum window accepted by a manual sync, in days
    pub const MAX_SYNC_WINDOW_DAYS: u32 = 90;
    /// Overlap with the previous successful sync, in hours
    pub const DEFAULT_OVERLAP_HOURS: i64 = 24;
    /// Refresh credentials this many seconds before they expire
    pub const CREDENTIAL_REFRESH_MARGIN_SECS: i64 = 300;
}

/// Backoff defaults
pub mod backoff {
    /// First retry delay in seconds
    pub const DEFAULT_BASE_DELAY_SECS: u64 = 2;
    /// Growth factor between consecutive failures
    pub const DEFAULT_FACTOR: u32 = 2;
    /// Upper bound on any retry delay, in seconds (15 minutes)
    pub const DEFAULT_MAX_DELAY_SECS: u64 = 900;
    /// Consecutive transient failures tolerated before a connection is parked in `error`
    pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
}

/// Streaming gateway defaults
pub mod gateway {
    /// Queued ingestion jobs before new submissions see backpressure
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
    /// Largest batch accepted in one push
    pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;
    /// Fingerprints remembered per subject by the in-memory index
    pub const DEFAULT_INDEX_ENTRIES_PER_SUBJECT: usize = 50_000;
    /// Store passes over one queued job before it is recorded as a failed push
    pub const STORE_ATTEMPTS: u32 = 3;
    /// Pause between store passes over one job, in milliseconds
    pub const STORE_RETRY_DELAY_MS: u64 = 200;
}

/// HTTP client defaults for vendor calls
pub mod http {
    /// Deadline for a single vendor call, in seconds
    pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
    /// TCP connect timeout, in seconds
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
}

/// Retention defaults
pub mod retention {
    /// Terminal sync attempts older than this are pruned, in days
    pub const DEFAULT_ATTEMPT_RETENTION_DAYS: i64 = 90;
    /// Seconds between retention sweeps
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
}

/// Mapping constants
pub mod mapping {
    /// Steps counted as one minute of exercise when deriving exercise minutes
    pub const STEPS_PER_EXERCISE_MINUTE: u64 = 20;
    /// Millimoles per litre to milligrams per decilitre for blood glucose
    pub const GLUCOSE_MMOL_TO_MG_DL: f64 = 18.0;
    /// Pounds to kilograms
    pub const POUNDS_TO_KG: f64 = 0.453_592_37;
}

/// Environment variable names
pub mod env_config {
    /// Database connection URL
    pub const DATABASE_URL: &str = "DATABASE_URL";
    /// Base64 encoded 32-byte master key for credential encryption
    pub const MASTER_ENCRYPTION_KEY: &str = "HEALTHSYNC_MASTER_ENCRYPTION_KEY";
    /// Shared secret used to verify relay signatures on pushed payloads
    pub const RELAY_SIGNING_SECRET: &str = "HEALTHSYNC_RELAY_SIGNING_SECRET";
    /// HTTP bind host
    pub const HTTP_HOST: &str = "HTTP_HOST";
    /// HTTP port
    pub const HTTP_PORT: &str = "HTTP_PORT";
}

/// Service identity used in logs
pub mod service_names {
    /// Default service name
    pub const HEALTHSYNC_SERVER: &str = "healthsync-server";
}
