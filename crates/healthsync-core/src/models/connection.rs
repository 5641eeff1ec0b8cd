// ABOUTME: DeviceConnection model linking one subject to one vendor account
// ABOUTME: Carries sync state, lease fields, and the due-for-sync predicate used by the scheduler
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported device vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    /// Fitbit Web API
    Fitbit,
    /// Garmin Connect Health API
    Garmin,
    /// Withings Public API
    Withings,
    /// Apple Health, delivered by a mobile relay
    AppleHealth,
}

impl VendorKind {
    /// Every supported vendor
    pub const ALL: [Self; 4] = [Self::Fitbit, Self::Garmin, Self::Withings, Self::AppleHealth];

    /// Stable lowercase identifier used in storage and URLs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fitbit => "fitbit",
            Self::Garmin => "garmin",
            Self::Withings => "withings",
            Self::AppleHealth => "apple_health",
        }
    }
}

impl fmt::Display for VendorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fitbit" => Ok(Self::Fitbit),
            "garmin" => Ok(Self::Garmin),
            "withings" => Ok(Self::Withings),
            "apple_health" | "apple" | "apple_watch" | "applehealth" => Ok(Self::AppleHealth),
            other => Err(format!("unsupported vendor: {other}")),
        }
    }
}

/// Current sync status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No attempt in flight
    Idle,
    /// An executor holds the connection lease
    Syncing,
    /// Needs user action (reconnect) or operator attention
    Error,
}

impl ConnectionStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown connection status: {other}")),
        }
    }
}

/// Stored authorization plus sync state for one (subject, vendor, external account)
///
/// Secrets are not part of this struct; they live encrypted in the credential
/// columns and are only materialized through the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnection {
    /// Connection identifier
    pub id: Uuid,
    /// Family member the data belongs to
    pub subject_id: String,
    /// Device vendor
    pub vendor: VendorKind,
    /// Vendor-side account identifier, when the vendor reports one
    pub external_account_id: Option<String>,
    /// When the access credential stops working
    pub credential_expires_at: Option<DateTime<Utc>>,
    /// Whether scheduled syncs run for this connection
    pub sync_enabled: bool,
    /// Minimum spacing between scheduled syncs, in seconds
    pub sync_interval_secs: i64,
    /// End of the last successfully synced window
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: ConnectionStatus,
    /// Last failure surfaced to the user
    pub last_error: Option<String>,
    /// Attempt currently holding the lease
    pub lease_owner: Option<Uuid>,
    /// When the current lease may be reclaimed
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Earliest time a backed-off connection may run again
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Transient failures since the last success
    pub consecutive_failures: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl DeviceConnection {
    /// Sync interval as a duration
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::seconds(self.sync_interval_secs)
    }

    /// Whether a `syncing` lease has run past its expiry
    #[must_use]
    pub fn lease_is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == ConnectionStatus::Syncing
            && self.lease_expires_at.map_or(true, |expiry| expiry <= now)
    }

    /// Whether the scheduler should dispatch this connection at `now`
    ///
    /// Enabled, interval elapsed since the last successful sync, not held by a
    /// live lease, past any backoff deadline, and not parked in `error`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.sync_enabled || self.status == ConnectionStatus::Error {
            return false;
        }
        if self.status == ConnectionStatus::Syncing && !self.lease_is_stale(now) {
            return false;
        }
        if self.next_attempt_at.is_some_and(|at| at > now) {
            return false;
        }
        self.last_sync_at
            .map_or(true, |last| now - last >= self.sync_interval())
    }
}
