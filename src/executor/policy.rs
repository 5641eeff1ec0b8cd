// ABOUTME: Failure classification and connection settlement after a sync attempt
// ABOUTME: Decides idle vs error, the backoff deadline, and the failure streak to persist
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use healthsync_core::errors::{AppError, ProviderError};
use healthsync_core::models::{ConnectionStatus, DeviceConnection, FailureReason, TimeRange};

use crate::credentials::CredentialError;
use crate::database::ConnectionRelease;
use crate::pipeline::{PipelineFailure, ProcessReport};
use crate::rate_limiting::BackoffController;

/// Why an attempt stopped short of completing
#[derive(Debug, Clone)]
pub struct SyncFailure {
    /// Recorded failure reason
    pub reason: FailureReason,
    /// Detail for the attempt and `last_error`
    pub detail: String,
    /// Counts for pages processed before the failure
    pub partial: ProcessReport,
    /// Vendor or limiter supplied wait
    pub retry_after: Option<Duration>,
    /// Our own limiter refused the call; no vendor was contacted
    pub local_denial: bool,
}

impl SyncFailure {
    /// Failure with no partial progress
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            partial: ProcessReport::default(),
            retry_after: None,
            local_denial: false,
        }
    }

    /// Local rate limiter denial
    #[must_use]
    pub fn rate_denied(retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            local_denial: true,
            ..Self::new(
                FailureReason::RateLimited,
                "vendor quota exhausted locally; call deferred",
            )
        }
    }

    /// Cooperative cancellation
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(FailureReason::Cancelled, "sync cancelled")
    }

    /// Failure reported by a vendor adapter
    #[must_use]
    pub fn from_provider(error: &ProviderError) -> Self {
        Self {
            retry_after: error.retry_after(),
            ..Self::new(classify(error), error.to_string())
        }
    }

    /// Failure of the credential store
    #[must_use]
    pub fn from_credential(error: &CredentialError) -> Self {
        match error {
            CredentialError::RefreshFailed(provider) if provider.is_retryable() => {
                Self::from_provider(provider)
            }
            CredentialError::RefreshFailed(_) | CredentialError::NotFound(_) => {
                Self::new(FailureReason::AuthExpired, error.to_string())
            }
            CredentialError::Storage(_) => Self::new(FailureReason::Storage, error.to_string()),
        }
    }

    /// Canonical store failure mid batch
    #[must_use]
    pub fn from_pipeline(failure: PipelineFailure) -> Self {
        Self {
            partial: failure.partial,
            ..Self::storage(&failure.error)
        }
    }

    /// Local persistence failure
    #[must_use]
    pub fn storage(error: &AppError) -> Self {
        Self::new(FailureReason::Storage, error.to_string())
    }

    /// Attach the counts processed so far
    #[must_use]
    pub fn with_partial(mut self, partial: ProcessReport) -> Self {
        self.partial = partial;
        self
    }
}

/// Failure reason for an adapter error
#[must_use]
pub const fn classify(error: &ProviderError) -> FailureReason {
    match error {
        ProviderError::AuthExpired { .. } | ProviderError::AuthorizationFailed { .. } => {
            FailureReason::AuthExpired
        }
        ProviderError::RateLimited { .. } => FailureReason::RateLimited,
        ProviderError::TransientNetwork { .. } | ProviderError::Api { .. } => {
            FailureReason::TransientNetwork
        }
        ProviderError::MalformedPayload { .. } => FailureReason::MalformedPayload,
        ProviderError::UnsupportedFeature { .. } | ProviderError::Configuration { .. } => {
            FailureReason::Unsupported
        }
    }
}

/// Connection state after a completed attempt
#[must_use]
pub const fn settle_success(range: TimeRange) -> ConnectionRelease {
    ConnectionRelease {
        status: ConnectionStatus::Idle,
        last_error: None,
        last_sync_at: Some(range.end),
        next_attempt_at: None,
        consecutive_failures: 0,
    }
}

/// Connection state after a failed attempt
///
/// Failures that cannot heal park the connection in `error` until the user
/// reconnects. Counted failures back off and park once the streak reaches the
/// configured budget. Cancellation and local limiter denials leave the streak
/// alone.
pub fn settle_failure(
    failure: &SyncFailure,
    connection: &DeviceConnection,
    backoff: &BackoffController,
    now: DateTime<Utc>,
) -> ConnectionRelease {
    let keep = ConnectionRelease {
        status: ConnectionStatus::Idle,
        last_error: connection.last_error.clone(),
        last_sync_at: None,
        next_attempt_at: None,
        consecutive_failures: connection.consecutive_failures,
    };

    if !failure.reason.is_self_healing() {
        return ConnectionRelease {
            status: ConnectionStatus::Error,
            last_error: Some(failure.detail.clone()),
            ..keep
        };
    }

    if failure.reason == FailureReason::Cancelled {
        return keep;
    }

    if failure.local_denial {
        return ConnectionRelease {
            next_attempt_at: failure.retry_after.map(|wait| after(now, wait)),
            ..keep
        };
    }

    let streak = connection.consecutive_failures.saturating_add(1);
    let budget = backoff.config().max_consecutive_failures.max(1);
    if streak >= budget {
        return ConnectionRelease {
            status: ConnectionStatus::Error,
            last_error: Some(format!(
                "{} (gave up after {streak} consecutive failures)",
                failure.detail
            )),
            consecutive_failures: streak,
            ..keep
        };
    }

    let mut delay = backoff.record_failure(connection.vendor);
    if let Some(wait) = failure.retry_after {
        delay = delay.max(wait);
    }
    ConnectionRelease {
        status: ConnectionStatus::Idle,
        last_error: Some(failure.detail.clone()),
        last_sync_at: None,
        next_attempt_at: Some(after(now, delay)),
        consecutive_failures: streak,
    }
}

fn after(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(wait)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncEngineConfig;
    use healthsync_core::models::VendorKind;
    use uuid::Uuid;

    fn connection(failures: u32) -> DeviceConnection {
        let now = Utc::now();
        DeviceConnection {
            id: Uuid::new_v4(),
            subject_id: "member-1".to_owned(),
            vendor: VendorKind::Fitbit,
            external_account_id: None,
            credential_expires_at: None,
            sync_enabled: true,
            sync_interval_secs: 900,
            last_sync_at: None,
            status: ConnectionStatus::Syncing,
            last_error: None,
            lease_owner: None,
            lease_expires_at: None,
            next_attempt_at: None,
            consecutive_failures: failures,
            created_at: now,
            updated_at: now,
        }
    }

    fn backoff() -> BackoffController {
        BackoffController::new(SyncEngineConfig::default().backoff)
    }

    #[test]
    fn test_transient_failure_backs_off() {
        let now = Utc::now();
        let failure = SyncFailure::new(FailureReason::TransientNetwork, "reset");
        let release = settle_failure(&failure, &connection(0), &backoff(), now);

        assert_eq!(release.status, ConnectionStatus::Idle);
        assert_eq!(release.consecutive_failures, 1);
        assert!(release.next_attempt_at.is_some_and(|at| at > now));
    }

    #[test]
    fn test_budget_exhaustion_parks_connection() {
        let controller = backoff();
        let budget = controller.config().max_consecutive_failures;
        let failure = SyncFailure::new(FailureReason::TransientNetwork, "reset");
        let release = settle_failure(&failure, &connection(budget - 1), &controller, Utc::now());
        assert_eq!(release.status, ConnectionStatus::Error);
    }

    #[test]
    fn test_local_denial_does_not_count() {
        let failure = SyncFailure::rate_denied(Duration::from_secs(30));
        let release = settle_failure(&failure, &connection(2), &backoff(), Utc::now());
        assert_eq!(release.status, ConnectionStatus::Idle);
        assert_eq!(release.consecutive_failures, 2);
        assert!(release.next_attempt_at.is_some());
    }

    #[test]
    fn test_auth_failure_needs_reconnect() {
        let failure = SyncFailure::new(FailureReason::AuthExpired, "revoked");
        let release = settle_failure(&failure, &connection(0), &backoff(), Utc::now());
        assert_eq!(release.status, ConnectionStatus::Error);
        assert_eq!(release.last_error.as_deref(), Some("revoked"));
    }
}
