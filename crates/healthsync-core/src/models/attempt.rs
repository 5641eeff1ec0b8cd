// ABOUTME: SyncAttempt audit record and its pending/running/completed/failed state machine
// ABOUTME: Transitions are validated so terminal attempts can never be mutated again
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Sync attempts
//!
//! One [`SyncAttempt`] is created per executor run. It starts `pending`, becomes
//! `running` once the lease and a rate permit are held, and ends `completed` or
//! `failed`. An attempt may also fail straight from `pending` when it is cancelled
//! or denied a rate permit before any vendor call is made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::connection::VendorKind;

/// Half-open window `[start, end)` requested from a vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, swapping the bounds when given in reverse
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Whether `instant` falls inside the range
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// What started an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Picked by the scheduler tick
    Scheduled,
    /// Requested through the trigger surface
    Manual,
    /// Relay-pushed job the gateway could not finish storing
    Push,
}

impl SyncTrigger {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Push => "push",
        }
    }
}

impl FromStr for SyncTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown sync trigger: {other}")),
        }
    }
}

/// Attempt lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Created, waiting for lease and rate permit
    Pending,
    /// Vendor calls in progress
    Running,
    /// Every fetched point was accepted or counted as duplicate/invalid
    Completed,
    /// Ended without completing; see the failure reason
    Failed,
}

impl AttemptOutcome {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are allowed
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown attempt outcome: {other}")),
        }
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Credential unrecoverable after one refresh
    AuthExpired,
    /// Vendor or local quota exhausted
    RateLimited,
    /// Network failure or vendor call deadline exceeded
    TransientNetwork,
    /// Nothing in the vendor response could be parsed
    MalformedPayload,
    /// Stopped on shutdown or disconnect
    Cancelled,
    /// A newer attempt reclaimed the connection after the lease ran out
    LeaseExpired,
    /// Canonical store rejected a write
    Storage,
    /// Vendor does not support pull syncs
    Unsupported,
}

impl FailureReason {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthExpired => "auth_expired",
            Self::RateLimited => "rate_limited",
            Self::TransientNetwork => "transient_network",
            Self::MalformedPayload => "malformed_payload",
            Self::Cancelled => "cancelled",
            Self::LeaseExpired => "lease_expired",
            Self::Storage => "storage",
            Self::Unsupported => "unsupported",
        }
    }

    /// Whether the failure clears without user action
    #[must_use]
    pub const fn is_self_healing(self) -> bool {
        !matches!(self, Self::AuthExpired | Self::Unsupported)
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auth_expired" => Ok(Self::AuthExpired),
            "rate_limited" => Ok(Self::RateLimited),
            "transient_network" => Ok(Self::TransientNetwork),
            "malformed_payload" => Ok(Self::MalformedPayload),
            "cancelled" => Ok(Self::Cancelled),
            "lease_expired" => Ok(Self::LeaseExpired),
            "storage" => Ok(Self::Storage),
            "unsupported" => Ok(Self::Unsupported),
            other => Err(format!("unknown failure reason: {other}")),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid attempt transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// Current state
    pub from: AttemptOutcome,
    /// Requested state
    pub to: AttemptOutcome,
}

/// One execution of fetch, map, dedup, and store for a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttempt {
    /// Attempt identifier
    pub id: Uuid,
    /// Owning connection
    pub connection_id: Uuid,
    /// Vendor of the owning connection
    pub vendor: VendorKind,
    /// Requested window
    pub range: TimeRange,
    /// Who started the attempt
    pub trigger: SyncTrigger,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Time a terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,
    /// Current state
    pub outcome: AttemptOutcome,
    /// Records newly inserted into the canonical store
    pub records_synced: u32,
    /// Records rejected as duplicates
    pub duplicates_skipped: u32,
    /// Points dropped as unmappable or invalid
    pub invalid_skipped: u32,
    /// Failure reason for `failed` attempts
    pub failure_reason: Option<FailureReason>,
    /// Failure detail for `failed` attempts
    pub error_detail: Option<String>,
}

impl SyncAttempt {
    /// New `pending` attempt
    #[must_use]
    pub fn pending(
        connection_id: Uuid,
        vendor: VendorKind,
        range: TimeRange,
        trigger: SyncTrigger,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection_id,
            vendor,
            range,
            trigger,
            started_at: now,
            completed_at: None,
            outcome: AttemptOutcome::Pending,
            records_synced: 0,
            duplicates_skipped: 0,
            invalid_skipped: 0,
            failure_reason: None,
            error_detail: None,
        }
    }

    fn transition(&mut self, next: AttemptOutcome) -> Result<(), InvalidTransition> {
        if !self.outcome.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.outcome,
                to: next,
            });
        }
        self.outcome = next;
        Ok(())
    }

    /// `pending -> running`
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the attempt is `pending`
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(AttemptOutcome::Running)
    }

    /// `running -> completed`, recording the pipeline counts
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the attempt is `running`
    pub fn complete(
        &mut self,
        records_synced: u32,
        duplicates_skipped: u32,
        invalid_skipped: u32,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(AttemptOutcome::Completed)?;
        self.records_synced = records_synced;
        self.duplicates_skipped = duplicates_skipped;
        self.invalid_skipped = invalid_skipped;
        self.completed_at = Some(now);
        Ok(())
    }

    /// `pending|running -> failed`
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the attempt is already terminal
    pub fn fail(
        &mut self,
        reason: FailureReason,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(AttemptOutcome::Failed)?;
        self.failure_reason = Some(reason);
        self.error_detail = Some(detail.into());
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn attempt() -> SyncAttempt {
        let now = Utc::now();
        SyncAttempt::pending(
            Uuid::new_v4(),
            VendorKind::Withings,
            TimeRange::new(now - Duration::days(1), now),
            SyncTrigger::Scheduled,
            now,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut attempt = attempt();
        attempt.start().unwrap();
        attempt.complete(3, 1, 0, Utc::now()).unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::Completed);
        assert_eq!(attempt.records_synced, 3);
    }

    #[test]
    fn test_terminal_attempt_rejects_changes() {
        let mut attempt = attempt();
        attempt.start().unwrap();
        attempt
            .fail(FailureReason::TransientNetwork, "timeout", Utc::now())
            .unwrap();
        assert!(attempt.start().is_err());
        assert!(attempt.complete(1, 0, 0, Utc::now()).is_err());
        assert_eq!(attempt.failure_reason, Some(FailureReason::TransientNetwork));
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut attempt = attempt();
        let err = attempt.complete(0, 0, 0, Utc::now()).unwrap_err();
        assert_eq!(err.from, AttemptOutcome::Pending);
    }
}
