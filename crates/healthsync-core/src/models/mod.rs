// ABOUTME: Domain models shared by the synchronization engine and vendor adapters
// ABOUTME: Re-exports connection, attempt, record, and credential types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Domain models.

/// Device connections and vendor kinds
pub mod connection;

/// Sync attempts and their state machine
pub mod attempt;

/// Raw vendor points and canonical health records
pub mod record;

/// OAuth credentials and authorization grants
pub mod credential;

pub use attempt::{
    AttemptOutcome, FailureReason, InvalidTransition, SyncAttempt, SyncTrigger, TimeRange,
};
pub use connection::{ConnectionStatus, DeviceConnection, VendorKind};
pub use credential::{AuthorizationGrant, AuthorizationRequest, OAuthCredential};
pub use record::{
    CanonicalHealthRecord, CanonicalUnit, Fingerprint, Granularity, MetricKind, MetricValue,
    RawDataPoint, RawValue,
};
