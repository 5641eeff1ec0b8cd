// ABOUTME: Canonical health record store boundary used by the ingestion pipeline
// ABOUTME: insert_if_absent is idempotent per fingerprint and value, reporting any added row
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! The canonical record store belongs to the host application; the engine only
//! proposes inserts through this trait. [`Database`](crate::database::Database)
//! implements it with a unique `(fingerprint, value_digest)` key, which is the
//! storage-level backstop behind the in-memory dedup index. Records are never
//! updated; a superseding value for a bucket is a new row.

use async_trait::async_trait;
use healthsync_core::errors::AppResult;
use healthsync_core::models::CanonicalHealthRecord;

/// Sink for canonical health records
#[async_trait]
pub trait HealthRecordStore: Send + Sync {
    /// Insert `record` unless one with the same fingerprint and value exists
    ///
    /// Returns `true` when the record was newly inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable
    async fn insert_if_absent(&self, record: &CanonicalHealthRecord) -> AppResult<bool>;
}
