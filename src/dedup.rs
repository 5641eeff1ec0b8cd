// ABOUTME: Fingerprint dedup index in front of the canonical record store
// ABOUTME: Bounded per-subject memory of accepted revisions backed by the store's unique key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Dedup Index
//!
//! Fingerprints already include the source connection, so two devices reporting
//! the same metric at the same instant never collide; only replays from the
//! same connection do. A revision is a fingerprint plus the value digest: an
//! identical replay is a duplicate, while a new value for the same bucket (a
//! daily total that kept growing) is stored as the next revision.
//!
//! The in-memory part is an LRU per subject that short-circuits replays of
//! recent windows. Authority stays with the store's `insert_if_absent`, so a
//! cold or evicted cache only costs a database round trip, never a duplicate.

use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use healthsync_core::errors::AppResult;
use healthsync_core::models::{CanonicalHealthRecord, Fingerprint};
use lru::LruCache;

use crate::store::HealthRecordStore;

/// Result of offering a record to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Newly stored
    Inserted,
    /// Already stored earlier
    DuplicateSkipped,
}

/// Fingerprint and value digest of one stored record
type Revision = (Fingerprint, String);

/// Per-subject fingerprint index over a record store
pub struct DedupIndex {
    store: Arc<dyn HealthRecordStore>,
    recent: DashMap<String, LruCache<Revision, ()>>,
    entries_per_subject: NonZeroUsize,
}

impl DedupIndex {
    /// Index remembering up to `entries_per_subject` revisions per subject
    #[must_use]
    pub fn new(store: Arc<dyn HealthRecordStore>, entries_per_subject: usize) -> Self {
        Self {
            store,
            recent: DashMap::new(),
            entries_per_subject: NonZeroUsize::new(entries_per_subject)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Store `record` unless the same value was accepted for its fingerprint before
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; the record is then not remembered
    pub async fn accept(&self, record: &CanonicalHealthRecord) -> AppResult<Acceptance> {
        if self.seen(record) {
            return Ok(Acceptance::DuplicateSkipped);
        }

        let inserted = self.store.insert_if_absent(record).await?;
        self.remember(record);

        Ok(if inserted {
            Acceptance::Inserted
        } else {
            Acceptance::DuplicateSkipped
        })
    }

    fn seen(&self, record: &CanonicalHealthRecord) -> bool {
        let revision = revision(record);
        self.recent
            .get_mut(&record.subject_id)
            .is_some_and(|mut cache| cache.get(&revision).is_some())
    }

    fn remember(&self, record: &CanonicalHealthRecord) {
        self.recent
            .entry(record.subject_id.clone())
            .or_insert_with(|| LruCache::new(self.entries_per_subject))
            .put(revision(record), ());
    }

    /// Revisions currently remembered for `subject_id`
    #[must_use]
    pub fn remembered(&self, subject_id: &str) -> usize {
        self.recent.get(subject_id).map_or(0, |cache| cache.len())
    }
}

fn revision(record: &CanonicalHealthRecord) -> Revision {
    (record.fingerprint.clone(), record.value.digest())
}
