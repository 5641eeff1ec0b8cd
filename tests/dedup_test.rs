// ABOUTME: Tests for the fingerprint dedup index and the ingestion pipeline counts
// ABOUTME: Uses an in-memory record store to observe which offers reach storage
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(missing_docs, clippy::unwrap_used)]

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{create_test_database, day, fitbit_steps};
use healthsync::dedup::{Acceptance, DedupIndex};
use healthsync::mapper::{map, MappingContext};
use healthsync::pipeline::IngestionPipeline;
use healthsync::store::HealthRecordStore;
use healthsync_core::errors::{AppError, AppResult, ErrorCode};
use healthsync_core::models::{
    CanonicalHealthRecord, Fingerprint, MetricKind, MetricValue, RawDataPoint, RawValue,
    VendorKind,
};
use uuid::Uuid;

#[derive(Default)]
struct MemoryStore {
    revisions: Mutex<HashSet<(Fingerprint, String)>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

#[async_trait]
impl HealthRecordStore for MemoryStore {
    async fn insert_if_absent(&self, record: &CanonicalHealthRecord) -> AppResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::database("store offline"));
        }
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .insert((record.fingerprint.clone(), record.value.digest())))
    }
}

impl MemoryStore {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn resting_heart_rate(
    subject_id: &str,
    connection_id: Uuid,
    offset: i64,
) -> CanonicalHealthRecord {
    let point = RawDataPoint::new(
        VendorKind::Fitbit,
        "heart.restingHeartRate",
        day(offset),
        RawValue::number(60.0),
    );
    let context = MappingContext {
        subject_id,
        connection_id,
    };
    map(VendorKind::Fitbit, &point, context).unwrap().remove(0)
}

#[tokio::test]
async fn test_recent_fingerprints_short_circuit_the_store() {
    let store = Arc::new(MemoryStore::default());
    let index = DedupIndex::new(Arc::clone(&store) as Arc<dyn HealthRecordStore>, 16);
    let record = resting_heart_rate("member-1", Uuid::new_v4(), 0);

    assert_eq!(index.accept(&record).await.unwrap(), Acceptance::Inserted);
    assert_eq!(index.accept(&record).await.unwrap(), Acceptance::DuplicateSkipped);
    assert_eq!(store.calls(), 1);
    assert_eq!(index.remembered("member-1"), 1);
}

#[tokio::test]
async fn test_evicted_fingerprint_is_still_a_duplicate() {
    let store = Arc::new(MemoryStore::default());
    let index = DedupIndex::new(Arc::clone(&store) as Arc<dyn HealthRecordStore>, 2);
    let connection = Uuid::new_v4();
    let records: Vec<_> = (0..3)
        .map(|offset| resting_heart_rate("member-1", connection, offset))
        .collect();

    for record in &records {
        assert_eq!(index.accept(record).await.unwrap(), Acceptance::Inserted);
    }
    assert_eq!(index.remembered("member-1"), 2);

    // The oldest fingerprint fell out of memory; the store still refuses it
    assert_eq!(
        index.accept(&records[0]).await.unwrap(),
        Acceptance::DuplicateSkipped
    );
    assert_eq!(store.calls(), 4);
}

#[tokio::test]
async fn test_subjects_and_devices_do_not_collide() {
    let store = Arc::new(MemoryStore::default());
    let index = DedupIndex::new(Arc::clone(&store) as Arc<dyn HealthRecordStore>, 16);
    let watch = Uuid::new_v4();
    let scale = Uuid::new_v4();

    let same_instant = [
        resting_heart_rate("member-1", watch, 0),
        resting_heart_rate("member-1", scale, 0),
        resting_heart_rate("member-2", watch, 0),
    ];
    for record in &same_instant {
        assert_eq!(index.accept(record).await.unwrap(), Acceptance::Inserted);
    }
    assert_eq!(index.remembered("member-1"), 2);
    assert_eq!(index.remembered("member-2"), 1);
}

#[tokio::test]
async fn test_store_failure_is_not_remembered() {
    let store = Arc::new(MemoryStore::default());
    let index = DedupIndex::new(Arc::clone(&store) as Arc<dyn HealthRecordStore>, 16);
    let record = resting_heart_rate("member-1", Uuid::new_v4(), 0);

    store.failing.store(true, Ordering::SeqCst);
    let err = index.accept(&record).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DatabaseError);
    assert_eq!(index.remembered("member-1"), 0);

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(index.accept(&record).await.unwrap(), Acceptance::Inserted);
}

#[tokio::test]
async fn test_pipeline_counts_per_point_and_stores_derived_records() {
    let database = create_test_database().await;
    let index = Arc::new(DedupIndex::new(Arc::new(database.clone()), 100));
    let pipeline = IngestionPipeline::new(index);
    let context = MappingContext {
        subject_id: "member-1",
        connection_id: Uuid::new_v4(),
    };

    let batch = fitbit_steps(&[(0, 8000.0), (1, 0.0), (2, 4000.0)]);
    let report = pipeline
        .process_batch(VendorKind::Fitbit, context, &batch)
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.invalid, 1);
    assert_eq!(report.total(), 3);

    // Two step records plus their exercise-minute estimates
    assert_eq!(database.count_records(Some("member-1")).await.unwrap(), 4);

    let replay = pipeline
        .process_batch(VendorKind::Fitbit, context, &batch)
        .await
        .unwrap();
    assert_eq!(replay.inserted, 0);
    assert_eq!(replay.duplicates, 2);
    assert_eq!(database.count_records(Some("member-1")).await.unwrap(), 4);
}

#[tokio::test]
async fn test_pipeline_failure_keeps_partial_counts() {
    let store = Arc::new(MemoryStore::default());
    let index = Arc::new(DedupIndex::new(
        Arc::clone(&store) as Arc<dyn HealthRecordStore>,
        16,
    ));
    let pipeline = IngestionPipeline::new(index);
    let context = MappingContext {
        subject_id: "member-1",
        connection_id: Uuid::new_v4(),
    };

    pipeline
        .process_batch(VendorKind::Fitbit, context, &fitbit_steps(&[(0, 100.0)]))
        .await
        .unwrap();

    store.failing.store(true, Ordering::SeqCst);
    let failure = pipeline
        .process_batch(
            VendorKind::Fitbit,
            context,
            &fitbit_steps(&[(0, 100.0), (5, 200.0)]),
        )
        .await
        .unwrap_err();
    assert_eq!(failure.partial.duplicates, 1);
    assert_eq!(failure.partial.inserted, 0);
    assert_eq!(failure.error.code, ErrorCode::DatabaseError);
}

#[tokio::test]
async fn test_database_store_is_idempotent_by_fingerprint() {
    let database = create_test_database().await;
    let record = resting_heart_rate("member-1", Uuid::new_v4(), 3);

    assert!(database.insert_if_absent(&record).await.unwrap());
    assert!(!database.insert_if_absent(&record).await.unwrap());
    assert_eq!(database.count_records(Some("member-1")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_new_value_in_the_same_bucket_is_a_new_revision() {
    let store = Arc::new(MemoryStore::default());
    let index = DedupIndex::new(Arc::clone(&store) as Arc<dyn HealthRecordStore>, 16);
    let morning = resting_heart_rate("member-1", Uuid::new_v4(), 0);
    let corrected = CanonicalHealthRecord {
        value: MetricValue::Scalar(58.0),
        ..morning.clone()
    };

    assert_eq!(index.accept(&morning).await.unwrap(), Acceptance::Inserted);
    assert_eq!(index.accept(&corrected).await.unwrap(), Acceptance::Inserted);
    assert_eq!(
        index.accept(&corrected).await.unwrap(),
        Acceptance::DuplicateSkipped
    );
    assert_eq!(store.calls(), 2);
    assert_eq!(index.remembered("member-1"), 2);
}

#[tokio::test]
async fn test_growing_daily_total_is_appended_not_dropped() {
    let database = create_test_database().await;
    let index = Arc::new(DedupIndex::new(Arc::new(database.clone()), 100));
    let pipeline = IngestionPipeline::new(index);
    let context = MappingContext {
        subject_id: "member-1",
        connection_id: Uuid::new_v4(),
    };

    let partial = pipeline
        .process_batch(VendorKind::Fitbit, context, &fitbit_steps(&[(0, 3000.0)]))
        .await
        .unwrap();
    assert_eq!(partial.inserted, 1);

    // The overlap window fetches the same day again with the full total
    let full_day = fitbit_steps(&[(0, 10_000.0)]);
    let total = pipeline
        .process_batch(VendorKind::Fitbit, context, &full_day)
        .await
        .unwrap();
    assert_eq!(total.inserted, 1);
    assert_eq!(total.duplicates, 0);

    let replay = pipeline
        .process_batch(VendorKind::Fitbit, context, &full_day)
        .await
        .unwrap();
    assert_eq!(replay.inserted, 0);
    assert_eq!(replay.duplicates, 1);

    let history: Vec<_> = database
        .list_records("member-1", MetricKind::Steps)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.value)
        .collect();
    assert_eq!(
        history,
        vec![MetricValue::Scalar(3000.0), MetricValue::Scalar(10_000.0)]
    );

    let latest = database
        .latest_records("member-1", MetricKind::Steps)
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].value, MetricValue::Scalar(10_000.0));
}
