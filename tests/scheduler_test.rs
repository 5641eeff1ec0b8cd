// ABOUTME: Integration tests for scheduler ticks selecting and dispatching due connections
// ABOUTME: Covers interval checks, skipped connections, worker slots, and overlapping ticks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(missing_docs, clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use common::{connect, engine_with, fitbit_steps, test_config, ScriptedAdapter};
use healthsync::database::ConnectionRelease;
use healthsync::engine::SyncEngine;
use healthsync_core::models::{
    AttemptOutcome, ConnectionStatus, FailureReason, SyncTrigger, VendorKind,
};
use uuid::Uuid;

async fn mark_synced(
    engine: &SyncEngine,
    id: Uuid,
    at: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
) {
    let database = engine.database();
    let owner = Uuid::new_v4();
    assert!(database
        .claim_connection(id, owner, at, at + TimeDelta::minutes(1))
        .await
        .unwrap());
    let release = ConnectionRelease {
        status: ConnectionStatus::Idle,
        last_error: None,
        last_sync_at: Some(at),
        next_attempt_at: next,
        consecutive_failures: 0,
    };
    assert!(database.release_connection(id, owner, &release, at).await.unwrap());
}

#[tokio::test]
async fn test_due_connection_is_synced_on_tick() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;
    assert_eq!(connection.sync_interval_secs, 15 * 60);

    let now = Utc::now();
    mark_synced(&engine, connection.id, now - TimeDelta::minutes(20), None).await;
    adapter.script_fetch(vec![Ok(fitbit_steps(&[(0, 8000.0), (1, 6000.0)]))]);

    let report = engine.scheduler().tick(now).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.dispatched, 1);
    engine.scheduler().drain().await;

    let attempts = engine.attempts(connection.id, 10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].trigger, SyncTrigger::Scheduled);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Completed);
    assert_eq!(attempts[0].records_synced, 2);

    // The scheduled window overlaps the previous sync
    assert!(attempts[0].range.start < now - TimeDelta::minutes(20));

    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Idle);
    assert!(connection.last_sync_at.is_some_and(|at| at > now - TimeDelta::minutes(1)));
}

#[tokio::test]
async fn test_recently_synced_connection_is_not_due() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    let now = Utc::now();
    mark_synced(&engine, connection.id, now - TimeDelta::minutes(5), None).await;

    let report = engine.scheduler().tick(now).await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(adapter.fetches(), 0);
}

#[tokio::test]
async fn test_backoff_deadline_defers_connection() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    let now = Utc::now();
    let next = now + TimeDelta::minutes(10);
    mark_synced(&engine, connection.id, now - TimeDelta::hours(2), Some(next)).await;

    assert_eq!(engine.scheduler().tick(now).await.unwrap().due, 0);
    assert_eq!(
        engine
            .scheduler()
            .tick(next + TimeDelta::seconds(1))
            .await
            .unwrap()
            .due,
        1
    );
    engine.scheduler().drain().await;
}

#[tokio::test]
async fn test_disabled_and_push_connections_are_skipped() {
    let fitbit = ScriptedAdapter::new(VendorKind::Fitbit);
    let apple = ScriptedAdapter::new(VendorKind::AppleHealth);
    let engine = engine_with(test_config(), &[Arc::clone(&fitbit), Arc::clone(&apple)]).await;

    let disabled = connect(&engine, "member-1", VendorKind::Fitbit).await;
    engine.toggle(disabled.id, false).await.unwrap();
    connect(&engine, "member-2", VendorKind::AppleHealth).await;

    let report = engine.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(fitbit.fetches(), 0);
    assert_eq!(apple.fetches(), 0);
}

#[tokio::test]
async fn test_tick_dispatches_at_most_the_free_workers() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let mut config = test_config();
    config.scheduler.worker_pool_size = 1;
    let engine = engine_with(config, &[Arc::clone(&adapter)]).await;
    for subject in ["member-1", "member-2", "member-3"] {
        connect(&engine, subject, VendorKind::Fitbit).await;
    }

    let report = engine.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(report.due, 3);
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.deferred, 2);
    engine.scheduler().drain().await;
}

#[tokio::test]
async fn test_overlapping_ticks_do_not_double_dispatch() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;
    adapter.script_hang();

    let first = engine.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(first.dispatched, 1);

    let syncing = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(syncing.status, ConnectionStatus::Syncing);

    let second = engine.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(second.due, 0);
    assert_eq!(second.dispatched, 0);

    engine.shutdown().await;
    engine.scheduler().drain().await;

    let attempts = engine.attempts(connection.id, 10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Failed);
    assert_eq!(attempts[0].failure_reason, Some(FailureReason::Cancelled));

    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Idle);
    assert_eq!(connection.consecutive_failures, 0);
}

#[tokio::test]
async fn test_busy_workers_leave_due_connections_unleased() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let mut config = test_config();
    config.scheduler.worker_pool_size = 1;
    let engine = engine_with(config, &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    // A manual sync holds the only worker
    let busy = engine.executor().try_acquire_worker().unwrap();
    let report = engine.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.deferred, 1);

    let waiting = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(waiting.status, ConnectionStatus::Idle);
    assert!(waiting.lease_owner.is_none());
    assert!(engine.attempts(connection.id, 10).await.unwrap().is_empty());

    drop(busy);
    adapter.script_fetch(vec![Ok(fitbit_steps(&[(0, 8000.0)]))]);
    let report = engine.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(report.dispatched, 1);
    engine.scheduler().drain().await;

    let attempts = engine.attempts(connection.id, 10).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AttemptOutcome::Completed);
}
