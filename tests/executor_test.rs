// ABOUTME: Integration tests for sync attempts driven through the executor
// ABOUTME: Covers completion, idempotent re-fetch, expired-token refresh, leases, and cancellation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::{connect, engine_with, fitbit_steps, test_config, ScriptedAdapter};
use healthsync::executor::SyncRequest;
use healthsync_core::errors::{ErrorCode, ProviderError};
use healthsync_core::models::{
    AttemptOutcome, ConnectionStatus, FailureReason, SyncAttempt, SyncTrigger, TimeRange,
    VendorKind,
};
use tokio::time::{sleep, timeout};

fn auth_expired() -> ProviderError {
    ProviderError::AuthExpired {
        vendor: "fitbit".to_owned(),
        message: "access token expired".to_owned(),
    }
}

#[tokio::test]
async fn test_manual_sync_completes_and_counts_new_points() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![
        Ok(fitbit_steps(&[(0, 8000.0), (1, 9500.0)])),
        Ok(fitbit_steps(&[(2, 4000.0)])),
    ]);

    let attempt = engine.trigger_sync(connection.id, Some(7)).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Completed);
    assert_eq!(attempt.trigger, SyncTrigger::Manual);
    assert_eq!(attempt.records_synced, 3);
    assert_eq!(attempt.duplicates_skipped, 0);
    assert!(attempt.failure_reason.is_none());

    let stored = engine.database().get_attempt(attempt.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome, AttemptOutcome::Completed);
    assert_eq!(stored.records_synced, 3);

    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Idle);
    assert_eq!(
        connection.last_sync_at.map(|at| at.timestamp_millis()),
        Some(attempt.range.end.timestamp_millis())
    );
    assert_eq!(connection.consecutive_failures, 0);
    assert!(connection.lease_owner.is_none());
}

#[tokio::test]
async fn test_refetching_same_window_stores_nothing_new() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    let page = || Ok(fitbit_steps(&[(0, 8000.0), (1, 9500.0), (2, 4000.0)]));
    adapter.script_fetch(vec![page()]);
    adapter.script_fetch(vec![page()]);

    let first = engine.trigger_sync(connection.id, None).await.unwrap();
    let stored_after_first = engine.database().count_records(Some("member-1")).await.unwrap();
    let second = engine.trigger_sync(connection.id, None).await.unwrap();

    assert_eq!(first.records_synced, 3);
    assert_eq!(second.outcome, AttemptOutcome::Completed);
    assert_eq!(second.records_synced, 0);
    assert_eq!(second.duplicates_skipped, 3);
    assert_eq!(
        engine.database().count_records(Some("member-1")).await.unwrap(),
        stored_after_first
    );
}

#[tokio::test]
async fn test_zero_step_days_count_as_invalid() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![Ok(fitbit_steps(&[(0, 0.0), (1, 5000.0)]))]);

    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.records_synced, 1);
    assert_eq!(attempt.invalid_skipped, 1);
}

#[tokio::test]
async fn test_expired_access_is_refreshed_once_and_retried() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![Err(auth_expired())]);
    adapter.script_fetch(vec![Ok(fitbit_steps(&[(0, 8000.0)]))]);

    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Completed);
    assert_eq!(attempt.records_synced, 1);
    assert_eq!(adapter.refreshes(), 1);
    assert_eq!(
        *adapter.fetch_tokens.lock().unwrap(),
        vec!["initial".to_owned(), "refreshed".to_owned()]
    );

    let stored = engine.credentials().get(connection.id).await.unwrap();
    assert_eq!(stored.access_token, "refreshed");
}

#[tokio::test]
async fn test_failed_refresh_parks_connection_in_error() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![Err(auth_expired())]);
    adapter.script_refresh(Err(ProviderError::AuthorizationFailed {
        vendor: "fitbit".to_owned(),
        message: "refresh token revoked".to_owned(),
    }));

    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failed);
    assert_eq!(attempt.failure_reason, Some(FailureReason::AuthExpired));
    assert_eq!(adapter.fetches(), 1);

    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Error);
    assert!(connection.last_error.is_some());
}

#[tokio::test]
async fn test_second_expiry_after_refresh_fails_without_looping() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![Err(auth_expired())]);
    adapter.script_fetch(vec![Err(auth_expired())]);

    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.failure_reason, Some(FailureReason::AuthExpired));
    assert_eq!(adapter.refreshes(), 1);
    assert_eq!(adapter.fetches(), 2);
}

#[tokio::test]
async fn test_transient_failure_backs_off_and_keeps_partial_counts() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![
        Ok(fitbit_steps(&[(0, 8000.0)])),
        Err(ProviderError::TransientNetwork {
            vendor: "fitbit".to_owned(),
            message: "connection reset".to_owned(),
        }),
    ]);

    let before = Utc::now();
    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failed);
    assert_eq!(attempt.failure_reason, Some(FailureReason::TransientNetwork));
    assert_eq!(attempt.records_synced, 1);

    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Idle);
    assert_eq!(connection.consecutive_failures, 1);
    assert!(connection.last_sync_at.is_none());
    assert!(connection.next_attempt_at.is_some_and(|at| at > before));
}

#[tokio::test]
async fn test_vendor_rate_limit_honours_retry_after() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![Err(ProviderError::RateLimited {
        vendor: "fitbit".to_owned(),
        retry_after_secs: Some(600),
    })]);

    let before = Utc::now();
    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.failure_reason, Some(FailureReason::RateLimited));

    let connection = engine.get_connection(connection.id).await.unwrap();
    let next = connection.next_attempt_at.unwrap();
    assert!(next >= before + TimeDelta::seconds(600));
}

#[tokio::test]
async fn test_live_lease_blocks_a_second_claim() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;
    let executor = engine.executor();

    let claimed = executor
        .claim(connection.id, SyncRequest::Manual { days: None })
        .await
        .unwrap();
    assert_eq!(claimed.attempt.outcome, AttemptOutcome::Pending);

    let err = executor
        .claim(connection.id, SyncRequest::Scheduled)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceLocked);

    let finished = executor.run(claimed).await.unwrap();
    assert_eq!(finished.outcome, AttemptOutcome::Completed);

    let next = executor
        .claim(connection.id, SyncRequest::Scheduled)
        .await
        .unwrap();
    assert_eq!(next.attempt.trigger, SyncTrigger::Scheduled);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_orphan_attempt_failed() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;
    let database = engine.database();

    // A holder that crashed mid-attempt an hour ago
    let crashed_at = Utc::now() - TimeDelta::hours(1);
    let mut orphan = SyncAttempt::pending(
        connection.id,
        VendorKind::Fitbit,
        TimeRange::new(crashed_at - TimeDelta::days(7), crashed_at),
        SyncTrigger::Scheduled,
        crashed_at,
    );
    orphan.start().unwrap();
    database.insert_attempt(&orphan).await.unwrap();
    assert!(database
        .claim_connection(
            connection.id,
            orphan.id,
            crashed_at,
            crashed_at + TimeDelta::minutes(10)
        )
        .await
        .unwrap());

    let stale = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(stale.status, ConnectionStatus::Syncing);
    assert!(stale.lease_is_stale(Utc::now()));

    adapter.script_fetch(vec![Ok(fitbit_steps(&[(0, 8000.0)]))]);
    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Completed);

    let orphan = database.get_attempt(orphan.id).await.unwrap().unwrap();
    assert_eq!(orphan.outcome, AttemptOutcome::Failed);
    assert_eq!(orphan.failure_reason, Some(FailureReason::LeaseExpired));

    let history = engine.attempts(connection.id, 10).await.unwrap();
    let running = history
        .iter()
        .filter(|a| a.outcome == AttemptOutcome::Running)
        .count();
    assert_eq!(running, 0);
}

#[tokio::test]
async fn test_disconnect_cancels_running_attempt() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = Arc::new(engine_with(test_config(), &[Arc::clone(&adapter)]).await);
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_hang();
    let running = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.trigger_sync(connection.id, None).await })
    };

    timeout(Duration::from_secs(5), async {
        while !engine.executor().is_running(connection.id) || adapter.fetches() == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    engine.disconnect(connection.id).await.unwrap();
    let attempt = timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(attempt.outcome, AttemptOutcome::Failed);
    assert_eq!(attempt.failure_reason, Some(FailureReason::Cancelled));
    assert_eq!(adapter.revoke_calls.load(Ordering::SeqCst), 1);
    assert!(engine.list_connections(None).await.unwrap().is_empty());

    // History outlives the connection
    let history = engine.attempts(connection.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_push_vendor_rejects_manual_sync() {
    let adapter = ScriptedAdapter::new(VendorKind::AppleHealth);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::AppleHealth).await;

    let err = engine.trigger_sync(connection.id, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
    assert_eq!(adapter.fetches(), 0);
}

#[tokio::test]
async fn test_malformed_page_fails_attempt_and_backs_off() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![
        Ok(fitbit_steps(&[(0, 8000.0), (1, 0.0)])),
        Err(ProviderError::malformed("fitbit", "page was not valid JSON")),
    ]);

    let before = Utc::now();
    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failed);
    assert_eq!(attempt.failure_reason, Some(FailureReason::MalformedPayload));
    assert_eq!(attempt.records_synced, 1);
    assert_eq!(attempt.invalid_skipped, 1);
    assert!(attempt.completed_at.is_some());

    let stored = engine.database().get_attempt(attempt.id).await.unwrap().unwrap();
    assert_eq!(stored.outcome, AttemptOutcome::Failed);
    assert_eq!(stored.failure_reason, Some(FailureReason::MalformedPayload));
    assert_eq!(stored.records_synced, 1);

    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Idle);
    assert_eq!(connection.consecutive_failures, 1);
    assert!(connection.last_sync_at.is_none());
    assert!(connection.next_attempt_at.is_some_and(|at| at > before));
}

#[tokio::test]
async fn test_transient_refresh_failure_after_rejection_backs_off() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    adapter.script_fetch(vec![Err(auth_expired())]);
    adapter.script_refresh(Err(ProviderError::TransientNetwork {
        vendor: "fitbit".to_owned(),
        message: "token endpoint returned 503".to_owned(),
    }));

    let attempt = engine.trigger_sync(connection.id, None).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failed);
    assert_eq!(attempt.failure_reason, Some(FailureReason::TransientNetwork));
    assert_eq!(adapter.refreshes(), 1);

    // A blip at the token endpoint does not force the user to reconnect
    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Idle);
    assert_eq!(connection.consecutive_failures, 1);
    assert!(connection.next_attempt_at.is_some());
}

#[tokio::test]
async fn test_run_is_bounded_by_the_lease_taken_at_claim() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let mut config = test_config();
    config.scheduler.lease_timeout = Duration::from_millis(100);
    let engine = engine_with(config, &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;
    let executor = engine.executor();

    let claimed = executor
        .claim(connection.id, SyncRequest::Scheduled)
        .await
        .unwrap();
    assert!(claimed.lease_until > claimed.attempt.started_at);

    // Waiting for a worker after the claim used up the whole lease
    sleep(Duration::from_millis(200)).await;
    let attempt = executor.run(claimed).await.unwrap();
    assert_eq!(attempt.outcome, AttemptOutcome::Failed);
    assert_eq!(attempt.failure_reason, Some(FailureReason::LeaseExpired));
    assert_eq!(adapter.fetches(), 0);

    let connection = engine.get_connection(connection.id).await.unwrap();
    assert_eq!(connection.status, ConnectionStatus::Idle);
    assert!(connection.lease_owner.is_none());
}
