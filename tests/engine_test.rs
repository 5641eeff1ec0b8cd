// ABOUTME: Tests for the engine trigger surface around connecting and managing devices
// ABOUTME: Exercises the authorization state handshake, toggling, and listing connections
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(missing_docs, clippy::unwrap_used)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{connect, engine_with, test_config, ScriptedAdapter};
use healthsync_core::errors::ErrorCode;
use healthsync_core::models::{AuthorizationGrant, VendorKind};
use uuid::Uuid;

fn callback(code: &str, state: Option<&str>) -> AuthorizationGrant {
    AuthorizationGrant {
        state: state.map(str::to_owned),
        ..AuthorizationGrant::code(code)
    }
}

#[tokio::test]
async fn test_authorization_state_round_trip() {
    let adapter = ScriptedAdapter::new(VendorKind::Garmin);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;

    let request = engine
        .authorization_url(VendorKind::Garmin, "member-3")
        .await
        .unwrap();
    assert!(request.url.contains(&request.state));

    let connection = engine
        .complete_authorization(VendorKind::Garmin, &callback("acct-3", Some(&request.state)))
        .await
        .unwrap();
    assert_eq!(connection.subject_id, "member-3");
    assert_eq!(connection.vendor, VendorKind::Garmin);
    assert_eq!(connection.external_account_id.as_deref(), Some("acct-3"));

    let replay = engine
        .complete_authorization(VendorKind::Garmin, &callback("acct-3", Some(&request.state)))
        .await
        .unwrap_err();
    assert_eq!(replay.code, ErrorCode::AuthInvalid);
}

#[tokio::test]
async fn test_bad_callbacks_are_refused() {
    let garmin = ScriptedAdapter::new(VendorKind::Garmin);
    let fitbit = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&garmin), Arc::clone(&fitbit)]).await;

    let missing = engine
        .complete_authorization(VendorKind::Garmin, &callback("acct", None))
        .await
        .unwrap_err();
    assert_eq!(missing.code, ErrorCode::AuthInvalid);

    let unknown = engine
        .complete_authorization(VendorKind::Garmin, &callback("acct", Some("made-up")))
        .await
        .unwrap_err();
    assert_eq!(unknown.code, ErrorCode::AuthInvalid);

    // A state issued for one vendor cannot finish another vendor's flow
    let request = engine
        .authorization_url(VendorKind::Garmin, "member-1")
        .await
        .unwrap();
    let crossed = engine
        .complete_authorization(VendorKind::Fitbit, &callback("acct", Some(&request.state)))
        .await
        .unwrap_err();
    assert_eq!(crossed.code, ErrorCode::AuthInvalid);

    let request = engine
        .authorization_url(VendorKind::Garmin, "member-1")
        .await
        .unwrap();
    let denied = engine
        .complete_authorization(VendorKind::Garmin, &callback("denied", Some(&request.state)))
        .await
        .unwrap_err();
    assert_eq!(denied.code, ErrorCode::AuthInvalid);

    assert!(engine.list_connections(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_validates_subject_and_vendor() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;

    let blank = engine
        .connect("  ", VendorKind::Fitbit, &AuthorizationGrant::code("acct"))
        .await
        .unwrap_err();
    assert_eq!(blank.code, ErrorCode::InvalidInput);

    let unconfigured = engine
        .authorization_url(VendorKind::Withings, "member-1")
        .await
        .unwrap_err();
    assert_eq!(unconfigured.code, ErrorCode::ConfigError);
}

#[tokio::test]
async fn test_toggle_and_list_connections() {
    let fitbit = ScriptedAdapter::new(VendorKind::Fitbit);
    let withings = ScriptedAdapter::new(VendorKind::Withings);
    let engine = engine_with(test_config(), &[Arc::clone(&fitbit), Arc::clone(&withings)]).await;

    let first = connect(&engine, "member-1", VendorKind::Fitbit).await;
    connect(&engine, "member-1", VendorKind::Withings).await;
    connect(&engine, "member-2", VendorKind::Fitbit).await;

    assert_eq!(engine.list_connections(None).await.unwrap().len(), 3);
    assert_eq!(engine.list_connections(Some("member-1")).await.unwrap().len(), 2);
    assert!(engine.list_connections(Some("member-9")).await.unwrap().is_empty());

    let disabled = engine.toggle(first.id, false).await.unwrap();
    assert!(!disabled.sync_enabled);
    let enabled = engine.toggle(first.id, true).await.unwrap();
    assert!(enabled.sync_enabled);

    let missing = engine.toggle(Uuid::new_v4(), true).await.unwrap_err();
    assert_eq!(missing.code, ErrorCode::ResourceNotFound);
    let missing = engine.disconnect(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(missing.code, ErrorCode::ResourceNotFound);
}

#[tokio::test]
async fn test_disconnect_revokes_and_removes_the_connection() {
    let adapter = ScriptedAdapter::new(VendorKind::Fitbit);
    let engine = engine_with(test_config(), &[Arc::clone(&adapter)]).await;
    let connection = connect(&engine, "member-1", VendorKind::Fitbit).await;

    engine.disconnect(connection.id).await.unwrap();

    assert_eq!(adapter.revoke_calls.load(Ordering::SeqCst), 1);
    let gone = engine.get_connection(connection.id).await.unwrap_err();
    assert_eq!(gone.code, ErrorCode::ResourceNotFound);
}
