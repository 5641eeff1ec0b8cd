// ABOUTME: Range fetch tests against a local stub of the vendor API
// ABOUTME: Checks page-per-call streaming and classification of expired and throttled responses
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(missing_docs, clippy::unwrap_used)]

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use healthsync_providers::errors::ProviderError;
use healthsync_providers::models::{OAuthCredential, TimeRange};
use healthsync_providers::{create_adapter, VendorClientConfig, VendorKind};
use serde_json::json;
use tokio::net::TcpListener;

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn credential() -> OAuthCredential {
    OAuthCredential {
        access_token: "access".to_owned(),
        refresh_token: Some("refresh".to_owned()),
        token_secret: None,
        expires_at: None,
        scope: None,
        external_user_id: None,
    }
}

fn one_day() -> TimeRange {
    TimeRange::new(
        Utc.with_ymd_and_hms(2025, 1, 4, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap(),
    )
}

fn client(base: String) -> VendorClientConfig {
    VendorClientConfig {
        client_id: "client".to_owned(),
        client_secret: "secret".to_owned(),
        redirect_uri: "https://app.example.com/callback".to_owned(),
        api_base_url: Some(base),
    }
}

async fn fitbit_stub(uri: Uri) -> Response {
    let path = uri.path();
    if path.contains("/activities/heart/") {
        Json(json!({
            "activities-heart": [
                {"dateTime": "2025-01-04", "value": {"restingHeartRate": 61}}
            ]
        }))
        .into_response()
    } else if path.contains("/activities/date/") {
        Json(json!({"summary": {"steps": 8012, "caloriesOut": 2310}})).into_response()
    } else if path.contains("/sleep/") {
        Json(json!({"summary": {"totalMinutesAsleep": 412}})).into_response()
    } else if path.contains("/body/log/weight/") {
        Json(json!({"weight": []})).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[tokio::test]
async fn test_fitbit_fetch_yields_one_page_per_call() {
    let base = serve(Router::new().fallback(fitbit_stub)).await;
    let adapter = create_adapter(VendorKind::Fitbit, client(base));
    let credential = credential();

    let pages: Vec<_> = adapter.fetch(&credential, one_day()).collect().await;
    assert_eq!(pages.len(), 4);

    let points: usize = pages
        .into_iter()
        .map(|page| page.unwrap().points.len())
        .sum();
    assert_eq!(points, 4);
}

#[tokio::test]
async fn test_expired_token_surfaces_after_first_page() {
    let router = Router::new().fallback(|uri: Uri| async move {
        if uri.path().contains("/activities/heart/") {
            StatusCode::UNAUTHORIZED.into_response()
        } else {
            Json(json!({"summary": {"steps": 100}})).into_response()
        }
    });
    let base = serve(router).await;
    let adapter = create_adapter(VendorKind::Fitbit, client(base));
    let credential = credential();

    let mut stream = adapter.fetch(&credential, one_day());
    assert!(stream.next().await.unwrap().is_ok());
    let error = stream.next().await.unwrap().unwrap_err();
    assert!(error.is_auth_expired());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let router = Router::new().fallback(|| async {
        (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "30")], "slow down").into_response()
    });
    let base = serve(router).await;
    let adapter = create_adapter(VendorKind::Withings, client(base));
    let credential = credential();

    let mut stream = adapter.fetch(&credential, one_day());
    let error = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(
        error,
        ProviderError::RateLimited {
            retry_after_secs: Some(30),
            ..
        }
    ));
}

#[tokio::test]
async fn test_withings_envelope_error_is_auth_expired() {
    let router = Router::new().fallback(|| async {
        Json(json!({"status": 401, "error": "invalid_token"})).into_response()
    });
    let base = serve(router).await;
    let adapter = create_adapter(VendorKind::Withings, client(base));
    let credential = credential();

    let mut stream = adapter.fetch(&credential, one_day());
    let error = stream.next().await.unwrap().unwrap_err();
    assert!(error.is_auth_expired());
}
