// ABOUTME: Shared HTTP client with connection pooling for vendor API calls
// ABOUTME: Classifies vendor responses into expired-auth, rate-limit, transient, and API errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use healthsync_core::constants::http::{DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS};
use healthsync_core::errors::ProviderError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Configured timeout values for the shared client
static CLIENT_TIMEOUTS: OnceLock<(u64, u64)> = OnceLock::new();

/// Global shared HTTP client
static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

/// Set the shared client's timeouts
///
/// Call once at startup before any adapter issues a request; later calls are ignored.
pub fn initialize_shared_client(timeout_secs: u64, connect_timeout_secs: u64) {
    let _ = CLIENT_TIMEOUTS.set((timeout_secs, connect_timeout_secs));
}

/// Shared pooled client for vendor calls
pub fn shared_client() -> &'static Client {
    SHARED_CLIENT.get_or_init(|| {
        let (timeout, connect_timeout) = CLIENT_TIMEOUTS
            .get()
            .copied()
            .unwrap_or((DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS));

        ClientBuilder::new()
            .timeout(Duration::from_secs(timeout))
            .connect_timeout(Duration::from_secs(connect_timeout))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Seconds to wait from a `Retry-After` header (delta-seconds form)
#[must_use]
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Map an HTTP status to the adapter error taxonomy
///
/// Returns `None` for success statuses.
#[must_use]
pub fn classify_status(
    vendor: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    let message: String = body.chars().take(200).collect();
    let error = match status {
        StatusCode::UNAUTHORIZED => ProviderError::auth_expired(vendor, message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            vendor: vendor.to_owned(),
            retry_after_secs: retry_after_secs(headers),
        },
        StatusCode::REQUEST_TIMEOUT => ProviderError::transient(vendor, "request timeout"),
        s if s.is_server_error() => ProviderError::transient(vendor, format!("{s}: {message}")),
        s => ProviderError::Api {
            vendor: vendor.to_owned(),
            status: s.as_u16(),
            message,
        },
    };
    Some(error)
}

/// Send a request and return the successful response
///
/// # Errors
///
/// Transport failures and non-success statuses are classified into [`ProviderError`]
pub async fn send(vendor: &str, request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_transport(vendor, &e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    let error = classify_status(vendor, status, &headers, &body).unwrap_or_else(|| {
        ProviderError::Api {
            vendor: vendor.to_owned(),
            status: status.as_u16(),
            message: body.clone(),
        }
    });
    if error.is_retryable() {
        debug!(vendor, status = status.as_u16(), "retryable vendor response");
    } else {
        warn!(vendor, status = status.as_u16(), "vendor request rejected");
    }
    Err(error)
}

/// Send a request and decode the JSON body
///
/// # Errors
///
/// Same as [`send`]; an undecodable body is a [`ProviderError::MalformedPayload`]
pub async fn send_json(vendor: &str, request: RequestBuilder) -> Result<Value, ProviderError> {
    let response = send(vendor, request).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::from_transport(vendor, &e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::malformed(vendor, format!("invalid JSON response: {e}")))
}
