// ABOUTME: OAuth 2 authorization-code helpers shared by the OAuth 2 vendors
// ABOUTME: Builds consent URLs and turns token endpoint responses into stored credentials
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use healthsync_core::errors::ProviderError;
use healthsync_core::models::OAuthCredential;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use url::Url;

use crate::config::VendorClientConfig;
use crate::http_client::{send_json, shared_client};

/// Token endpoint response fields common to the OAuth 2 vendors
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Vendor account id (`user_id` on Fitbit, `userid` on Withings)
    #[serde(default, alias = "userid", deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
}

impl TokenResponse {
    /// Convert into a credential, keeping `previous_refresh` when the vendor
    /// does not rotate refresh tokens
    #[must_use]
    pub fn into_credential(
        self,
        now: DateTime<Utc>,
        default_expires_in: Option<i64>,
        previous_refresh: Option<&str>,
    ) -> OAuthCredential {
        let expires_in = self.expires_in.or(default_expires_in);
        OAuthCredential {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_owned)),
            token_secret: None,
            expires_at: expires_in.map(|secs| now + Duration::seconds(secs)),
            scope: self.scope,
            external_user_id: self.user_id,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Which grant a token request carries; decides how a rejection is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// Authorization code exchange
    AuthorizationCode,
    /// Refresh token exchange
    RefreshToken,
}

/// Consent URL with the standard authorization-code parameters
///
/// # Errors
///
/// Returns [`ProviderError::Configuration`] when the endpoint URL is invalid
pub fn authorization_url(
    vendor: &str,
    auth_url: &str,
    client: &VendorClientConfig,
    scope: &str,
    state: &str,
) -> Result<String, ProviderError> {
    let url = Url::parse_with_params(
        auth_url,
        &[
            ("response_type", "code"),
            ("client_id", client.client_id.as_str()),
            ("redirect_uri", client.redirect_uri.as_str()),
            ("scope", scope),
            ("state", state),
        ],
    )
    .map_err(|e| ProviderError::Configuration {
        vendor: vendor.to_owned(),
        message: format!("invalid authorization URL: {e}"),
    })?;
    Ok(url.into())
}

/// HTTP Basic credentials for token endpoints that require them
#[must_use]
pub fn basic_auth_header(client: &VendorClientConfig) -> String {
    let raw = format!("{}:{}", client.client_id, client.client_secret);
    format!("Basic {}", STANDARD.encode(raw))
}

/// POST a form to a token endpoint and return the JSON body
///
/// A 400 or 401 from the endpoint means the grant itself was rejected: for
/// refreshes that is an expired credential, for code exchanges a failed
/// authorization.
///
/// # Errors
///
/// Returns the classified [`ProviderError`]
pub async fn post_token_form(
    vendor: &str,
    token_url: &str,
    form: &[(&str, &str)],
    authorization: Option<&str>,
    grant: GrantKind,
) -> Result<Value, ProviderError> {
    let mut request = shared_client().post(token_url).form(form);
    if let Some(header) = authorization {
        request = request.header(AUTHORIZATION, header);
    }
    send_json(vendor, request)
        .await
        .map_err(|error| reclassify_rejection(error, grant))
}

/// Turn a rejected token request into the error the caller acts on
#[must_use]
pub fn reclassify_rejection(error: ProviderError, grant: GrantKind) -> ProviderError {
    let rejected = matches!(
        &error,
        ProviderError::Api { status: 400, .. } | ProviderError::AuthExpired { .. }
    );
    if !rejected {
        return error;
    }
    let vendor = error.vendor().to_owned();
    let message = error.to_string();
    match grant {
        GrantKind::AuthorizationCode => ProviderError::AuthorizationFailed { vendor, message },
        GrantKind::RefreshToken => ProviderError::AuthExpired { vendor, message },
    }
}

/// Decode a token response body
///
/// # Errors
///
/// Returns [`ProviderError::MalformedPayload`] when required fields are missing
pub fn parse_token_response(vendor: &str, body: Value) -> Result<TokenResponse, ProviderError> {
    serde_json::from_value(body)
        .map_err(|e| ProviderError::malformed(vendor, format!("token response: {e}")))
}
