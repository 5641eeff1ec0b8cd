// ABOUTME: Garmin Health API adapter using OAuth 1.0a signed requests
// ABOUTME: Pulls daily and sleep summaries per day window and parses pushed summary notifications
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Garmin adapter.
//!
//! Consent is a three-legged OAuth 1.0a flow: a signed request token is obtained
//! when building the consent URL, its secret is parked until the callback arrives
//! with the verifier, and both are exchanged for a non-expiring access token.
//!
//! The summary endpoints accept at most one day of upload time per request.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use healthsync_core::errors::ProviderError;
use healthsync_core::models::{
    AuthorizationGrant, AuthorizationRequest, OAuthCredential, TimeRange, VendorKind,
};
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use crate::adapter::{ParsedBatch, RawPointStream, VendorAdapter};
use crate::config::VendorClientConfig;
use crate::descriptor::descriptor;
use crate::http_client::{send, send_json, shared_client};
use crate::json::{decode, parse_day, parse_instant, push_number};
use crate::oauth1::{parse_token_pair, OAuth1Signer};

const VENDOR: VendorKind = VendorKind::Garmin;

/// Largest upload window Garmin accepts per request
const MAX_WINDOW_SECS: i64 = 86_400;

/// Garmin adapter
pub struct GarminAdapter {
    client: VendorClientConfig,
    api_base_url: String,
    /// Request token -> request token secret, until the callback consumes it
    pending_request_tokens: DashMap<String, String>,
}

impl GarminAdapter {
    /// Adapter using `client` registration
    #[must_use]
    pub fn new(client: VendorClientConfig) -> Self {
        let api_base_url = client
            .api_base_url
            .clone()
            .unwrap_or_else(|| descriptor(VENDOR).api_base_url.to_owned());
        Self {
            client,
            api_base_url,
            pending_request_tokens: DashMap::new(),
        }
    }

    fn signer<'a>(&'a self, token: Option<&'a str>, secret: Option<&'a str>) -> OAuth1Signer<'a> {
        OAuth1Signer {
            consumer_key: &self.client.client_id,
            consumer_secret: &self.client.client_secret,
            token,
            token_secret: secret,
        }
    }

    async fn token_request(
        &self,
        url: &str,
        token: Option<(&str, &str)>,
        protocol_params: &[(&str, &str)],
    ) -> Result<(String, String), ProviderError> {
        let header = self
            .signer(token.map(|t| t.0), token.map(|t| t.1))
            .authorization_header("POST", url, &[], protocol_params);
        let response = send(
            VENDOR.as_str(),
            shared_client().post(url).header(AUTHORIZATION, header),
        )
        .await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(VENDOR.as_str(), &e))?;
        parse_token_pair(&body).ok_or_else(|| {
            ProviderError::malformed(VENDOR.as_str(), "token response missing oauth_token")
        })
    }

    async fn summaries(
        &self,
        credential: &OAuthCredential,
        kind: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}/{kind}", self.api_base_url);
        let start = start.timestamp().to_string();
        let end = end.timestamp().to_string();
        let params = [
            ("uploadStartTimeInSeconds", start.as_str()),
            ("uploadEndTimeInSeconds", end.as_str()),
        ];
        let header = self
            .signer(
                Some(&credential.access_token),
                credential.token_secret.as_deref(),
            )
            .authorization_header("GET", &url, &params, &[]);
        debug!(vendor = VENDOR.as_str(), kind, "fetching summaries");
        let request = shared_client()
            .get(&url)
            .query(&params)
            .header(AUTHORIZATION, header);
        send_json(VENDOR.as_str(), request).await
    }
}

fn summary_instant(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .get("startTimeInSeconds")
        .and_then(parse_instant)
        .or_else(|| entry.get("calendarDate").and_then(Value::as_str).and_then(parse_day))
}

/// Points from a list of daily summaries
#[must_use]
pub fn extract_dailies(entries: &[Value]) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    for entry in entries {
        let Some(at) = summary_instant(entry) else {
            batch.skip();
            continue;
        };
        push_number(&mut batch, VENDOR, "dailies.steps", at, entry, "steps");
        push_number(
            &mut batch,
            VENDOR,
            "dailies.distanceInMeters",
            at,
            entry,
            "distanceInMeters",
        );
        push_number(
            &mut batch,
            VENDOR,
            "dailies.activeKilocalories",
            at,
            entry,
            "activeKilocalories",
        );
        push_number(
            &mut batch,
            VENDOR,
            "dailies.restingHeartRateInBeatsPerMinute",
            at,
            entry,
            "restingHeartRateInBeatsPerMinute",
        );
    }
    batch
}

/// Points from a list of sleep summaries
#[must_use]
pub fn extract_sleeps(entries: &[Value]) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    for entry in entries {
        let Some(at) = entry
            .get("calendarDate")
            .and_then(Value::as_str)
            .and_then(parse_day)
            .or_else(|| summary_instant(entry))
        else {
            batch.skip();
            continue;
        };
        push_number(
            &mut batch,
            VENDOR,
            "sleeps.durationInSeconds",
            at,
            entry,
            "durationInSeconds",
        );
    }
    batch
}

fn as_entries(body: &Value) -> Result<&[Value], ProviderError> {
    body.as_array().map(Vec::as_slice).ok_or_else(|| {
        ProviderError::malformed(VENDOR.as_str(), "expected an array of summaries")
    })
}

#[async_trait]
impl VendorAdapter for GarminAdapter {
    fn kind(&self) -> VendorKind {
        VENDOR
    }

    #[instrument(skip_all, fields(vendor = "garmin"))]
    async fn authorization_url(
        &self,
        state: &str,
    ) -> Result<AuthorizationRequest, ProviderError> {
        let oauth = descriptor(VENDOR).oauth;
        let request_token_url = oauth.request_token_url.ok_or_else(|| {
            ProviderError::Configuration {
                vendor: VENDOR.as_str().to_owned(),
                message: "request token endpoint missing".to_owned(),
            }
        })?;

        let mut callback = Url::parse(&self.client.redirect_uri).map_err(|e| {
            ProviderError::Configuration {
                vendor: VENDOR.as_str().to_owned(),
                message: format!("invalid redirect URI: {e}"),
            }
        })?;
        callback.query_pairs_mut().append_pair("state", state);

        let (token, secret) = self
            .token_request(request_token_url, None, &[("oauth_callback", callback.as_str())])
            .await?;
        self.pending_request_tokens.insert(token.clone(), secret);

        let url = Url::parse_with_params(
            oauth.auth_url,
            &[("oauth_token", token.as_str()), ("oauth_callback", callback.as_str())],
        )
        .map_err(|e| ProviderError::Configuration {
            vendor: VENDOR.as_str().to_owned(),
            message: format!("invalid consent URL: {e}"),
        })?;
        Ok(AuthorizationRequest {
            url: url.into(),
            state: state.to_owned(),
        })
    }

    #[instrument(skip_all, fields(vendor = "garmin"))]
    async fn authorize(
        &self,
        grant: &AuthorizationGrant,
    ) -> Result<OAuthCredential, ProviderError> {
        let verifier = grant.verifier.as_deref().ok_or_else(|| {
            ProviderError::AuthorizationFailed {
                vendor: VENDOR.as_str().to_owned(),
                message: "missing oauth_verifier".to_owned(),
            }
        })?;
        let (_, request_secret) = self
            .pending_request_tokens
            .remove(&grant.code)
            .ok_or_else(|| ProviderError::AuthorizationFailed {
                vendor: VENDOR.as_str().to_owned(),
                message: "unknown or already used request token".to_owned(),
            })?;

        let (token, secret) = self
            .token_request(
                descriptor(VENDOR).oauth.token_url,
                Some((&grant.code, &request_secret)),
                &[("oauth_verifier", verifier)],
            )
            .await
            .map_err(|error| match error {
                ProviderError::AuthExpired { vendor, message } => {
                    ProviderError::AuthorizationFailed { vendor, message }
                }
                other => other,
            })?;
        info!(vendor = VENDOR.as_str(), "access token issued");

        Ok(OAuthCredential {
            access_token: token,
            refresh_token: None,
            token_secret: Some(secret),
            expires_at: None,
            scope: None,
            external_user_id: None,
        })
    }

    async fn revoke(&self, credential: &OAuthCredential) -> Result<(), ProviderError> {
        let Some(url) = descriptor(VENDOR).oauth.revoke_url else {
            return Ok(());
        };
        let header = self
            .signer(
                Some(&credential.access_token),
                credential.token_secret.as_deref(),
            )
            .authorization_header("DELETE", url, &[], &[]);
        send(
            VENDOR.as_str(),
            shared_client().delete(url).header(AUTHORIZATION, header),
        )
        .await
        .map(|_| ())
    }

    fn fetch<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        range: TimeRange,
    ) -> RawPointStream<'a> {
        Box::pin(try_stream! {
            let mut window_start = range.start;
            while window_start < range.end {
                let window_end = (window_start + Duration::seconds(MAX_WINDOW_SECS)).min(range.end);

                let body = self.summaries(credential, "dailies", window_start, window_end).await?;
                yield extract_dailies(as_entries(&body)?);

                let body = self.summaries(credential, "sleeps", window_start, window_end).await?;
                yield extract_sleeps(as_entries(&body)?);

                window_start = window_end;
            }
        })
    }

    fn parse(&self, payload: &[u8]) -> Result<ParsedBatch, ProviderError> {
        let body = decode(VENDOR, payload)?;
        let Some(object) = body.as_object() else {
            return Err(ProviderError::malformed(VENDOR.as_str(), "expected an object"));
        };

        let mut batch = ParsedBatch::new();
        let mut recognized = false;
        if let Some(dailies) = object.get("dailies") {
            recognized = true;
            batch.extend(extract_dailies(as_entries(dailies)?));
        }
        if let Some(sleeps) = object.get("sleeps") {
            recognized = true;
            batch.extend(extract_sleeps(as_entries(sleeps)?));
        }
        if !recognized {
            return Err(ProviderError::malformed(
                VENDOR.as_str(),
                "no dailies or sleeps in notification",
            ));
        }
        batch.require_any(VENDOR)
    }
}
