// ABOUTME: Fitbit Web API adapter pulling daily activity, heart, sleep, and weight summaries
// ABOUTME: OAuth 2 with Basic-authenticated token exchange, refresh, and revocation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Fitbit adapter.
//!
//! Fitbit exposes per-day summary endpoints, so a fetch walks the requested
//! range one day at a time and issues one call per endpoint per day.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use healthsync_core::errors::ProviderError;
use healthsync_core::models::{
    AuthorizationGrant, AuthorizationRequest, OAuthCredential, RawDataPoint, RawValue, TimeRange,
    VendorKind,
};
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::adapter::{ParsedBatch, RawPointStream, VendorAdapter};
use crate::config::VendorClientConfig;
use crate::descriptor::descriptor;
use crate::http_client::{send, send_json, shared_client};
use crate::json::{days_in, numeric, parse_day, push_number, Numeric};
use crate::oauth2::{
    authorization_url, basic_auth_header, parse_token_response, post_token_form, GrantKind,
};

const VENDOR: VendorKind = VendorKind::Fitbit;

/// Fitbit adapter
pub struct FitbitAdapter {
    client: VendorClientConfig,
    api_base_url: String,
}

impl FitbitAdapter {
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
        }
    }

    async fn get_day(
        &self,
        credential: &OAuthCredential,
        path: String,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{path}", self.api_base_url);
        debug!(vendor = VENDOR.as_str(), %url, "fetching");
        let request = shared_client()
            .get(&url)
            .bearer_auth(&credential.access_token);
        send_json(VENDOR.as_str(), request).await
    }

    async fn exchange(
        &self,
        form: &[(&str, &str)],
        grant: GrantKind,
        previous_refresh: Option<&str>,
    ) -> Result<OAuthCredential, ProviderError> {
        let body = post_token_form(
            VENDOR.as_str(),
            descriptor(VENDOR).oauth.token_url,
            form,
            Some(&basic_auth_header(&self.client)),
            grant,
        )
        .await?;
        Ok(parse_token_response(VENDOR.as_str(), body)?.into_credential(
            Utc::now(),
            None,
            previous_refresh,
        ))
    }
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Points from `/1/user/-/activities/date/{day}.json`
#[must_use]
pub fn extract_activity_summary(day: NaiveDate, body: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    let Some(summary) = body.get("summary") else {
        return batch;
    };
    let at = midnight(day);
    push_number(&mut batch, VENDOR, "activities.summary.steps", at, summary, "steps");
    push_number(
        &mut batch,
        VENDOR,
        "activities.summary.caloriesOut",
        at,
        summary,
        "caloriesOut",
    );

    let total = summary
        .get("distances")
        .and_then(Value::as_array)
        .and_then(|distances| {
            distances
                .iter()
                .find(|d| d.get("activity").and_then(Value::as_str) == Some("total"))
        });
    if let Some(total) = total {
        push_number(
            &mut batch,
            VENDOR,
            "activities.summary.distance",
            at,
            total,
            "distance",
        );
    }
    batch
}

/// Points from `/1/user/-/activities/heart/date/{day}/1d.json`
#[must_use]
pub fn extract_heart(body: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    let Some(entries) = body.get("activities-heart").and_then(Value::as_array) else {
        return batch;
    };
    for entry in entries {
        let Some(at) = entry
            .get("dateTime")
            .and_then(Value::as_str)
            .and_then(parse_day)
        else {
            batch.skip();
            continue;
        };
        if let Some(value) = entry.get("value") {
            push_number(
                &mut batch,
                VENDOR,
                "heart.restingHeartRate",
                at,
                value,
                "restingHeartRate",
            );
        }
    }
    batch
}

/// Points from `/1.2/user/-/sleep/date/{day}.json`
#[must_use]
pub fn extract_sleep(day: NaiveDate, body: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    if let Some(summary) = body.get("summary") {
        push_number(
            &mut batch,
            VENDOR,
            "sleep.summary.totalMinutesAsleep",
            midnight(day),
            summary,
            "totalMinutesAsleep",
        );
    }
    batch
}

/// Points from `/1/user/-/body/log/weight/date/{day}.json`
#[must_use]
pub fn extract_weight(body: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    let Some(logs) = body.get("weight").and_then(Value::as_array) else {
        return batch;
    };
    for log in logs {
        let date = log.get("date").and_then(Value::as_str);
        let time = log.get("time").and_then(Value::as_str).unwrap_or("00:00:00");
        let at = date.and_then(|d| {
            NaiveDateTime::parse_from_str(&format!("{d} {time}"), "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        });
        match (at, numeric(log, "weight")) {
            (Some(at), Numeric::Present(kg)) => batch.points.push(RawDataPoint::new(
                VENDOR,
                "body.weight",
                at,
                RawValue::number(kg),
            )),
            _ => batch.skip(),
        }
    }
    batch
}

#[async_trait]
impl VendorAdapter for FitbitAdapter {
    fn kind(&self) -> VendorKind {
        VENDOR
    }

    async fn authorization_url(
        &self,
        state: &str,
    ) -> Result<AuthorizationRequest, ProviderError> {
        let desc = descriptor(VENDOR);
        let url = authorization_url(
            VENDOR.as_str(),
            desc.oauth.auth_url,
            &self.client,
            &desc.default_scopes.join(" "),
            state,
        )?;
        Ok(AuthorizationRequest {
            url,
            state: state.to_owned(),
        })
    }

    #[instrument(skip_all, fields(vendor = "fitbit"))]
    async fn authorize(
        &self,
        grant: &AuthorizationGrant,
    ) -> Result<OAuthCredential, ProviderError> {
        self.exchange(
            &[
                ("grant_type", "authorization_code"),
                ("code", grant.code.as_str()),
                ("redirect_uri", self.client.redirect_uri.as_str()),
                ("client_id", self.client.client_id.as_str()),
            ],
            GrantKind::AuthorizationCode,
            None,
        )
        .await
    }

    #[instrument(skip_all, fields(vendor = "fitbit"))]
    async fn refresh(
        &self,
        credential: &OAuthCredential,
    ) -> Result<OAuthCredential, ProviderError> {
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            return Err(ProviderError::auth_expired(
                VENDOR.as_str(),
                "no refresh token stored",
            ));
        };
        self.exchange(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            GrantKind::RefreshToken,
            Some(refresh_token),
        )
        .await
    }

    async fn revoke(&self, credential: &OAuthCredential) -> Result<(), ProviderError> {
        let Some(revoke_url) = descriptor(VENDOR).oauth.revoke_url else {
            return Ok(());
        };
        let request = shared_client()
            .post(revoke_url)
            .header(AUTHORIZATION, basic_auth_header(&self.client))
            .form(&[("token", credential.access_token.as_str())]);
        send(VENDOR.as_str(), request).await.map(|_| ())
    }

    fn fetch<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        range: TimeRange,
    ) -> RawPointStream<'a> {
        Box::pin(try_stream! {
            for day in days_in(range) {
                let date = day.format("%Y-%m-%d").to_string();

                let body = self
                    .get_day(credential, format!("/1/user/-/activities/date/{date}.json"))
                    .await?;
                yield extract_activity_summary(day, &body);

                let body = self
                    .get_day(credential, format!("/1/user/-/activities/heart/date/{date}/1d.json"))
                    .await?;
                yield extract_heart(&body);

                let body = self
                    .get_day(credential, format!("/1.2/user/-/sleep/date/{date}.json"))
                    .await?;
                yield extract_sleep(day, &body);

                let body = self
                    .get_day(credential, format!("/1/user/-/body/log/weight/date/{date}.json"))
                    .await?;
                yield extract_weight(&body);
            }
        })
    }
}
