// ABOUTME: Withings Public API adapter for body measures, daily activity, and sleep summaries
// ABOUTME: Unwraps the status envelope every Withings response carries into provider errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthsync_core::errors::ProviderError;
use healthsync_core::models::{
    AuthorizationGrant, AuthorizationRequest, OAuthCredential, RawDataPoint, RawValue, TimeRange,
    VendorKind,
};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::adapter::{ParsedBatch, RawPointStream, VendorAdapter};
use crate::config::VendorClientConfig;
use crate::descriptor::descriptor;
use crate::http_client::{send_json, shared_client};
use crate::json::{days_in, parse_day, parse_instant, push_number};
use crate::oauth2::{authorization_url, parse_token_response, post_token_form, GrantKind};

const VENDOR: VendorKind = VendorKind::Withings;

/// Access token lifetime when the response omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 10_800;

/// `meastype` codes requested from `getmeas`
const MEASTYPE_WEIGHT: i64 = 1;
const MEASTYPE_DIASTOLIC: i64 = 9;
const MEASTYPE_SYSTOLIC: i64 = 10;

/// Withings adapter
pub struct WithingsAdapter {
    client: VendorClientConfig,
    api_base_url: String,
}

/// Body of a successful envelope, or the error its status code stands for
///
/// # Errors
///
/// Returns [`ProviderError::AuthExpired`] for token statuses,
/// [`ProviderError::RateLimited`] for status 601 and [`ProviderError::Api`]
/// for anything else that is not zero
pub fn unwrap_envelope(envelope: Value) -> Result<Value, ProviderError> {
    let status = envelope.get("status").and_then(Value::as_i64).ok_or_else(|| {
        ProviderError::malformed(VENDOR.as_str(), "response has no status field")
    })?;
    let message = envelope
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("request rejected")
        .to_owned();
    match status {
        0 => Ok(envelope.get("body").cloned().unwrap_or(Value::Null)),
        100 | 101 | 102 | 200 | 401 => Err(ProviderError::AuthExpired {
            vendor: VENDOR.as_str().to_owned(),
            message,
        }),
        601 => Err(ProviderError::RateLimited {
            vendor: VENDOR.as_str().to_owned(),
            retry_after_secs: None,
        }),
        other => Err(ProviderError::Api {
            vendor: VENDOR.as_str().to_owned(),
            status: u16::try_from(other).unwrap_or(u16::MAX),
            message,
        }),
    }
}

impl WithingsAdapter {
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

    async fn call(
        &self,
        credential: &OAuthCredential,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{path}", self.api_base_url);
        debug!(vendor = VENDOR.as_str(), %url, action = form.first().map(|p| p.1), "calling");
        let request = shared_client()
            .post(&url)
            .bearer_auth(&credential.access_token)
            .form(form);
        unwrap_envelope(send_json(VENDOR.as_str(), request).await?)
    }

    async fn token(
        &self,
        form: &[(&str, &str)],
        grant: GrantKind,
    ) -> Result<OAuthCredential, ProviderError> {
        let mut full = vec![
            ("action", "requesttoken"),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
        ];
        full.extend_from_slice(form);

        let envelope = post_token_form(
            VENDOR.as_str(),
            descriptor(VENDOR).oauth.token_url,
            &full,
            None,
            grant,
        )
        .await?;
        let body = match unwrap_envelope(envelope) {
            Ok(body) => body,
            Err(
                ProviderError::AuthExpired { vendor, message }
                | ProviderError::Api {
                    vendor, message, ..
                },
            ) => {
                return Err(match grant {
                    GrantKind::AuthorizationCode => {
                        ProviderError::AuthorizationFailed { vendor, message }
                    }
                    GrantKind::RefreshToken => ProviderError::AuthExpired { vendor, message },
                });
            }
            Err(other) => return Err(other),
        };
        Ok(parse_token_response(VENDOR.as_str(), body)?.into_credential(
            Utc::now(),
            Some(DEFAULT_EXPIRES_IN_SECS),
            None,
        ))
    }
}

fn scaled(measure: &Value) -> Option<(i64, i32)> {
    let value = measure.get("value").and_then(Value::as_i64)?;
    let unit = measure.get("unit").and_then(Value::as_i64)?;
    Some((value, i32::try_from(unit).ok()?))
}

fn apply_exponent(value: i64, exponent: i32) -> f64 {
    let value = value as f64;
    if exponent < 0 {
        value / 10_f64.powi(-exponent)
    } else {
        value * 10_f64.powi(exponent)
    }
}

/// Points from a `getmeas` body
///
/// Weight keeps Withings' mantissa/exponent form; blood pressure pairs the
/// systolic and diastolic measures of one group.
#[must_use]
pub fn extract_measures(body: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    let Some(groups) = body.get("measuregrps").and_then(Value::as_array) else {
        return batch;
    };
    for group in groups {
        let Some(at) = group.get("date").and_then(parse_instant) else {
            batch.skip();
            continue;
        };
        let Some(measures) = group.get("measures").and_then(Value::as_array) else {
            batch.skip();
            continue;
        };

        let mut systolic = None;
        let mut diastolic = None;
        for measure in measures {
            let kind = measure.get("type").and_then(Value::as_i64);
            let Some((value, exponent)) = scaled(measure) else {
                batch.skip();
                continue;
            };
            match kind {
                Some(MEASTYPE_WEIGHT) => batch.points.push(RawDataPoint::new(
                    VENDOR,
                    "measure.weight",
                    at,
                    RawValue::Scaled { value, exponent },
                )),
                Some(MEASTYPE_SYSTOLIC) => systolic = Some(apply_exponent(value, exponent)),
                Some(MEASTYPE_DIASTOLIC) => diastolic = Some(apply_exponent(value, exponent)),
                _ => {}
            }
        }

        match (systolic, diastolic) {
            (Some(first), Some(second)) => batch.points.push(RawDataPoint::new(
                VENDOR,
                "measure.blood_pressure",
                at,
                RawValue::Pair { first, second },
            )),
            (None, None) => {}
            _ => batch.skip(),
        }
    }
    batch
}

/// Points from a `getactivity` body
#[must_use]
pub fn extract_activity(body: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    let Some(days) = body.get("activities").and_then(Value::as_array) else {
        return batch;
    };
    for day in days {
        let Some(at) = day.get("date").and_then(Value::as_str).and_then(parse_day) else {
            batch.skip();
            continue;
        };
        push_number(&mut batch, VENDOR, "activity.steps", at, day, "steps");
        push_number(&mut batch, VENDOR, "activity.distance", at, day, "distance");
        push_number(&mut batch, VENDOR, "activity.calories", at, day, "calories");
    }
    batch
}

/// Points from a sleep `getsummary` body
#[must_use]
pub fn extract_sleep(body: &Value) -> ParsedBatch {
    let mut batch = ParsedBatch::new();
    let Some(series) = body.get("series").and_then(Value::as_array) else {
        return batch;
    };
    for night in series {
        let Some(at) = night.get("date").and_then(Value::as_str).and_then(parse_day) else {
            batch.skip();
            continue;
        };
        let Some(data) = night.get("data") else {
            batch.skip();
            continue;
        };
        push_number(
            &mut batch,
            VENDOR,
            "sleep.total_sleep_time",
            at,
            data,
            "total_sleep_time",
        );
    }
    batch
}

fn ymd(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl VendorAdapter for WithingsAdapter {
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
            &desc.default_scopes.join(","),
            state,
        )?;
        Ok(AuthorizationRequest {
            url,
            state: state.to_owned(),
        })
    }

    #[instrument(skip_all, fields(vendor = "withings"))]
    async fn authorize(
        &self,
        grant: &AuthorizationGrant,
    ) -> Result<OAuthCredential, ProviderError> {
        self.token(
            &[
                ("grant_type", "authorization_code"),
                ("code", grant.code.as_str()),
                ("redirect_uri", self.client.redirect_uri.as_str()),
            ],
            GrantKind::AuthorizationCode,
        )
        .await
    }

    #[instrument(skip_all, fields(vendor = "withings"))]
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
        let mut fresh = self
            .token(
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ],
                GrantKind::RefreshToken,
            )
            .await?;
        if fresh.external_user_id.is_none() {
            fresh.external_user_id.clone_from(&credential.external_user_id);
        }
        Ok(fresh)
    }

    async fn revoke(&self, _credential: &OAuthCredential) -> Result<(), ProviderError> {
        // Withings has no token revocation endpoint; access ends with the token lifetime.
        debug!(vendor = VENDOR.as_str(), "revocation not offered, dropping credential");
        Ok(())
    }

    fn fetch<'a>(
        &'a self,
        credential: &'a OAuthCredential,
        range: TimeRange,
    ) -> RawPointStream<'a> {
        Box::pin(try_stream! {
            let start = range.start.timestamp().to_string();
            let end = range.end.timestamp().to_string();
            let body = self
                .call(
                    credential,
                    "/measure",
                    &[
                        ("action", "getmeas"),
                        ("meastypes", "1,9,10"),
                        ("category", "1"),
                        ("startdate", start.as_str()),
                        ("enddate", end.as_str()),
                    ],
                )
                .await?;
            yield extract_measures(&body);

            let days = days_in(range);
            let (Some(first), Some(last)) = (days.first(), days.last()) else {
                return;
            };
            let first = first.format("%Y-%m-%d").to_string();
            let last = last.format("%Y-%m-%d").to_string();

            let body = self
                .call(
                    credential,
                    "/v2/measure",
                    &[
                        ("action", "getactivity"),
                        ("startdateymd", first.as_str()),
                        ("enddateymd", last.as_str()),
                        ("data_fields", "steps,distance,calories"),
                    ],
                )
                .await?;
            yield extract_activity(&body);

            let body = self
                .call(
                    credential,
                    "/v2/sleep",
                    &[
                        ("action", "getsummary"),
                        ("startdateymd", first.as_str()),
                        ("enddateymd", ymd(range.end).as_str()),
                        ("data_fields", "total_sleep_time"),
                    ],
                )
                .await?;
            yield extract_sleep(&body);
        })
    }
}
