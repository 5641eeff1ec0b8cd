// ABOUTME: Apple Health adapter for samples pushed by the companion app relay
// ABOUTME: Parses HealthKit-style sample payloads; consent goes through Sign in with Apple
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Apple Health adapter.
//!
//! HealthKit data never leaves the phone through a server API, so this vendor is
//! push-only: the companion app relays samples to the ingestion gateway. A relay
//! payload is either one sample object or `{"samples": [...]}`:
//!
//! ```json
//! {"samples": [
//!   {"type": "heart_rate", "value": 62, "unit": "count/min", "start": "2025-01-04T07:00:00Z"},
//!   {"type": "blood_pressure", "systolic": 121, "diastolic": 79, "start": "2025-01-04T07:05:00Z"}
//! ]}
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthsync_core::errors::ProviderError;
use healthsync_core::models::{
    AuthorizationGrant, AuthorizationRequest, OAuthCredential, RawDataPoint, RawValue, VendorKind,
};
use serde_json::Value;
use tracing::instrument;

use crate::adapter::{ParsedBatch, VendorAdapter};
use crate::config::VendorClientConfig;
use crate::descriptor::descriptor;
use crate::http_client::{send, shared_client};
use crate::json::{decode, numeric, parse_instant, Numeric};
use crate::oauth2::{authorization_url, parse_token_response, post_token_form, GrantKind};

const VENDOR: VendorKind = VendorKind::AppleHealth;

/// Apple Health adapter
pub struct AppleHealthAdapter {
    client: VendorClientConfig,
}

impl AppleHealthAdapter {
    /// Adapter using `client` registration
    #[must_use]
    pub const fn new(client: VendorClientConfig) -> Self {
        Self { client }
    }

    async fn exchange(
        &self,
        form: &[(&str, &str)],
        grant: GrantKind,
        previous_refresh: Option<&str>,
    ) -> Result<OAuthCredential, ProviderError> {
        let mut full = vec![
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
        ];
        full.extend_from_slice(form);
        let body = post_token_form(
            VENDOR.as_str(),
            descriptor(VENDOR).oauth.token_url,
            &full,
            None,
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

fn sample_instant(sample: &Value) -> Option<DateTime<Utc>> {
    ["start", "date", "startDate", "timestamp"]
        .iter()
        .find_map(|key| sample.get(*key).and_then(parse_instant))
}

/// Parse one sample, `None` when it is unusable
#[must_use]
pub fn parse_sample(sample: &Value) -> Option<RawDataPoint> {
    let kind = sample.get("type").and_then(Value::as_str)?;
    let at = sample_instant(sample)?;

    let value = if kind == "blood_pressure" {
        match (numeric(sample, "systolic"), numeric(sample, "diastolic")) {
            (Numeric::Present(first), Numeric::Present(second)) => RawValue::Pair { first, second },
            _ => return None,
        }
    } else {
        let Numeric::Present(value) = numeric(sample, "value") else {
            return None;
        };
        match sample.get("unit").and_then(Value::as_str) {
            Some(unit) => RawValue::Quantity {
                value,
                unit: unit.to_owned(),
            },
            None => RawValue::number(value),
        }
    };

    Some(RawDataPoint::new(VENDOR, format!("samples.{kind}"), at, value))
}

#[async_trait]
impl VendorAdapter for AppleHealthAdapter {
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

    #[instrument(skip_all, fields(vendor = "apple_health"))]
    async fn authorize(
        &self,
        grant: &AuthorizationGrant,
    ) -> Result<OAuthCredential, ProviderError> {
        self.exchange(
            &[
                ("grant_type", "authorization_code"),
                ("code", grant.code.as_str()),
                ("redirect_uri", self.client.redirect_uri.as_str()),
            ],
            GrantKind::AuthorizationCode,
            None,
        )
        .await
    }

    #[instrument(skip_all, fields(vendor = "apple_health"))]
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
        let (token, hint) = credential.refresh_token.as_deref().map_or(
            (credential.access_token.as_str(), "access_token"),
            |refresh| (refresh, "refresh_token"),
        );
        let request = shared_client().post(revoke_url).form(&[
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
            ("token", token),
            ("token_type_hint", hint),
        ]);
        send(VENDOR.as_str(), request).await.map(|_| ())
    }

    fn parse(&self, payload: &[u8]) -> Result<ParsedBatch, ProviderError> {
        let body = decode(VENDOR, payload)?;
        let samples: Vec<&Value> = match &body {
            Value::Object(object) if object.contains_key("samples") => object
                .get("samples")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    ProviderError::malformed(VENDOR.as_str(), "samples must be an array")
                })?
                .iter()
                .collect(),
            Value::Object(object) if object.contains_key("type") => vec![&body],
            Value::Array(items) => items.iter().collect(),
            _ => {
                return Err(ProviderError::malformed(
                    VENDOR.as_str(),
                    "expected a sample or a samples array",
                ))
            }
        };

        let mut batch = ParsedBatch::new();
        for sample in samples {
            match parse_sample(sample) {
                Some(point) => batch.points.push(point),
                None => batch.skip(),
            }
        }
        batch.require_any(VENDOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_is_kept_as_quantity() {
        let sample = serde_json::json!({
            "type": "blood_glucose", "value": 5.5, "unit": "mmol/L",
            "start": "2025-01-04T07:00:00Z"
        });
        let point = parse_sample(&sample).unwrap();
        assert_eq!(point.field, "samples.blood_glucose");
        assert_eq!(
            point.value,
            RawValue::Quantity {
                value: 5.5,
                unit: "mmol/L".to_owned()
            }
        );
    }

    #[test]
    fn test_sample_without_timestamp_is_unusable() {
        let sample = serde_json::json!({"type": "steps", "value": 10});
        assert!(parse_sample(&sample).is_none());
    }
}
